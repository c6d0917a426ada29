/// Errors that can occur during tool schema validation.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A tool's input schema could not be compiled.
    #[error("failed to compile input schema for {tool}: {message}")]
    CompileFailed { tool: String, message: String },

    /// The arguments failed schema validation.
    #[error("invalid arguments for {tool}: {message}")]
    ValidationFailed { tool: String, message: String },

    /// A `tools/list` result did not have the expected shape.
    #[error("malformed tool list: {0}")]
    InvalidToolList(String),

    /// No schema registered for the given tool.
    #[error("no input schema registered for tool {0}")]
    NoSchema(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
