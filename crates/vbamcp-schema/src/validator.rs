use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Result, SchemaError};

const MAX_REPORTED_ERRORS: usize = 4;

pub(crate) fn validate_arguments(tool: &str, arguments: &Value, validator: &Validator) -> Result<()> {
    let mut errors = validator.iter_errors(arguments);
    let Some(first) = errors.next() else {
        return Ok(());
    };

    let mut message = first.to_string();
    for err in errors.take(MAX_REPORTED_ERRORS - 1) {
        message.push_str("; ");
        message.push_str(&err.to_string());
    }
    Err(SchemaError::ValidationFailed {
        tool: tool.to_string(),
        message,
    })
}
