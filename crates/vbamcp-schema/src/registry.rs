use std::collections::HashMap;

use jsonschema::Validator;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::validator::validate_arguments;

/// Tool-name-keyed registry of compiled input schema validators.
pub struct ToolSchemaRegistry {
    validators: HashMap<String, Validator>,
    config: RegistryConfig,
}

impl ToolSchemaRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            validators: HashMap::new(),
            config,
        }
    }

    /// Compile and register the input schema for one tool.
    ///
    /// Replaces any schema previously registered under the same name.
    pub fn register(&mut self, tool: &str, schema: &Value) -> Result<()> {
        let mut schema_to_compile = schema.clone();
        if self.config.strict_mode {
            apply_strict_mode(&mut schema_to_compile);
        }

        let compiled =
            jsonschema::validator_for(&schema_to_compile).map_err(|err| {
                SchemaError::CompileFailed {
                    tool: tool.to_string(),
                    message: err.to_string(),
                }
            })?;

        self.validators.insert(tool.to_string(), compiled);
        Ok(())
    }

    /// Build a registry from `(name, schema)` pairs.
    pub fn from_tools<'a, I>(tools: I, config: RegistryConfig) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let mut registry = Self::with_config(config);
        for (name, schema) in tools {
            registry.register(name, schema)?;
        }
        Ok(registry)
    }

    /// Build a registry from a `tools/list` result.
    ///
    /// Accepts either the whole result object (`{"tools":[...]}`) or the bare
    /// tools array. Tools that advertise no `inputSchema` are skipped, and so
    /// are tools whose schema does not compile, with a warning. Such tools
    /// then validate as if they had no schema.
    pub fn from_tool_list(list: &Value, config: RegistryConfig) -> Result<Self> {
        let tools = match list {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("tools") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(SchemaError::InvalidToolList(
                        "missing `tools` array".to_string(),
                    ))
                }
            },
            _ => {
                return Err(SchemaError::InvalidToolList(
                    "expected an object or array".to_string(),
                ))
            }
        };

        if tools.len() > config.max_tools {
            return Err(SchemaError::InvalidToolList(format!(
                "tool count exceeds configured max ({}): {}",
                config.max_tools,
                tools.len()
            )));
        }

        let mut registry = Self::with_config(config);
        for (index, tool) in tools.iter().enumerate() {
            let Some(name) = tool.get("name").and_then(Value::as_str) else {
                return Err(SchemaError::InvalidToolList(format!(
                    "tool at index {index} has no name"
                )));
            };
            match tool.get("inputSchema") {
                Some(schema) if !schema.is_null() => {
                    if let Err(err) = registry.register(name, schema) {
                        warn!(tool = name, error = %err, "ignoring unusable input schema");
                    }
                }
                _ => debug!(tool = name, "tool advertises no input schema"),
            }
        }
        Ok(registry)
    }

    /// Validate tool-call arguments against the tool's schema.
    pub fn validate(&self, tool: &str, arguments: &Value) -> Result<()> {
        match self.validators.get(tool) {
            Some(validator) => validate_arguments(tool, arguments, validator),
            None if self.config.fail_on_missing_schema => {
                Err(SchemaError::NoSchema(tool.to_string()))
            }
            None => Ok(()),
        }
    }

    /// Check if a tool has a registered schema.
    pub fn has_schema(&self, tool: &str) -> bool {
        self.validators.contains_key(tool)
    }

    /// Names of tools that have registered schemas, sorted.
    pub fn tools(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        tools.sort_unstable();
        tools
    }

    /// Get registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for ToolSchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolSchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSchemaRegistry")
            .field("tools", &self.tools())
            .field("config", &self.config)
            .finish()
    }
}

fn apply_strict_mode(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if is_object_schema(map) && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for key in ["properties", "patternProperties", "$defs", "definitions"] {
                if let Some(Value::Object(children)) = map.get_mut(key) {
                    children.values_mut().for_each(apply_strict_mode);
                }
            }
            for key in ["items", "additionalProperties", "not", "if", "then", "else"] {
                if let Some(child) = map.get_mut(key) {
                    apply_strict_mode(child);
                }
            }
            for key in ["prefixItems", "allOf", "anyOf", "oneOf"] {
                if let Some(Value::Array(children)) = map.get_mut(key) {
                    children.iter_mut().for_each(apply_strict_mode);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(apply_strict_mode),
        _ => {}
    }
}

fn is_object_schema(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds
            .iter()
            .any(|kind| matches!(kind, Value::String(k) if k == "object")),
        _ => map.contains_key("properties") || map.contains_key("required"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn module_code_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "workbook": { "type": "string" },
                "module": { "type": "string" }
            },
            "required": ["workbook", "module"]
        })
    }

    #[test]
    fn register_and_validate() {
        let mut registry = ToolSchemaRegistry::new();
        registry
            .register("excel_get_module_code", &module_code_schema())
            .unwrap();

        assert!(registry
            .validate(
                "excel_get_module_code",
                &json!({"workbook": "Book1.xlsm", "module": "Module1"})
            )
            .is_ok());

        let err = registry
            .validate("excel_get_module_code", &json!({"workbook": 7}))
            .unwrap_err();
        match err {
            SchemaError::ValidationFailed { tool, message } => {
                assert_eq!(tool, "excel_get_module_code");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_schema_permissive_passes() {
        let registry = ToolSchemaRegistry::new();
        assert!(registry.validate("ping", &json!({})).is_ok());
    }

    #[test]
    fn missing_schema_strict_fails() {
        let registry = ToolSchemaRegistry::with_config(RegistryConfig {
            fail_on_missing_schema: true,
            ..RegistryConfig::default()
        });

        assert!(matches!(
            registry.validate("ping", &json!({})),
            Err(SchemaError::NoSchema(tool)) if tool == "ping"
        ));
    }

    #[test]
    fn strict_mode_rejects_undeclared_arguments() {
        let mut permissive = ToolSchemaRegistry::new();
        permissive.register("code", &module_code_schema()).unwrap();

        let mut strict = ToolSchemaRegistry::with_config(RegistryConfig {
            strict_mode: true,
            ..RegistryConfig::default()
        });
        strict.register("code", &module_code_schema()).unwrap();

        let args = json!({"workbook": "a", "module": "b", "extra": true});
        assert!(permissive.validate("code", &args).is_ok());
        assert!(matches!(
            strict.validate("code", &args),
            Err(SchemaError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn strict_mode_keeps_explicit_additional_properties() {
        let mut strict = ToolSchemaRegistry::with_config(RegistryConfig {
            strict_mode: true,
            ..RegistryConfig::default()
        });
        strict
            .register(
                "open",
                &json!({"type": "object", "additionalProperties": true}),
            )
            .unwrap();

        assert!(strict.validate("open", &json!({"anything": 1})).is_ok());
    }

    #[test]
    fn strict_mode_applies_nested_objects() {
        let mut strict = ToolSchemaRegistry::with_config(RegistryConfig {
            strict_mode: true,
            ..RegistryConfig::default()
        });
        strict
            .register(
                "nested",
                &json!({
                    "type": "object",
                    "properties": {
                        "inner": {
                            "type": "object",
                            "properties": { "v": { "type": "integer" } }
                        }
                    }
                }),
            )
            .unwrap();

        assert!(strict.validate("nested", &json!({"inner": {"v": 1}})).is_ok());
        assert!(strict
            .validate("nested", &json!({"inner": {"v": 1, "w": 2}}))
            .is_err());
    }

    #[test]
    fn invalid_schema_fails_compile() {
        let mut registry = ToolSchemaRegistry::new();
        let err = registry
            .register("bad", &json!({"type": "definitely-not-a-type"}))
            .unwrap_err();
        assert!(matches!(err, SchemaError::CompileFailed { tool, .. } if tool == "bad"));
    }

    #[test]
    fn from_tool_list_skips_tools_without_schema() {
        let list = json!({
            "tools": [
                { "name": "ping", "description": "liveness" },
                { "name": "excel_get_module_code", "inputSchema": module_code_schema() },
                {
                    "name": "vba_search_code",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "query": { "type": "string" } },
                        "required": ["query"]
                    }
                }
            ]
        });

        let registry = ToolSchemaRegistry::from_tool_list(&list, RegistryConfig::default()).unwrap();
        assert_eq!(
            registry.tools(),
            vec!["excel_get_module_code", "vba_search_code"]
        );
        assert!(!registry.has_schema("ping"));
        assert!(registry
            .validate("vba_search_code", &json!({}))
            .is_err());
    }

    #[test]
    fn from_tool_list_skips_uncompilable_schema() {
        let list = json!([
            { "name": "bad", "inputSchema": { "type": "definitely-not-a-type" } },
            { "name": "code", "inputSchema": module_code_schema() }
        ]);

        let registry = ToolSchemaRegistry::from_tool_list(&list, RegistryConfig::default()).unwrap();
        assert_eq!(registry.tools(), vec!["code"]);
        assert!(registry.validate("bad", &json!({"anything": 1})).is_ok());
    }

    #[test]
    fn from_tool_list_rejects_malformed_input() {
        let config = RegistryConfig::default();
        assert!(matches!(
            ToolSchemaRegistry::from_tool_list(&json!({"nope": []}), config),
            Err(SchemaError::InvalidToolList(_))
        ));
        assert!(matches!(
            ToolSchemaRegistry::from_tool_list(&json!([{"inputSchema": {}}]), config),
            Err(SchemaError::InvalidToolList(_))
        ));
        assert!(matches!(
            ToolSchemaRegistry::from_tool_list(&json!("tools"), config),
            Err(SchemaError::InvalidToolList(_))
        ));
    }

    #[test]
    fn from_tool_list_enforces_tool_limit() {
        let config = RegistryConfig {
            max_tools: 1,
            ..RegistryConfig::default()
        };
        let list = json!([{ "name": "a" }, { "name": "b" }]);
        assert!(matches!(
            ToolSchemaRegistry::from_tool_list(&list, config),
            Err(SchemaError::InvalidToolList(_))
        ));
    }

    #[test]
    fn from_tools_registers_pairs() {
        let schema = module_code_schema();
        let registry =
            ToolSchemaRegistry::from_tools([("code", &schema)], RegistryConfig::default())
                .unwrap();
        assert!(registry.has_schema("code"));
        assert_eq!(registry.config(), &RegistryConfig::default());
    }
}
