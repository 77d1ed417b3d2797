//! API payload to configuration.
//!
//! The inverse of [`crate::expand`]: reads a response body field by field
//! using the schema's wire names. Missing and null fields are simply absent
//! from the result. A field with an unexpected shape fails the read, unless
//! the attribute is marked tolerant, in which case it degrades to the empty
//! value of its type and a warning is reported alongside the result.

use serde_json::Map;
use tracing::debug;

use crate::error::ReconcileError;
use crate::schema::{join_path, AttributeType, Block, BlockNestingMode, Diagnostic};
use crate::value::{exact_int, ConfigValue, Value};

/// A flattened response and the warnings raised while reading it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flattened {
    /// The observed configuration.
    pub config: ConfigValue,
    /// Warnings from tolerant fields that degraded.
    pub diagnostics: Vec<Diagnostic>,
}

/// Flatten a response body against a block.
///
/// `null` flattens to an empty configuration. Anything other than an object or
/// `null` is an [`ReconcileError::UnexpectedShape`].
pub fn flatten(json: &serde_json::Value, block: &Block) -> Result<Flattened, ReconcileError> {
    let mut diagnostics = Vec::new();
    let config = match json {
        serde_json::Value::Null => ConfigValue::new(),
        serde_json::Value::Object(obj) => flatten_block(obj, block, "", &mut diagnostics)?,
        other => {
            return Err(ReconcileError::UnexpectedShape {
                field: "body".to_string(),
                expected: "object".to_string(),
                actual: json_type_name(other).to_string(),
            })
        },
    };
    Ok(Flattened {
        config,
        diagnostics,
    })
}

fn flatten_block(
    obj: &Map<String, serde_json::Value>,
    block: &Block,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<ConfigValue, ReconcileError> {
    let mut config = ConfigValue::new();

    for (name, attr) in &block.attributes {
        if attr.skip_wire {
            continue;
        }
        let attr_path = join_path(path, name);
        let raw = obj.get(&attr.wire_key(name)).filter(|v| !v.is_null());
        let Some(raw) = raw else {
            if let Some(default) = &attr.default {
                config.insert(name.clone(), default.clone());
            }
            continue;
        };

        match flatten_value(&attr.attr_type, raw, &attr_path) {
            Ok(value) if value.is_empty() => {},
            Ok(value) => config.insert(name.clone(), value),
            Err(err) if attr.tolerant => {
                debug!(
                    field = %attr_path,
                    expected = %attr.attr_type.type_name(),
                    actual = json_type_name(raw),
                    "degrading unexpected response value"
                );
                diagnostics.push(
                    Diagnostic::warning("Unexpected response value")
                        .with_detail(format!("{}; treated as empty", err))
                        .with_attribute(attr_path),
                );
                config.insert(name.clone(), attr.attr_type.zero_value());
            },
            Err(err) => return Err(err),
        }
    }

    for (name, nested) in &block.blocks {
        if nested.skip_wire {
            continue;
        }
        let block_path = join_path(path, name);
        let raw = match obj.get(&nested.wire_key(name)) {
            None | Some(serde_json::Value::Null) => continue,
            Some(raw) => raw,
        };

        let mut items = match (nested.nesting_mode, raw) {
            (BlockNestingMode::Single, serde_json::Value::Object(inner)) => {
                let element_path = format!("{}.0", block_path);
                vec![Value::from(flatten_block(inner, &nested.block, &element_path, diagnostics)?)]
            },
            (BlockNestingMode::List | BlockNestingMode::Set, serde_json::Value::Array(elements)) => {
                let mut items = Vec::with_capacity(elements.len());
                for (i, element) in elements.iter().enumerate() {
                    let element_path = format!("{}.{}", block_path, i);
                    match element {
                        serde_json::Value::Null => {},
                        serde_json::Value::Object(inner) => items.push(Value::from(flatten_block(
                            inner,
                            &nested.block,
                            &element_path,
                            diagnostics,
                        )?)),
                        other => return Err(shape_error(&element_path, "object", other)),
                    }
                }
                items
            },
            (BlockNestingMode::Single, other) => {
                return Err(shape_error(&block_path, "object", other))
            },
            (_, other) => return Err(shape_error(&block_path, "array", other)),
        };

        if nested.nesting_mode == BlockNestingMode::Set {
            items = Value::normalize_set(items);
        }
        if !items.is_empty() {
            config.insert(name.clone(), Value::List(items));
        }
    }

    Ok(config)
}

fn flatten_value(
    attr_type: &AttributeType,
    json: &serde_json::Value,
    path: &str,
) -> Result<Value, ReconcileError> {
    let mismatch = || shape_error(path, &attr_type.type_name(), json);

    match (attr_type, json) {
        (AttributeType::String, serde_json::Value::String(s)) => Ok(Value::String(s.clone())),
        (AttributeType::Int64, serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Value::Int(i)),
            None => n.as_f64().and_then(exact_int).map(Value::Int).ok_or_else(mismatch),
        },
        (AttributeType::Float64, serde_json::Value::Number(n)) => {
            n.as_f64().map(Value::Float).ok_or_else(mismatch)
        },
        (AttributeType::Bool, serde_json::Value::Bool(b)) => Ok(Value::Bool(*b)),
        (AttributeType::List(element), serde_json::Value::Array(items)) => {
            flatten_elements(element, items, path).map(Value::List)
        },
        (AttributeType::Set(element), serde_json::Value::Array(items)) => {
            flatten_elements(element, items, path)
                .map(|items| Value::List(Value::normalize_set(items)))
        },
        (AttributeType::Map(element), serde_json::Value::Object(entries)) => {
            let mut map = std::collections::BTreeMap::new();
            for (key, item) in entries {
                if item.is_null() {
                    continue;
                }
                map.insert(key.clone(), flatten_value(element, item, &join_path(path, key))?);
            }
            Ok(Value::Map(map))
        },
        _ => Err(mismatch()),
    }
}

fn flatten_elements(
    element: &AttributeType,
    items: &[serde_json::Value],
    path: &str,
) -> Result<Vec<Value>, ReconcileError> {
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.is_null())
        .map(|(i, item)| flatten_value(element, item, &format!("{}.{}", path, i)))
        .collect()
}

/// Check that a polymorphic response is the variant this resource manages.
///
/// `discriminator` is a dotted path into the body, e.g. `properties.type`.
pub fn classify(
    json: &serde_json::Value,
    discriminator: &str,
    expected: &str,
) -> Result<(), ReconcileError> {
    let found = discriminator
        .split('.')
        .try_fold(json, |current, key| current.get(key));
    match found.and_then(serde_json::Value::as_str) {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(ReconcileError::UnexpectedVariant {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        None => Err(ReconcileError::UnexpectedVariant {
            expected: expected.to_string(),
            actual: found.map(|v| v.to_string()).unwrap_or_else(|| "null".to_string()),
        }),
    }
}

fn shape_error(path: &str, expected: &str, actual: &serde_json::Value) -> ReconcileError {
    ReconcileError::UnexpectedShape {
        field: path.to_string(),
        expected: expected.to_string(),
        actual: json_type_name(actual).to_string(),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{expand, normalize};
    use crate::schema::{Attribute, NestedBlock};
    use serde_json::json;

    fn block() -> Block {
        let predicate = Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("operator", Attribute::optional_string().with_default("In"))
            .with_attribute("values", Attribute::required_string_list().with_min_items(1));
        Block::new()
            .with_attribute("name", Attribute::required_string().path_only())
            .with_attribute("amount", Attribute::required_float64())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute("connection_string", Attribute::required_string().tolerant())
            .with_attribute("parameters", Attribute::optional_string_map())
            .with_block("tag", NestedBlock::set(predicate.clone()).with_wire_name("tags"))
            .with_block(
                "time_period",
                NestedBlock::single(
                    Block::new().with_attribute("start_date", Attribute::required_string()),
                ),
            )
    }

    fn tag(name: &str, values: &[&str]) -> Value {
        ConfigValue::new()
            .with("name", name)
            .with("values", Value::strings(values.iter().copied()))
            .into()
    }

    fn config() -> ConfigValue {
        ConfigValue::new()
            .with("name", "x")
            .with("amount", 100.5)
            .with("connection_string", "Server=tcp:db;Database=dw")
            .with(
                "parameters",
                Value::Map([("env".to_string(), Value::from("prod"))].into_iter().collect()),
            )
            .with("tag", Value::List(vec![tag("team", &["a", "b"]), tag("env", &["prod"])]))
            .with(
                "time_period",
                Value::block(ConfigValue::new().with("start_date", "2022-06-01T00:00:00Z")),
            )
    }

    #[test]
    fn test_roundtrip() {
        let block = block();
        let mut expected = normalize(&config(), &block).unwrap();
        // carried by the id, not the body
        expected.remove("name");

        let body = expand(&config(), &block).unwrap();
        let flattened = flatten(&body, &block).unwrap();
        assert_eq!(flattened.config, expected);
        assert!(flattened.diagnostics.is_empty());
    }

    #[test]
    fn test_absent_and_null_fields() {
        let body = json!({
            "amount": 10,
            "connectionString": "Server=x",
            "description": null,
            "tags": null
        });
        let flattened = flatten(&body, &block()).unwrap();
        assert_eq!(flattened.config.get("amount"), Some(&Value::Float(10.0)));
        assert!(flattened.config.get("description").is_none());
        assert!(flattened.config.get("tag").is_none());
        assert!(flattened.config.get("time_period").is_none());
    }

    #[test]
    fn test_set_is_normalised() {
        let a = json!({"tags": [
            {"name": "team", "operator": "In", "values": ["a"]},
            {"name": "env", "operator": "In", "values": ["prod"]}
        ]});
        let b = json!({"tags": [
            {"name": "env", "operator": "In", "values": ["prod"]},
            {"name": "team", "operator": "In", "values": ["a"]},
            {"name": "team", "operator": "In", "values": ["a"]}
        ]});
        let a = flatten(&a, &block()).unwrap().config;
        let b = flatten(&b, &block()).unwrap().config;
        assert_eq!(a, b);
        assert_eq!(a.get_list("tag").len(), 2);
    }

    #[test]
    fn test_tolerant_field_degrades() {
        let body = json!({
            "amount": 10,
            "connectionString": {"type": "SecureString", "value": "**********"}
        });
        let flattened = flatten(&body, &block()).unwrap();
        assert_eq!(flattened.config.get("connection_string"), Some(&Value::from("")));
        assert_eq!(flattened.diagnostics.len(), 1);
        assert!(!flattened.diagnostics[0].is_error());
        assert_eq!(
            flattened.diagnostics[0].attribute,
            Some("connection_string".to_string())
        );
    }

    #[test]
    fn test_strict_field_fails() {
        let body = json!({"amount": "lots"});
        match flatten(&body, &block()) {
            Err(ReconcileError::UnexpectedShape { field, expected, actual }) => {
                assert_eq!(field, "amount");
                assert_eq!(expected, "float64");
                assert_eq!(actual, "string");
            },
            other => panic!("unexpected {:?}", other),
        }

        let body = json!({"timePeriod": ["2022"]});
        assert!(matches!(
            flatten(&body, &block()),
            Err(ReconcileError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn test_defaults_fill_absent_fields() {
        let body = json!({"tags": [{"name": "env", "values": ["prod"]}]});
        let config = flatten(&body, &block()).unwrap().config;
        let tag = config.get_list("tag")[0].as_map().unwrap();
        assert_eq!(tag.get("operator"), Some(&Value::from("In")));
    }

    #[test]
    fn test_null_body() {
        let flattened = flatten(&serde_json::Value::Null, &block()).unwrap();
        assert!(flattened.config.is_empty());
        assert!(flatten(&json!([1]), &block()).is_err());
    }

    #[test]
    fn test_classify() {
        let body = json!({"properties": {"type": "AzureSqlDW"}});
        assert!(classify(&body, "properties.type", "AzureSqlDW").is_ok());

        let body = json!({"properties": {"type": "AzureBlobStorage"}});
        match classify(&body, "properties.type", "AzureSqlDW") {
            Err(ReconcileError::UnexpectedVariant { expected, actual }) => {
                assert_eq!(expected, "AzureSqlDW");
                assert_eq!(actual, "AzureBlobStorage");
            },
            other => panic!("unexpected {:?}", other),
        }

        assert!(classify(&json!({}), "properties.type", "AzureSqlDW").is_err());
    }
}
