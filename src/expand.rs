//! Configuration to API payload.
//!
//! Expansion happens in two steps. [`normalize`] coerces, validates and
//! defaults every field the schema declares, producing the canonical form of a
//! configuration. [`expand`] then renders that canonical form with wire names.
//! Both fail on the first problem; use [`crate::validation::validate`] to
//! collect all of them.

use serde_json::Map;

use crate::error::ReconcileError;
use crate::schema::{join_path, Block, BlockNestingMode};
use crate::validation::{block_elements, check_block_count, group_violations, resolve_attribute};
use crate::value::{ConfigValue, Value};

/// Expand a configuration into a request body.
///
/// Fields are visited in name order. Computed-only and path-only fields are
/// not emitted, absent optional fields take their default, and sets are sent
/// in content-hash order.
pub fn expand(config: &ConfigValue, block: &Block) -> Result<serde_json::Value, ReconcileError> {
    let normalized = normalize(config, block)?;
    Ok(serde_json::Value::Object(to_wire(&normalized, block)))
}

/// Canonical form of a configuration.
///
/// Values are coerced to their schema types, defaults filled in, empty values
/// dropped, sets ordered by content hash and fields unknown to the schema
/// discarded. Two configurations that mean the same thing normalise to equal
/// values.
pub fn normalize(config: &ConfigValue, block: &Block) -> Result<ConfigValue, ReconcileError> {
    normalize_block(config, block, "")
}

fn normalize_block(
    config: &ConfigValue,
    block: &Block,
    path: &str,
) -> Result<ConfigValue, ReconcileError> {
    let mut out = ConfigValue::new();

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        if let Some(value) = resolve_attribute(attr, config.get(name), &attr_path)? {
            if !value.is_empty() {
                out.insert(name.clone(), value);
            }
        }
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        let elements = block_elements(config.get(name), &block_path)?;
        check_block_count(nested, elements.len(), &block_path)?;

        let mut items = elements
            .iter()
            .enumerate()
            .map(|(i, element)| {
                normalize_block(element, &nested.block, &format!("{}.{}", block_path, i))
                    .map(Value::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if nested.nesting_mode == BlockNestingMode::Set {
            items = Value::normalize_set(items);
        }
        if !items.is_empty() {
            out.insert(name.clone(), Value::List(items));
        }
    }

    if let Some(err) = group_violations(block, config, path).into_iter().next() {
        return Err(err);
    }
    Ok(out)
}

fn to_wire(config: &ConfigValue, block: &Block) -> Map<String, serde_json::Value> {
    let mut body = Map::new();

    for (name, attr) in &block.attributes {
        if attr.skip_wire {
            continue;
        }
        if let Some(value) = config.get(name) {
            body.insert(attr.wire_key(name), value.to_json());
        }
    }

    for (name, nested) in &block.blocks {
        if nested.skip_wire {
            continue;
        }
        let elements: Vec<serde_json::Value> = config
            .get_list(name)
            .iter()
            .filter_map(Value::as_map)
            .map(|map| serde_json::Value::Object(to_wire(&ConfigValue(map.clone()), &nested.block)))
            .collect();
        if elements.is_empty() {
            continue;
        }
        let wire = match nested.nesting_mode {
            BlockNestingMode::Single => elements.into_iter().next().unwrap_or_default(),
            BlockNestingMode::List | BlockNestingMode::Set => serde_json::Value::Array(elements),
        };
        body.insert(nested.wire_key(name), wire);
    }

    body
}

/// Resolve a deprecated/current field pair into the canonical value.
///
/// An explicit `current` value wins. Otherwise the canonical value is derived
/// from `deprecated`. With neither set the result is
/// [`ReconcileError::MissingField`] naming both.
pub fn resolve_canonical<F>(
    config: &ConfigValue,
    current: &str,
    deprecated: &str,
    derive: F,
) -> Result<String, ReconcileError>
where
    F: FnOnce(&str) -> Result<String, ReconcileError>,
{
    if let Some(value) = config.get_str(current) {
        return Ok(value.to_string());
    }
    match config.get_str(deprecated) {
        Some(value) => derive(value),
        None => Err(ReconcileError::MissingField {
            fields: vec![current.to_string(), deprecated.to_string()],
        }),
    }
}
