//! Desired versus observed state.
//!
//! [`plan`] normalises the desired configuration, compares it field by field
//! with the observed one and classifies every difference as an in-place
//! update or a replacement. Set blocks are compared as multisets: elements
//! are paired before they are compared so that a changed force-new field
//! inside one element shows up as a replacement of that element rather than
//! as an unrelated add and remove.

use std::collections::BTreeMap;

use crate::error::ReconcileError;
use crate::expand::normalize;
use crate::schema::{
    join_path, Attribute, AttributeType, Block, BlockNestingMode, DiffSuppress, NestedBlock, Schema,
};
use crate::types::{AttributeChange, FieldAction, PlanResult, ResourceAction};
use crate::validation::{block_elements, coerce};
use crate::value::{ConfigValue, Value};

/// Plan the changes that take `observed` to `desired`.
///
/// The desired configuration is validated and defaulted first, so a plan is
/// only produced for a configuration that would expand. Computed attributes
/// the configuration leaves unset are carried over from `observed` into the
/// planned state and never reported as changes.
pub fn plan(
    desired: &ConfigValue,
    observed: &ConfigValue,
    schema: &Schema,
) -> Result<PlanResult, ReconcileError> {
    let desired = normalize(desired, &schema.block)?;
    let mut changes = Vec::new();
    let planned = diff_block(&desired, observed, &schema.block, "", &mut changes);
    Ok(PlanResult::with_changes(planned, changes))
}

/// Plan the creation of a resource with no prior state.
pub fn plan_create(desired: &ConfigValue, schema: &Schema) -> Result<PlanResult, ReconcileError> {
    let desired = normalize(desired, &schema.block)?;
    let changes = desired
        .iter()
        .map(|(name, value)| {
            AttributeChange::new(name.clone(), None, Some(value.clone()), FieldAction::Update)
        })
        .collect();
    Ok(PlanResult {
        planned_state: desired,
        changes,
        action: ResourceAction::Create,
    })
}

/// Compare one block, pushing changes and returning the planned block.
fn diff_block(
    desired: &ConfigValue,
    observed: &ConfigValue,
    block: &Block,
    path: &str,
    changes: &mut Vec<AttributeChange>,
) -> ConfigValue {
    let mut planned = ConfigValue::new();

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        let want = desired.get_set(name);
        let have = observed
            .get_set(name)
            .map(|v| coerce(&attr.attr_type, v, &attr_path).unwrap_or_else(|_| v.clone()));

        match (want, &have) {
            (None, Some(_)) if attr.flags.computed && other_arm_chosen(block, desired, name) => {
                continue
            },
            (None, Some(have)) if attr.flags.computed => {
                planned.insert(name.clone(), have.clone());
                continue;
            },
            (Some(want), _) => planned.insert(name.clone(), want.clone()),
            (None, None) => continue,
            (None, Some(_)) => {},
        }

        if !attribute_eq(attr, want, have.as_ref()) {
            let action = if attr.force_new {
                FieldAction::Replace
            } else {
                FieldAction::Update
            };
            changes.push(AttributeChange::new(attr_path, have, want.cloned(), action));
        }
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        let want = block_elements(desired.get(name), &block_path).unwrap_or_default();
        let have = block_elements(observed.get(name), &block_path).unwrap_or_default();

        let mut block_changes = Vec::new();
        let items = match nested.nesting_mode {
            BlockNestingMode::Single | BlockNestingMode::List => {
                diff_list(nested, &want, &have, &block_path, &mut block_changes)
            },
            BlockNestingMode::Set => diff_set(nested, &want, &have, &block_path, &mut block_changes),
        };
        if nested.force_new {
            for change in &mut block_changes {
                change.action = FieldAction::Replace;
            }
        }
        changes.extend(block_changes);
        if !items.is_empty() {
            planned.insert(name.clone(), Value::List(items));
        }
    }

    planned
}

/// Whether `name` is one arm of an exactly-one-of group that `desired`
/// already satisfies with another arm.
fn other_arm_chosen(block: &Block, desired: &ConfigValue, name: &str) -> bool {
    block.exactly_one_of.iter().any(|group| {
        group.iter().any(|arm| arm == name)
            && group.iter().any(|arm| arm != name && desired.is_set(arm))
    })
}

fn diff_list(
    nested: &NestedBlock,
    want: &[ConfigValue],
    have: &[ConfigValue],
    path: &str,
    changes: &mut Vec<AttributeChange>,
) -> Vec<Value> {
    let mut items = Vec::with_capacity(want.len());
    for (i, element) in want.iter().enumerate() {
        let element_path = format!("{}.{}", path, i);
        match have.get(i) {
            Some(observed) => {
                let planned = diff_block(element, observed, &nested.block, &element_path, changes);
                items.push(planned.into());
            },
            None => {
                changes.push(added(&element_path, element));
                items.push(element.clone().into());
            },
        }
    }
    for (i, observed) in have.iter().enumerate().skip(want.len()) {
        changes.push(removed(&format!("{}.{}", path, i), observed));
    }
    items
}

fn diff_set(
    nested: &NestedBlock,
    want: &[ConfigValue],
    have: &[ConfigValue],
    path: &str,
    changes: &mut Vec<AttributeChange>,
) -> Vec<Value> {
    let compare = |d: usize, o: usize| {
        let mut scratch = Vec::new();
        diff_block(&want[d], &have[o], &nested.block, "", &mut scratch);
        if nested.force_new {
            for change in &mut scratch {
                change.action = FieldAction::Replace;
            }
        }
        scratch
    };

    let mut pairs: BTreeMap<usize, usize> = BTreeMap::new();
    let mut used = vec![false; have.len()];

    // exact matches
    for d in 0..want.len() {
        if let Some(o) = (0..have.len()).find(|&o| !used[o] && compare(d, o).is_empty()) {
            used[o] = true;
            pairs.insert(d, o);
        }
    }

    // same element with only force-new fields changed
    for d in 0..want.len() {
        if pairs.contains_key(&d) {
            continue;
        }
        let found = (0..have.len()).find(|&o| {
            !used[o] && compare(d, o).iter().all(AttributeChange::requires_replace)
        });
        if let Some(o) = found {
            used[o] = true;
            pairs.insert(d, o);
        }
    }

    // whatever is left, in content-hash order
    let mut rest_want: Vec<usize> = (0..want.len()).filter(|d| !pairs.contains_key(d)).collect();
    let mut rest_have: Vec<usize> = (0..have.len()).filter(|&o| !used[o]).collect();
    rest_want.sort_by_key(|&d| Value::from(want[d].clone()).content_hash());
    rest_have.sort_by_key(|&o| Value::from(have[o].clone()).content_hash());
    for (&d, &o) in rest_want.iter().zip(rest_have.iter()) {
        used[o] = true;
        pairs.insert(d, o);
    }

    let mut items = Vec::with_capacity(want.len());
    for (d, element) in want.iter().enumerate() {
        let element_path = format!("{}.{}", path, d);
        match pairs.get(&d) {
            Some(&o) => {
                let planned = diff_block(element, &have[o], &nested.block, &element_path, changes);
                items.push(planned.into());
            },
            None => {
                changes.push(added(&element_path, element));
                items.push(element.clone().into());
            },
        }
    }
    for (o, observed) in have.iter().enumerate() {
        if !used[o] {
            changes.push(removed(&format!("{}.{}", path, o), observed));
        }
    }
    Value::normalize_set(items)
}

fn added(path: &str, element: &ConfigValue) -> AttributeChange {
    AttributeChange::new(path, None, Some(element.clone().into()), FieldAction::Update)
}

fn removed(path: &str, element: &ConfigValue) -> AttributeChange {
    AttributeChange::new(path, Some(element.clone().into()), None, FieldAction::Update)
}

fn attribute_eq(attr: &Attribute, want: Option<&Value>, have: Option<&Value>) -> bool {
    let (want, have) = match (want, have) {
        (None, None) => return true,
        (Some(want), Some(have)) => (want, have),
        _ => return false,
    };
    match attr.diff_suppress {
        None => want == have,
        Some(rule) => match (&attr.attr_type, want, have) {
            (AttributeType::Set(_), Value::List(a), Value::List(b)) => {
                let mut a: Vec<String> = a.iter().map(|v| suppress_key(rule, v)).collect();
                let mut b: Vec<String> = b.iter().map(|v| suppress_key(rule, v)).collect();
                a.sort();
                a.dedup();
                b.sort();
                b.dedup();
                a == b
            },
            (_, Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| suppressed_eq(rule, x, y))
            },
            _ => suppressed_eq(rule, want, have),
        },
    }
}

fn suppressed_eq(rule: DiffSuppress, a: &Value, b: &Value) -> bool {
    match (rule, a, b) {
        (DiffSuppress::ConnectionString, Value::String(a), Value::String(b)) => {
            connection_string_pairs(a) == connection_string_pairs(b)
        },
        (_, Value::String(_), Value::String(_)) => suppress_key(rule, a) == suppress_key(rule, b),
        _ => a == b,
    }
}

fn suppress_key(rule: DiffSuppress, value: &Value) -> String {
    let s = value.to_string();
    match rule {
        DiffSuppress::CaseInsensitive => s.to_lowercase(),
        DiffSuppress::Location => s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase(),
        DiffSuppress::ConnectionString => {
            let pairs = connection_string_pairs(&s);
            pairs
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(";")
        },
    }
}

/// `key=value` pairs of a connection string, keys lowercased, password dropped.
fn connection_string_pairs(s: &str) -> BTreeMap<String, String> {
    s.split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            Some((key.trim().to_lowercase(), value.trim().to_string()))
        })
        .filter(|(key, _)| key != "password" && key != "pwd")
        .collect()
}
