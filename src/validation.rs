//! Field validators and whole-configuration validation.
//!
//! [`Validator`] is the set of predicates a schema can attach to an attribute.
//! [`validate`] walks a configuration against a [`Schema`] and collects every
//! problem as a [`Diagnostic`] instead of stopping at the first one, which is
//! what callers want before a plan. The expander runs the same checks through
//! the crate-internal helpers here but fails fast.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_azurerm::schema::{Attribute, Schema};
//! use hemmer_provider_azurerm::validation::{validate, Validator};
//! use hemmer_provider_azurerm::value::ConfigValue;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute(
//!         "threshold",
//!         Attribute::optional_int64().with_validator(Validator::IntBetween { min: 0, max: 1000 }),
//!     );
//!
//! let config = ConfigValue::new().with("name", "budget").with("threshold", 90i64);
//! assert!(validate(&schema, &config).is_empty());
//!
//! let config = ConfigValue::new().with("name", "budget").with("threshold", 1001i64);
//! let diagnostics = validate(&schema, &config);
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("threshold".to_string()));
//! ```

use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::ids;
use crate::schema::{join_path, Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema};
use crate::value::{exact_int, ConfigValue, Value};

static BUDGET_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-_a-zA-Z0-9]{1,63}$").unwrap());

static DATA_FACTORY_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+(?:-[A-Za-z0-9]+)*$").unwrap());

static LINKED_SERVICE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][^<>*#.%&:\\+?/]*$").unwrap());

static RESOURCE_GROUP_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-\w._()]+$").unwrap());

/// A constraint on a single value.
///
/// For list, set and map attributes the validator is applied to every element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    /// The string is one of `values`.
    StringInSlice {
        /// Accepted values.
        values: Vec<String>,
        /// Compare without regard to ASCII case.
        #[serde(default)]
        ignore_case: bool,
    },
    /// The integer lies in `[min, max]`.
    IntBetween {
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },
    /// The number is at least the given bound.
    FloatAtLeast(f64),
    /// The string is not empty.
    StringIsNotEmpty,
    /// The string is a UUID.
    IsUuid,
    /// The string is an RFC 3339 timestamp.
    IsRfc3339Time,
    /// The string is a resource group id.
    ResourceGroupId,
    /// The string is a valid resource group name.
    ResourceGroupName,
    /// The string is a management group id.
    ManagementGroupId,
    /// The string is a data factory id.
    DataFactoryId,
    /// The string is a valid data factory name.
    DataFactoryName,
    /// The string is a valid linked service name.
    LinkedServiceName,
    /// The string is a valid consumption budget name.
    BudgetName,
    /// The string is an RFC 3339 timestamp on the first day of a month.
    BudgetStartDate,
    /// The string is a user assigned identity id.
    UserAssignedIdentityId,
}

impl Validator {
    /// Check `value`, naming `field` in the error.
    pub fn check(&self, field: &str, value: &Value) -> Result<(), ReconcileError> {
        let fail = |constraint: String| Err(ReconcileError::validation(field, constraint));

        match self {
            Self::StringInSlice { values, ignore_case } => {
                let s = expect_str(field, value)?;
                let found = values.iter().any(|candidate| {
                    if *ignore_case {
                        candidate.eq_ignore_ascii_case(s)
                    } else {
                        candidate == s
                    }
                });
                if !found {
                    return fail(format!(
                        "must be one of [{}], got {:?}",
                        values.join(", "),
                        s
                    ));
                }
            },
            Self::IntBetween { min, max } => {
                let i = match value {
                    Value::Int(i) => *i,
                    Value::Float(f) => match exact_int(*f) {
                        Some(i) => i,
                        None => return fail(format!("must be an integer, got {}", f)),
                    },
                    other => return fail(format!("must be an integer, got {}", other.type_name())),
                };
                if i < *min || i > *max {
                    return fail(format!("must be between {} and {}, got {}", min, max, i));
                }
            },
            Self::FloatAtLeast(min) => {
                let f = value.as_float().ok_or_else(|| {
                    ReconcileError::validation(
                        field,
                        format!("must be a number, got {}", value.type_name()),
                    )
                })?;
                if !f.is_finite() {
                    return fail(format!("must be a finite number, got {}", f));
                }
                if f < *min {
                    return fail(format!("must be at least ({}), got {}", min, f));
                }
            },
            Self::StringIsNotEmpty => {
                if expect_str(field, value)?.is_empty() {
                    return fail("must not be empty".to_string());
                }
            },
            Self::IsUuid => {
                let s = expect_str(field, value)?;
                if uuid::Uuid::parse_str(s).is_err() {
                    return fail(format!("must be a valid UUID, got {:?}", s));
                }
            },
            Self::IsRfc3339Time => {
                let s = expect_str(field, value)?;
                if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                    return fail(format!("must be a valid RFC3339 date, got {:?}", s));
                }
            },
            Self::BudgetStartDate => {
                let s = expect_str(field, value)?;
                match chrono::DateTime::parse_from_rfc3339(s) {
                    Ok(date) if date.day() == 1 => {},
                    Ok(_) => return fail(format!("must be the first day of a month, got {:?}", s)),
                    Err(_) => return fail(format!("must be a valid RFC3339 date, got {:?}", s)),
                }
            },
            Self::ResourceGroupId => {
                let s = expect_str(field, value)?;
                ids::ResourceGroupId::parse(s).map_err(|e| id_error(field, e))?;
            },
            Self::ManagementGroupId => {
                let s = expect_str(field, value)?;
                ids::ManagementGroupId::parse(s).map_err(|e| id_error(field, e))?;
            },
            Self::DataFactoryId => {
                let s = expect_str(field, value)?;
                ids::DataFactoryId::parse(s).map_err(|e| id_error(field, e))?;
            },
            Self::UserAssignedIdentityId => {
                let s = expect_str(field, value)?;
                ids::UserAssignedIdentityId::parse_insensitively(s)
                    .map_err(|e| id_error(field, e))?;
            },
            Self::ResourceGroupName => {
                let s = expect_str(field, value)?;
                if s.len() > 90 {
                    return fail("may not exceed 90 characters in length".to_string());
                }
                if s.ends_with('.') {
                    return fail("may not end with a period".to_string());
                }
                if !RESOURCE_GROUP_NAME_RE.is_match(s) {
                    return fail(
                        "may only contain alphanumeric characters, dash, underscores, parentheses and periods"
                            .to_string(),
                    );
                }
            },
            Self::DataFactoryName => {
                let s = expect_str(field, value)?;
                if !(3..=63).contains(&s.len()) {
                    return fail(format!("must be between 3 and 63 characters, got {}", s.len()));
                }
                if !DATA_FACTORY_NAME_RE.is_match(s) {
                    return fail(format!(
                        "is invalid, name can only contain letters, numbers and hyphens, got {:?}",
                        s
                    ));
                }
            },
            Self::LinkedServiceName => {
                let s = expect_str(field, value)?;
                if !LINKED_SERVICE_NAME_RE.is_match(s) {
                    return fail(format!(
                        "must start with a letter, number or underscore and may not contain <>*#.%&:\\+?/, got {:?}",
                        s
                    ));
                }
            },
            Self::BudgetName => {
                let s = expect_str(field, value)?;
                if !BUDGET_NAME_RE.is_match(s) {
                    return fail(format!(
                        "must be 1-63 characters of letters, numbers, underscores and hyphens, got {:?}",
                        s
                    ));
                }
            },
        }
        Ok(())
    }
}

fn expect_str<'a>(field: &str, value: &'a Value) -> Result<&'a str, ReconcileError> {
    value.as_str().ok_or_else(|| {
        ReconcileError::validation(field, format!("must be a string, got {}", value.type_name()))
    })
}

fn id_error(field: &str, err: ReconcileError) -> ReconcileError {
    match err {
        ReconcileError::InvalidId { reason, .. } => ReconcileError::validation(field, reason),
        other => other,
    }
}

/// Bring a value to the shape of `attr_type`.
///
/// Ints are accepted for floats, numeric strings for numbers, `"true"` and
/// `"false"` for bools, and scalars are rendered for strings. Set elements are
/// normalised into content-hash order.
pub(crate) fn coerce(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
) -> Result<Value, ReconcileError> {
    let mismatch = || {
        ReconcileError::validation(
            path,
            format!("must be {}, got {}", attr_type.type_name(), value.type_name()),
        )
    };
    let not_finite =
        || ReconcileError::validation(path, format!("must be a finite number, got {}", value));

    match (attr_type, value) {
        (AttributeType::String, Value::String(_)) => Ok(value.clone()),
        (AttributeType::String, Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
            Ok(Value::String(value.to_string()))
        },
        (AttributeType::Int64, Value::Int(_)) => Ok(value.clone()),
        (AttributeType::Int64, Value::Float(f)) => {
            exact_int(*f).map(Value::Int).ok_or_else(mismatch)
        },
        (AttributeType::Int64, Value::String(s)) => {
            s.trim().parse::<i64>().map(Value::Int).map_err(|_| mismatch())
        },
        (AttributeType::Float64, Value::Float(f)) if f.is_finite() => Ok(value.clone()),
        (AttributeType::Float64, Value::Float(_)) => Err(not_finite()),
        (AttributeType::Float64, Value::Int(i)) => Ok(Value::Float(*i as f64)),
        (AttributeType::Float64, Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Value::Float(f)),
            Ok(_) => Err(not_finite()),
            Err(_) => Err(mismatch()),
        },
        (AttributeType::Bool, Value::Bool(_)) => Ok(value.clone()),
        (AttributeType::Bool, Value::String(s)) => match s.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        (AttributeType::List(element), Value::List(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| coerce(element, item, &format!("{}.{}", path, i)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (AttributeType::Set(element), Value::List(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| coerce(element, item, &format!("{}.{}", path, i)))
            .collect::<Result<Vec<_>, _>>()
            .map(|items| Value::List(Value::normalize_set(items))),
        (AttributeType::Map(element), Value::Map(entries)) => entries
            .iter()
            .map(|(key, item)| {
                coerce(element, item, &join_path(path, key)).map(|v| (key.clone(), v))
            })
            .collect::<Result<_, _>>()
            .map(Value::Map),
        _ => Err(mismatch()),
    }
}

fn check_item_count(
    path: &str,
    len: usize,
    min_items: u32,
    max_items: u32,
) -> Result<(), ReconcileError> {
    let count = u32::try_from(len).unwrap_or(u32::MAX);
    if count < min_items {
        return Err(ReconcileError::validation(
            path,
            format!("requires at least {} item(s), got {}", min_items, len),
        ));
    }
    if max_items > 0 && count > max_items {
        return Err(ReconcileError::validation(
            path,
            format!("allows at most {} item(s), got {}", max_items, len),
        ));
    }
    Ok(())
}

/// Coerce a set value and check item counts and validators. Returns the
/// coerced value.
pub(crate) fn check_attribute(
    attr: &Attribute,
    value: &Value,
    path: &str,
) -> Result<Value, ReconcileError> {
    let coerced = coerce(&attr.attr_type, value, path)?;
    match &coerced {
        Value::List(items) => {
            check_item_count(path, items.len(), attr.min_items, attr.max_items)?;
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                for validator in &attr.validators {
                    validator.check(&item_path, item)?;
                }
            }
        },
        Value::Map(entries) => {
            for (key, item) in entries {
                let item_path = join_path(path, key);
                for validator in &attr.validators {
                    validator.check(&item_path, item)?;
                }
            }
        },
        scalar => {
            for validator in &attr.validators {
                validator.check(path, scalar)?;
            }
        },
    }
    Ok(coerced)
}

/// Resolve the effective value of an attribute: the checked value when set,
/// the default when unset, `None` when unset without a default.
///
/// Computed-only attributes resolve to `None`; they are never user input.
pub(crate) fn resolve_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
) -> Result<Option<Value>, ReconcileError> {
    if attr.flags.is_computed_only() {
        return Ok(None);
    }
    match value.filter(|v| !v.is_empty()) {
        Some(v) => check_attribute(attr, v, path).map(Some),
        None => match &attr.default {
            Some(default) => Ok(Some(default.clone())),
            None if attr.flags.required => Err(ReconcileError::missing(path)),
            None => Ok(None),
        },
    }
}

/// The elements of a nested block value. A bare map counts as one element.
pub(crate) fn block_elements(
    value: Option<&Value>,
    path: &str,
) -> Result<Vec<ConfigValue>, ReconcileError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Map(map)) if map.is_empty() => Ok(Vec::new()),
        Some(Value::Map(map)) => Ok(vec![ConfigValue(map.clone())]),
        Some(Value::List(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Map(map) => Ok(ConfigValue(map.clone())),
                other => Err(ReconcileError::validation(
                    format!("{}.{}", path, i),
                    format!("must be a block, got {}", other.type_name()),
                )),
            })
            .collect(),
        Some(other) => Err(ReconcileError::validation(
            path,
            format!("must be a list of blocks, got {}", other.type_name()),
        )),
    }
}

/// Check the element count of a nested block.
pub(crate) fn check_block_count(
    nested: &NestedBlock,
    len: usize,
    path: &str,
) -> Result<(), ReconcileError> {
    if len == 0 && nested.min_items > 0 {
        return Err(ReconcileError::missing(path));
    }
    check_item_count(path, len, nested.min_items, nested.max_items)
}

/// Every exactly-one-of and at-least-one-of violation in a block.
pub(crate) fn group_violations(
    block: &Block,
    config: &ConfigValue,
    path: &str,
) -> Vec<ReconcileError> {
    let mut errors = Vec::new();
    for group in &block.exactly_one_of {
        let set: Vec<String> = group
            .iter()
            .filter(|name| config.is_set(name))
            .map(|name| join_path(path, name))
            .collect();
        match set.len() {
            1 => {},
            0 => errors.push(ReconcileError::MissingField {
                fields: group.iter().map(|name| join_path(path, name)).collect(),
            }),
            _ => errors.push(ReconcileError::ConflictingFields { fields: set }),
        }
    }
    for group in &block.at_least_one_of {
        if !group.iter().any(|name| config.is_set(name)) {
            errors.push(ReconcileError::MissingField {
                fields: group.iter().map(|name| join_path(path, name)).collect(),
            });
        }
    }
    errors
}

/// Validate a configuration against a schema.
///
/// Returns every problem found; an empty list means the configuration is
/// valid. Use of deprecated attributes is reported as a warning.
pub fn validate(schema: &Schema, config: &ConfigValue) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, config, "", &mut diagnostics);
    diagnostics
}

/// Like [`validate`], but only errors fail; warnings are dropped on success.
pub fn validate_result(schema: &Schema, config: &ConfigValue) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, config);
    if diagnostics.iter().any(Diagnostic::is_error) {
        Err(diagnostics)
    } else {
        Ok(())
    }
}

/// Whether the configuration has no validation errors.
pub fn is_valid(schema: &Schema, config: &ConfigValue) -> bool {
    !validate(schema, config).iter().any(Diagnostic::is_error)
}

fn validate_block(
    block: &Block,
    config: &ConfigValue,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        let value = config.get(name);
        if let Err(err) = resolve_attribute(attr, value, &attr_path) {
            diagnostics.push(err.into());
        }
        if let Some(message) = &attr.deprecated {
            if config.is_set(name) {
                diagnostics.push(
                    Diagnostic::warning("Deprecated attribute")
                        .with_detail(message.clone())
                        .with_attribute(attr_path),
                );
            }
        }
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        let elements = match block_elements(config.get(name), &block_path) {
            Ok(elements) => elements,
            Err(err) => {
                diagnostics.push(err.into());
                continue;
            },
        };
        if let Err(err) = check_block_count(nested, elements.len(), &block_path) {
            diagnostics.push(err.into());
        }
        for (i, element) in elements.iter().enumerate() {
            let element_path = format!("{}.{}", block_path, i);
            validate_block(&nested.block, element, &element_path, diagnostics);
        }
    }

    diagnostics.extend(
        group_violations(block, config, path)
            .into_iter()
            .map(Diagnostic::from),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DiagnosticSeverity;

    fn in_slice(values: &[&str]) -> Validator {
        Validator::StringInSlice {
            values: values.iter().map(|s| s.to_string()).collect(),
            ignore_case: false,
        }
    }

    fn assert_field_error(result: Result<(), ReconcileError>, field: &str) {
        match result {
            Err(ReconcileError::Validation { field: f, .. }) => assert_eq!(f, field),
            other => panic!("expected validation error on {}, got {:?}", field, other),
        }
    }

    #[test]
    fn test_string_in_slice() {
        let v = in_slice(&["Actual", "Forecasted"]);
        assert!(v.check("threshold_type", &Value::from("Actual")).is_ok());
        assert_field_error(v.check("threshold_type", &Value::from("actual")), "threshold_type");

        let insensitive = Validator::StringInSlice {
            values: vec!["Actual".into()],
            ignore_case: true,
        };
        assert!(insensitive.check("x", &Value::from("ACTUAL")).is_ok());
    }

    #[test]
    fn test_int_between() {
        let v = Validator::IntBetween { min: 0, max: 1000 };
        assert!(v.check("threshold", &Value::Int(0)).is_ok());
        assert!(v.check("threshold", &Value::Int(1000)).is_ok());
        assert_field_error(v.check("threshold", &Value::Int(-1)), "threshold");
        assert_field_error(v.check("threshold", &Value::Int(1001)), "threshold");
        assert_field_error(v.check("threshold", &Value::from("ten")), "threshold");
        assert!(v.check("threshold", &Value::Float(500.0)).is_ok());
        assert_field_error(v.check("threshold", &Value::Float(1e19)), "threshold");
        assert_field_error(v.check("threshold", &Value::Float(-1e19)), "threshold");
    }

    #[test]
    fn test_float_at_least() {
        let v = Validator::FloatAtLeast(1.0);
        assert!(v.check("amount", &Value::Float(1.0)).is_ok());
        assert!(v.check("amount", &Value::Int(500)).is_ok());
        assert_field_error(v.check("amount", &Value::Float(0.99)), "amount");
        assert_field_error(v.check("amount", &Value::Float(f64::NAN)), "amount");
        assert_field_error(v.check("amount", &Value::Float(f64::INFINITY)), "amount");
    }

    #[test]
    fn test_uuid_and_dates() {
        assert!(Validator::IsUuid
            .check("subscription_id", &Value::from("12345678-1234-9876-4563-123456789012"))
            .is_ok());
        assert!(Validator::IsUuid.check("subscription_id", &Value::from("nope")).is_err());

        assert!(Validator::IsRfc3339Time
            .check("end_date", &Value::from("2023-05-17T00:00:00Z"))
            .is_ok());
        assert!(Validator::IsRfc3339Time.check("end_date", &Value::from("2023-05-17")).is_err());

        assert!(Validator::BudgetStartDate
            .check("start_date", &Value::from("2022-06-01T00:00:00Z"))
            .is_ok());
        assert!(Validator::BudgetStartDate
            .check("start_date", &Value::from("2022-06-02T00:00:00Z"))
            .is_err());
    }

    #[test]
    fn test_name_validators() {
        assert!(Validator::BudgetName.check("name", &Value::from("my-budget_1")).is_ok());
        assert!(Validator::BudgetName.check("name", &Value::from("bad name")).is_err());
        assert!(Validator::BudgetName.check("name", &Value::from("a".repeat(64))).is_err());

        assert!(Validator::DataFactoryName.check("n", &Value::from("my-factory")).is_ok());
        assert!(Validator::DataFactoryName.check("n", &Value::from("ab")).is_err());
        assert!(Validator::DataFactoryName.check("n", &Value::from("bad--name")).is_err());

        assert!(Validator::LinkedServiceName.check("n", &Value::from("_synapse1")).is_ok());
        assert!(Validator::LinkedServiceName.check("n", &Value::from("-bad")).is_err());
        assert!(Validator::LinkedServiceName.check("n", &Value::from("a.b")).is_err());

        assert!(Validator::ResourceGroupName.check("rg", &Value::from("my_rg-(1)")).is_ok());
        assert!(Validator::ResourceGroupName.check("rg", &Value::from("rg.")).is_err());
        assert!(Validator::ResourceGroupName.check("rg", &Value::from("a/b")).is_err());
    }

    #[test]
    fn test_id_validators() {
        let rg = "/subscriptions/12345678-1234-9876-4563-123456789012/resourceGroups/rg1";
        assert!(Validator::ResourceGroupId.check("resource_group_id", &Value::from(rg)).is_ok());
        assert_field_error(
            Validator::ResourceGroupId.check("resource_group_id", &Value::from("/nope")),
            "resource_group_id",
        );
        assert!(Validator::ManagementGroupId
            .check("id", &Value::from("/providers/Microsoft.Management/managementGroups/mg"))
            .is_ok());
        assert!(Validator::DataFactoryId
            .check(
                "data_factory_id",
                &Value::from(format!("{}/providers/Microsoft.DataFactory/factories/df", rg))
            )
            .is_ok());
    }

    #[test]
    fn test_coerce() {
        assert_eq!(
            coerce(&AttributeType::Float64, &Value::Int(100), "amount").unwrap(),
            Value::Float(100.0)
        );
        assert_eq!(
            coerce(&AttributeType::Int64, &Value::from("42"), "threshold").unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            coerce(&AttributeType::Bool, &Value::from("false"), "enabled").unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            coerce(&AttributeType::String, &Value::Int(7), "name").unwrap(),
            Value::from("7")
        );
        assert!(coerce(&AttributeType::Bool, &Value::from("yes"), "enabled").is_err());
        assert!(coerce(&AttributeType::String, &Value::List(vec![]), "name").is_err());
    }

    #[test]
    fn test_coerce_rejects_inexact_numbers() {
        for raw in ["NaN", "inf", "-infinity"] {
            let result = coerce(&AttributeType::Float64, &Value::from(raw), "amount");
            assert_field_error(result.map(drop), "amount");
        }
        let result = coerce(&AttributeType::Float64, &Value::Float(f64::NAN), "amount");
        assert_field_error(result.map(drop), "amount");
        assert_eq!(
            coerce(&AttributeType::Float64, &Value::from(" 250.5 "), "amount").unwrap(),
            Value::Float(250.5)
        );

        assert_eq!(
            coerce(&AttributeType::Int64, &Value::Float(90.0), "threshold").unwrap(),
            Value::Int(90)
        );
        assert!(coerce(&AttributeType::Int64, &Value::Float(1e19), "threshold").is_err());
        assert!(coerce(&AttributeType::Int64, &Value::Float(90.5), "threshold").is_err());
    }

    #[test]
    fn test_coerce_set_normalises() {
        let set = AttributeType::set(AttributeType::String);
        let a = coerce(&set, &Value::strings(["b", "a", "b"]), "x").unwrap();
        let b = coerce(&set, &Value::strings(["a", "b"]), "x").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_list().unwrap().len(), 2);
    }

    #[test]
    fn test_check_attribute_applies_validators_per_element() {
        let attr = Attribute::required_string_list()
            .with_min_items(1)
            .with_validator(Validator::StringIsNotEmpty);

        assert!(check_attribute(&attr, &Value::strings(["a", "b"]), "values").is_ok());
        match check_attribute(&attr, &Value::strings(["a", ""]), "values") {
            Err(ReconcileError::Validation { field, .. }) => assert_eq!(field, "values.1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolve_attribute() {
        let attr = Attribute::optional_string().with_default("Monthly");
        assert_eq!(
            resolve_attribute(&attr, None, "time_grain").unwrap(),
            Some(Value::from("Monthly"))
        );
        assert_eq!(
            resolve_attribute(&attr, Some(&Value::from("")), "time_grain").unwrap(),
            Some(Value::from("Monthly"))
        );

        let required = Attribute::required_string();
        assert!(matches!(
            resolve_attribute(&required, None, "name"),
            Err(ReconcileError::MissingField { .. })
        ));

        let computed = Attribute::computed_string();
        assert_eq!(
            resolve_attribute(&computed, Some(&Value::from("x")), "etag").unwrap(),
            None
        );
    }

    fn filter_schema() -> Schema {
        let predicate = Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "values",
                Attribute::required_string_list().with_min_items(1),
            );
        let not = Block::new()
            .with_block("dimension", NestedBlock::list(predicate.clone()).with_max_items(1))
            .with_block("tag", NestedBlock::list(predicate.clone()).with_max_items(1))
            .with_exactly_one_of(["dimension", "tag"]);
        let filter = Block::new()
            .with_block("tag", NestedBlock::set(predicate))
            .with_block("not", NestedBlock::list(not).with_max_items(1))
            .with_at_least_one_of(["tag", "not"]);
        Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_block("filter", NestedBlock::list(filter).with_max_items(1))
    }

    fn predicate(name: &str) -> Value {
        Value::block(
            ConfigValue::new()
                .with("name", name)
                .with("values", Value::strings(["x"])),
        )
    }

    #[test]
    fn test_validate_valid_config() {
        let config = ConfigValue::new().with("name", "b").with(
            "filter",
            Value::block(ConfigValue::new().with("tag", predicate("env"))),
        );
        assert!(validate(&filter_schema(), &config).is_empty());
        assert!(is_valid(&filter_schema(), &config));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let not = ConfigValue::new()
            .with("dimension", predicate("ResourceId"))
            .with("tag", predicate("env"));
        let config = ConfigValue::new().with(
            "filter",
            Value::block(ConfigValue::new().with("not", Value::block(not))),
        );

        let diagnostics = validate(&filter_schema(), &config);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics
            .iter()
            .any(|d| d.summary == "Missing required attribute" && d.attribute.as_deref() == Some("name")));
        assert!(diagnostics.iter().any(|d| d.summary == "Conflicting attributes"
            && d.attribute.as_deref() == Some("filter.0.not.0.dimension")));
        assert!(validate_result(&filter_schema(), &config).is_err());
    }

    #[test]
    fn test_validate_at_least_one_of() {
        let config = ConfigValue::new()
            .with("name", "b")
            .with("filter", Value::block(ConfigValue::new()));
        let diagnostics = validate(&filter_schema(), &config);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("filter.0.tag".to_string()));
    }

    #[test]
    fn test_validate_block_max_items() {
        let filter = ConfigValue::new().with("tag", predicate("env"));
        let config = ConfigValue::new().with("name", "b").with(
            "filter",
            Value::List(vec![filter.clone().into(), filter.into()]),
        );
        let diagnostics = validate(&filter_schema(), &config);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("filter".to_string()));
    }

    #[test]
    fn test_validate_deprecated_is_warning() {
        let schema = Schema::v0().with_attribute(
            "data_factory_name",
            Attribute::optional_string().deprecated("use data_factory_id"),
        );
        let config = ConfigValue::new().with("data_factory_name", "df");
        let diagnostics = validate(&schema, &config);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Warning);
        assert!(validate_result(&schema, &config).is_ok());
    }

    #[test]
    fn test_validate_type_mismatch() {
        let schema = Schema::v0().with_attribute("enabled", Attribute::optional_bool());
        let config = ConfigValue::new().with("enabled", "maybe");
        let diagnostics = validate(&schema, &config);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("enabled".to_string()));
    }

    #[test]
    fn test_validator_serde() {
        let v = Validator::IntBetween { min: 0, max: 1000 };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, serde_json::json!({"int_between": {"min": 0, "max": 1000}}));
        let back: Validator = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }
}
