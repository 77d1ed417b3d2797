//! Managed identity blocks.
//!
//! The `identity` block selects system and/or user assigned identities. On
//! the wire it is an object holding `type` and a map of user assigned identity
//! ids to empty objects. Principal and tenant ids are returned by the API but
//! must never be sent back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::ids::UserAssignedIdentityId;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, NestedBlock};
use crate::validation::{coerce, Validator};
use crate::value::{ConfigValue, Value};

/// Which identities are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdentityType {
    /// No managed identity.
    #[default]
    None,
    /// The resource's own identity.
    SystemAssigned,
    /// One or more standalone identities.
    UserAssigned,
    /// Both of the above.
    SystemAssignedUserAssigned,
}

impl IdentityType {
    /// Every accepted type, in wire spelling.
    pub const ALL: [IdentityType; 4] = [
        IdentityType::None,
        IdentityType::SystemAssigned,
        IdentityType::UserAssigned,
        IdentityType::SystemAssignedUserAssigned,
    ];

    /// The wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::SystemAssigned => "SystemAssigned",
            Self::UserAssigned => "UserAssigned",
            Self::SystemAssignedUserAssigned => "SystemAssigned, UserAssigned",
        }
    }

    /// Whether user assigned identities may be attached.
    pub fn has_user_assigned(&self) -> bool {
        matches!(self, Self::UserAssigned | Self::SystemAssignedUserAssigned)
    }
}

impl fmt::Display for IdentityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityType {
    type Err = ReconcileError;

    /// Case-insensitive; spaces around the comma are optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().replace(' ', "").eq_ignore_ascii_case(&compact))
            .ok_or_else(|| {
                ReconcileError::validation(
                    "type",
                    format!(
                        "must be one of [{}], got {:?}",
                        Self::ALL.map(|t| t.as_str()).join(", "),
                        s
                    ),
                )
            })
    }
}

impl Serialize for IdentityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IdentityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A managed identity as exchanged with the API.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    /// Which identities are enabled.
    pub identity_type: IdentityType,
    /// Set by the API for system assigned identities.
    pub principal_id: Option<String>,
    /// Set by the API for system assigned identities.
    pub tenant_id: Option<String>,
    /// User assigned identity ids.
    pub identity_ids: BTreeSet<String>,
}

impl Identity {
    /// An identity with the given type and no user assigned ids.
    pub fn new(identity_type: IdentityType) -> Self {
        Self {
            identity_type,
            ..Default::default()
        }
    }

    /// Attach user assigned identity ids.
    pub fn with_identity_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity_ids.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Only `type` and `userAssignedIdentities` are ever sent.
impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let empty = serde_json::Map::new();
        let ids: BTreeMap<&str, &serde_json::Map<String, serde_json::Value>> =
            if self.identity_type == IdentityType::None {
                BTreeMap::new()
            } else {
                self.identity_ids.iter().map(|id| (id.as_str(), &empty)).collect()
            };

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", &self.identity_type)?;
        map.serialize_entry("userAssignedIdentities", &ids)?;
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityWire {
    #[serde(rename = "type", default)]
    identity_type: Option<IdentityType>,
    #[serde(default)]
    principal_id: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    user_assigned_identities: Option<BTreeMap<String, serde_json::Value>>,
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = IdentityWire::deserialize(deserializer)?;
        Ok(Self {
            identity_type: wire.identity_type.unwrap_or_default(),
            principal_id: wire.principal_id.filter(|s| !s.is_empty()),
            tenant_id: wire.tenant_id.filter(|s| !s.is_empty()),
            identity_ids: wire
                .user_assigned_identities
                .map(|ids| ids.into_keys().collect())
                .unwrap_or_default(),
        })
    }
}

/// The `identity` block schema: a single optional block.
pub fn schema() -> NestedBlock {
    let types = IdentityType::ALL
        .iter()
        .filter(|t| **t != IdentityType::None)
        .map(|t| t.as_str().to_string())
        .collect();
    NestedBlock::single(
        Block::new()
            .with_attribute(
                "type",
                Attribute::required_string().with_validator(Validator::StringInSlice {
                    values: types,
                    ignore_case: false,
                }),
            )
            .with_attribute(
                "identity_ids",
                Attribute::new(
                    AttributeType::set(AttributeType::String),
                    AttributeFlags::optional(),
                )
                .with_validator(Validator::UserAssignedIdentityId),
            )
            .with_attribute("principal_id", Attribute::computed_string())
            .with_attribute("tenant_id", Attribute::computed_string()),
    )
    .custom_wire()
}

/// Expand the `identity` block value.
///
/// An unset block means no identity. `identity_ids` may only be non-empty
/// when the type includes `UserAssigned`.
pub fn expand(value: &Value) -> Result<Identity, ReconcileError> {
    let block = match value {
        Value::List(items) => items.first().and_then(Value::as_map),
        Value::Map(map) => Some(map),
        _ => None,
    };
    let Some(block) = block.filter(|b| !b.is_empty()) else {
        return Ok(Identity::new(IdentityType::None));
    };
    let block = ConfigValue(block.clone());

    let identity_type = block
        .get_str("type")
        .ok_or_else(|| ReconcileError::missing("identity.0.type"))?
        .parse::<IdentityType>()
        .map_err(|err| match err {
            ReconcileError::Validation { constraint, .. } => {
                ReconcileError::validation("identity.0.type", constraint)
            },
            other => other,
        })?;

    let mut identity_ids = BTreeSet::new();
    if let Some(raw) = block.get_set("identity_ids") {
        let ids = coerce(
            &AttributeType::set(AttributeType::String),
            raw,
            "identity.0.identity_ids",
        )?;
        for (i, id) in ids.as_list().unwrap_or(&[]).iter().enumerate() {
            let field = format!("identity.0.identity_ids.{}", i);
            Validator::UserAssignedIdentityId.check(&field, id)?;
            if let Some(id) = id.as_str() {
                identity_ids.insert(id.to_string());
            }
        }
    }

    if !identity_ids.is_empty() && !identity_type.has_user_assigned() {
        return Err(ReconcileError::InvalidCombination {
            field: "identity.0.identity_ids".to_string(),
            reason: format!(
                "can only be specified when `type` includes {:?}",
                IdentityType::UserAssigned.as_str()
            ),
        });
    }

    Ok(Identity {
        identity_type,
        principal_id: None,
        tenant_id: None,
        identity_ids,
    })
}

/// Flatten an identity returned by the API into the `identity` block value.
///
/// An absent identity or type `None` is an empty block list. Identity ids are
/// parsed case-insensitively and rendered canonically, in sorted order.
pub fn flatten(input: Option<&Identity>) -> Result<Value, ReconcileError> {
    let Some(identity) = input.filter(|i| i.identity_type != IdentityType::None) else {
        return Ok(Value::List(Vec::new()));
    };

    let ids = identity
        .identity_ids
        .iter()
        .map(|raw| UserAssignedIdentityId::parse_insensitively(raw).map(|id| id.to_string()))
        .collect::<Result<BTreeSet<_>, _>>()?;

    let mut block = ConfigValue::new().with("type", identity.identity_type.as_str());
    if !ids.is_empty() {
        block.insert("identity_ids", Value::strings(ids));
    }
    if let Some(principal_id) = &identity.principal_id {
        block.insert("principal_id", principal_id.clone());
    }
    if let Some(tenant_id) = &identity.tenant_id {
        block.insert("tenant_id", tenant_id.clone());
    }
    Ok(Value::block(block))
}
