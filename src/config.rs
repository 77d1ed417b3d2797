//! Provider configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::schema::{Attribute, Schema};
use crate::validation::Validator;
use crate::value::Value;

/// Environment variable holding the default subscription.
pub const SUBSCRIPTION_ID_ENV: &str = "ARM_SUBSCRIPTION_ID";

/// Per-operation deadlines, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Deadline for create.
    #[serde(default = "default_write_timeout")]
    pub create: u64,
    /// Deadline for read and import.
    #[serde(default = "default_read_timeout")]
    pub read: u64,
    /// Deadline for update.
    #[serde(default = "default_write_timeout")]
    pub update: u64,
    /// Deadline for delete.
    #[serde(default = "default_write_timeout")]
    pub delete: u64,
}

fn default_write_timeout() -> u64 {
    30 * 60
}

fn default_read_timeout() -> u64 {
    5 * 60
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: default_write_timeout(),
            read: default_read_timeout(),
            update: default_write_timeout(),
            delete: default_write_timeout(),
        }
    }
}

impl Timeouts {
    /// Deadline for create.
    pub fn create(&self) -> Duration {
        Duration::from_secs(self.create)
    }

    /// Deadline for read and import.
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read)
    }

    /// Deadline for update.
    pub fn update(&self) -> Duration {
        Duration::from_secs(self.update)
    }

    /// Deadline for delete.
    pub fn delete(&self) -> Duration {
        Duration::from_secs(self.delete)
    }
}

/// Settings shared by every resource the provider manages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Subscription used to derive ids that do not name one explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// Operation deadlines.
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl ProviderConfig {
    /// Create a configuration with default timeouts and no subscription.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subscription.
    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    /// Set the timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Read a configuration from its JSON form. `null` yields the defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ReconcileError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| ReconcileError::Configuration(e.to_string()))
    }

    /// Fill the subscription from `ARM_SUBSCRIPTION_ID` when it is not set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.subscription_id.is_none() {
            self.subscription_id = lookup(SUBSCRIPTION_ID_ENV).filter(|s| !s.is_empty());
        }
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        if let Some(subscription_id) = &self.subscription_id {
            Validator::IsUuid
                .check("subscription_id", &Value::from(subscription_id.as_str()))
                .map_err(|e| ReconcileError::Configuration(e.to_string()))?;
        }
        let timeouts = [
            ("create", self.timeouts.create),
            ("read", self.timeouts.read),
            ("update", self.timeouts.update),
            ("delete", self.timeouts.delete),
        ];
        for (operation, secs) in timeouts {
            if secs == 0 {
                return Err(ReconcileError::Configuration(format!(
                    "timeouts.{} must be greater than zero",
                    operation
                )));
            }
        }
        Ok(())
    }

    /// The subscription, or a configuration error naming what needed it.
    pub fn require_subscription_id(&self, needed_by: &str) -> Result<&str, ReconcileError> {
        self.subscription_id.as_deref().ok_or_else(|| {
            ReconcileError::Configuration(format!(
                "a subscription id is required to resolve `{}`; set it in the provider \
                 configuration or {}",
                needed_by, SUBSCRIPTION_ID_ENV
            ))
        })
    }

    /// Schema describing the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0().with_attribute(
            "subscription_id",
            Attribute::optional_string().with_validator(Validator::IsUuid),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SUB: &str = "12345678-1234-9876-4563-123456789012";

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::from_value(serde_json::Value::Null).unwrap();
        assert_eq!(config.subscription_id, None);
        assert_eq!(config.timeouts.create(), Duration::from_secs(1800));
        assert_eq!(config.timeouts.read(), Duration::from_secs(300));
        assert_eq!(config.timeouts.update(), Duration::from_secs(1800));
        assert_eq!(config.timeouts.delete(), Duration::from_secs(1800));
    }

    #[test]
    fn test_from_value() {
        let config = ProviderConfig::from_value(json!({
            "subscription_id": SUB,
            "timeouts": {"read": 10}
        }))
        .unwrap();
        assert_eq!(config.subscription_id.as_deref(), Some(SUB));
        assert_eq!(config.timeouts.read, 10);
        assert_eq!(config.timeouts.create, 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_value_rejects_bad_shape() {
        let result = ProviderConfig::from_value(json!({"timeouts": "soon"}));
        assert!(matches!(result, Err(ReconcileError::Configuration(_))));
    }

    #[test]
    fn test_env_override_only_fills_missing() {
        let lookup = |key: &str| (key == SUBSCRIPTION_ID_ENV).then(|| SUB.to_string());

        let config = ProviderConfig::new().with_overrides_from(lookup);
        assert_eq!(config.subscription_id.as_deref(), Some(SUB));

        let explicit = ProviderConfig::new()
            .with_subscription_id("00000000-0000-0000-0000-000000000000")
            .with_overrides_from(lookup);
        assert_eq!(
            explicit.subscription_id.as_deref(),
            Some("00000000-0000-0000-0000-000000000000")
        );

        let empty = ProviderConfig::new().with_overrides_from(|_| Some(String::new()));
        assert_eq!(empty.subscription_id, None);
    }

    #[test]
    fn test_validate() {
        let bad = ProviderConfig::new().with_subscription_id("not-a-uuid");
        assert!(matches!(bad.validate(), Err(ReconcileError::Configuration(_))));

        let zero = ProviderConfig::new().with_timeouts(Timeouts {
            read: 0,
            ..Timeouts::default()
        });
        match zero.validate() {
            Err(ReconcileError::Configuration(message)) => assert!(message.contains("read")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_require_subscription_id() {
        let config = ProviderConfig::new();
        assert!(config.require_subscription_id("data_factory_name").is_err());
        let config = config.with_subscription_id(SUB);
        assert_eq!(config.require_subscription_id("data_factory_name").unwrap(), SUB);
    }
}
