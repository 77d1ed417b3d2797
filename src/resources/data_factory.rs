//! `azurerm_data_factory`: the factory that linked services live in.

use serde_json::{json, Map};

use crate::config::ProviderConfig;
use crate::error::ReconcileError;
use crate::expand::{self, normalize};
use crate::flatten::{self, Flattened};
use crate::identity::{self, Identity, IdentityType};
use crate::ids::DataFactoryId;
use crate::resources::{id_segment, Resource};
use crate::schema::{Attribute, DiffSuppress, Schema};
use crate::validation::Validator;
use crate::value::ConfigValue;

const PUBLIC_NETWORK_ENABLED: &str = "Enabled";
const PUBLIC_NETWORK_DISABLED: &str = "Disabled";

/// The data factory resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataFactoryResource;

impl Resource for DataFactoryResource {
    fn type_name(&self) -> &'static str {
        "azurerm_data_factory"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute(
                "name",
                Attribute::required_string()
                    .path_only()
                    .with_validator(Validator::DataFactoryName),
            )
            .with_attribute(
                "resource_group_name",
                Attribute::required_string()
                    .path_only()
                    .with_validator(Validator::ResourceGroupName)
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute(
                "location",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::StringIsNotEmpty)
                    .with_diff_suppress(DiffSuppress::Location),
            )
            .with_block("identity", identity::schema())
            .with_attribute(
                "public_network_enabled",
                Attribute::optional_bool().with_default(true).custom_wire(),
            )
            .with_attribute(
                "tags",
                Attribute::optional_string_map().with_validator(Validator::StringIsNotEmpty),
            )
    }

    fn resource_id(
        &self,
        config: &ConfigValue,
        provider: &ProviderConfig,
    ) -> Result<String, ReconcileError> {
        let subscription_id = provider.require_subscription_id(self.type_name())?;
        let resource_group = id_segment(config, "resource_group_name")?;
        let name = id_segment(config, "name")?;
        Ok(DataFactoryId::new(subscription_id, resource_group, name).to_string())
    }

    fn expand(&self, config: &ConfigValue) -> Result<serde_json::Value, ReconcileError> {
        let schema = self.schema();
        let normalized = normalize(config, &schema.block)?;
        let mut body = match expand::expand(&normalized, &schema.block)? {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        };

        // an unset block is sent as type None
        let identity = match normalized.get("identity") {
            Some(block) => identity::expand(block)?,
            None => Identity::new(IdentityType::None),
        };
        body.insert("identity".to_string(), serde_json::to_value(&identity)?);

        let public_network = match normalized
            .get("public_network_enabled")
            .and_then(|v| v.as_bool())
        {
            Some(false) => PUBLIC_NETWORK_DISABLED,
            _ => PUBLIC_NETWORK_ENABLED,
        };
        body.insert(
            "properties".to_string(),
            json!({ "publicNetworkAccess": public_network }),
        );

        Ok(serde_json::Value::Object(body))
    }

    fn flatten(&self, id: &str, response: &serde_json::Value) -> Result<Flattened, ReconcileError> {
        let factory_id = DataFactoryId::parse_insensitively(id)?;
        let mut flattened = flatten::flatten(response, &self.schema().block)?;
        let config = &mut flattened.config;
        config.insert("name", factory_id.factory_name);
        config.insert("resource_group_name", factory_id.resource_group);

        let identity = match response.get("identity") {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<Identity>(raw.clone())?),
        };
        let block = identity::flatten(identity.as_ref())?;
        if !block.is_empty() {
            config.insert("identity", block);
        }

        let public_network = response
            .get("properties")
            .and_then(|p| p.get("publicNetworkAccess"))
            .and_then(serde_json::Value::as_str);
        config.insert(
            "public_network_enabled",
            !public_network.is_some_and(|v| v.eq_ignore_ascii_case(PUBLIC_NETWORK_DISABLED)),
        );

        Ok(flattened)
    }

    fn importer_check(&self, id: &str) -> Result<(), ReconcileError> {
        DataFactoryId::parse(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::plan;
    use crate::value::Value;

    const SUB: &str = "12345678-1234-9876-4563-123456789012";
    const IDENTITY: &str = "/subscriptions/12345678-1234-9876-4563-123456789012/resourceGroups/rg1/providers/Microsoft.ManagedIdentity/userAssignedIdentities/id1";

    fn id() -> String {
        DataFactoryId::new(SUB, "rg1", "df1").to_string()
    }

    fn identity(identity_type: &str, ids: &[&str]) -> Value {
        let mut block = ConfigValue::new().with("type", identity_type);
        if !ids.is_empty() {
            block.insert("identity_ids", Value::strings(ids.iter().copied()));
        }
        Value::block(block)
    }

    fn config() -> ConfigValue {
        ConfigValue::new()
            .with("name", "df1")
            .with("resource_group_name", "rg1")
            .with("location", "West Europe")
            .with("identity", identity("SystemAssigned, UserAssigned", &[IDENTITY]))
            .with(
                "tags",
                Value::Map([("env".to_string(), Value::from("test"))].into_iter().collect()),
            )
    }

    #[test]
    fn test_resource_id_needs_subscription() {
        assert!(matches!(
            DataFactoryResource.resource_id(&config(), &ProviderConfig::new()),
            Err(ReconcileError::Configuration(_))
        ));
        let provider = ProviderConfig::new().with_subscription_id(SUB);
        assert_eq!(DataFactoryResource.resource_id(&config(), &provider).unwrap(), id());
    }

    #[test]
    fn test_resource_id_rejects_nested_name() {
        let provider = ProviderConfig::new().with_subscription_id(SUB);
        let config = config().with("name", "df1/linkedservices/ls1");
        match DataFactoryResource.resource_id(&config, &provider) {
            Err(ReconcileError::Validation { field, .. }) => assert_eq!(field, "name"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_expand_body() {
        let body = DataFactoryResource.expand(&config()).unwrap();
        assert_eq!(body["location"], json!("West Europe"));
        assert_eq!(body["identity"]["type"], json!("SystemAssigned, UserAssigned"));
        assert_eq!(body["identity"]["userAssignedIdentities"][IDENTITY], json!({}));
        assert!(body["identity"].get("principalId").is_none());
        assert_eq!(body["properties"], json!({"publicNetworkAccess": "Enabled"}));
        assert_eq!(body["tags"], json!({"env": "test"}));
        assert!(body.get("name").is_none());
        assert!(body.get("resourceGroupName").is_none());
    }

    #[test]
    fn test_expand_public_network_disabled() {
        let config = config().with("public_network_enabled", false);
        let body = DataFactoryResource.expand(&config).unwrap();
        assert_eq!(body["properties"]["publicNetworkAccess"], json!("Disabled"));
        assert!(body.get("publicNetworkEnabled").is_none());
    }

    #[test]
    fn test_expand_without_identity() {
        let mut config = config();
        config.remove("identity");
        let body = DataFactoryResource.expand(&config).unwrap();
        assert_eq!(
            body["identity"],
            json!({"type": "None", "userAssignedIdentities": {}})
        );
    }

    #[test]
    fn test_removing_identity_sends_none() {
        let resource = DataFactoryResource;
        let response = json!({
            "location": "westeurope",
            "identity": {
                "type": "SystemAssigned",
                "principalId": "00000000-0000-0000-0000-000000000001",
                "tenantId": "00000000-0000-0000-0000-000000000002"
            },
            "properties": {"publicNetworkAccess": "Enabled"}
        });
        let observed = resource.flatten(&id(), &response).unwrap().config;
        let mut desired = config();
        desired.remove("identity");

        let result = plan(&desired, &observed, &resource.schema()).unwrap();
        assert!(!result.is_noop());
        assert!(!result.requires_replace());

        let body = resource.expand(&result.planned_state).unwrap();
        assert_eq!(body["identity"]["type"], json!("None"));

        let mut echoed = body.clone();
        echoed["location"] = json!("westeurope");
        let cleared = resource.flatten(&id(), &echoed).unwrap().config;
        assert!(cleared.get("identity").is_none());
        assert!(plan(&desired, &cleared, &resource.schema()).unwrap().is_noop());
    }

    #[test]
    fn test_expand_rejects_ids_without_user_assigned() {
        let config = config().with("identity", identity("SystemAssigned", &[IDENTITY]));
        assert!(matches!(
            DataFactoryResource.expand(&config),
            Err(ReconcileError::InvalidCombination { .. })
        ));
    }

    #[test]
    fn test_expand_user_assigned_without_ids() {
        let config = config().with("identity", identity("UserAssigned", &[]));
        let body = DataFactoryResource.expand(&config).unwrap();
        assert_eq!(
            body["identity"],
            json!({"type": "UserAssigned", "userAssignedIdentities": {}})
        );
    }

    #[test]
    fn test_flatten_response() {
        let mut response = json!({
            "id": id(),
            "name": "df1",
            "location": "westeurope",
            "identity": {
                "type": "SystemAssigned,UserAssigned",
                "principalId": "00000000-0000-0000-0000-000000000001",
                "tenantId": "00000000-0000-0000-0000-000000000002",
                "userAssignedIdentities": {}
            },
            "properties": {"publicNetworkAccess": "Disabled", "provisioningState": "Succeeded"},
            "tags": {"env": "test"}
        });
        response["identity"]["userAssignedIdentities"][IDENTITY.to_lowercase()] =
            json!({"principalId": "x", "clientId": "y"});
        let flattened = DataFactoryResource.flatten(&id(), &response).unwrap();
        let state = flattened.config;
        assert_eq!(state.get_str("name"), Some("df1"));
        assert_eq!(state.get_str("resource_group_name"), Some("rg1"));
        assert_eq!(state.get_str("location"), Some("westeurope"));
        assert_eq!(state.get("public_network_enabled"), Some(&Value::Bool(false)));

        let identity = state.get_block("identity").unwrap();
        assert_eq!(identity.get_str("type"), Some("SystemAssigned, UserAssigned"));
        assert_eq!(identity.get("identity_ids"), Some(&Value::strings([IDENTITY])));
        assert_eq!(
            identity.get_str("principal_id"),
            Some("00000000-0000-0000-0000-000000000001")
        );
    }

    #[test]
    fn test_flatten_without_identity() {
        let response = json!({"location": "westeurope", "properties": {}});
        let state = DataFactoryResource.flatten(&id(), &response).unwrap().config;
        assert!(state.get("identity").is_none());
        assert_eq!(state.get("public_network_enabled"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_plan_after_read_is_noop() {
        let resource = DataFactoryResource;
        let mut response = resource.expand(&config()).unwrap();
        response["location"] = json!("westeurope");
        response["identity"]["principalId"] = json!("00000000-0000-0000-0000-000000000001");
        let observed = resource.flatten(&id(), &response).unwrap().config;

        let result = plan(&config(), &observed, &resource.schema()).unwrap();
        assert!(result.is_noop(), "unexpected changes {:?}", result.changes);
        let planned = result.planned_state.get_block("identity").unwrap();
        assert_eq!(
            planned.get_str("principal_id"),
            Some("00000000-0000-0000-0000-000000000001")
        );

        let moved = config().with("location", "North Europe");
        assert!(plan(&moved, &observed, &resource.schema())
            .unwrap()
            .requires_replace());
    }

    #[test]
    fn test_importer_check() {
        assert!(DataFactoryResource.importer_check(&id()).is_ok());
        assert!(DataFactoryResource
            .importer_check(&format!("{}/linkedservices/ls1", id()))
            .is_err());
    }
}
