//! `azurerm_data_factory_linked_service_synapse`: an Azure Synapse (SQL DW)
//! linked service inside a data factory.
//!
//! Linked services share one polymorphic API body discriminated by
//! `properties.type`; this resource only manages the `AzureSqlDW` variant
//! and refuses to read any other.

use std::collections::BTreeMap;

use serde_json::{json, Map};

use crate::config::ProviderConfig;
use crate::error::ReconcileError;
use crate::expand::{normalize, resolve_canonical};
use crate::flatten::{self, classify, Flattened};
use crate::ids::{self, DataFactoryId, LinkedServiceId};
use crate::resources::{id_segment, required_str, Resource};
use crate::schema::{Attribute, Block, DiffSuppress, NestedBlock, Schema};
use crate::validation::Validator;
use crate::value::{ConfigValue, Value};

/// Discriminant of the variant this resource manages.
pub const LINKED_SERVICE_TYPE: &str = "AzureSqlDW";

const KNOWN_PROPERTIES: [&str; 6] = [
    "type",
    "description",
    "connectVia",
    "parameters",
    "annotations",
    "typeProperties",
];

/// The Synapse linked service resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedServiceSynapseResource;

impl LinkedServiceSynapseResource {
    fn data_factory_id(
        &self,
        config: &ConfigValue,
        provider: &ProviderConfig,
    ) -> Result<DataFactoryId, ReconcileError> {
        let resolved = resolve_canonical(config, "data_factory_id", "data_factory_name", |name| {
            ids::check_segment("data_factory_name", name)?;
            let subscription_id = provider.require_subscription_id("data_factory_name")?;
            let resource_group = id_segment(config, "resource_group_name")?;
            Ok(DataFactoryId::new(subscription_id, resource_group, name).to_string())
        })?;
        DataFactoryId::parse(&resolved).map_err(|_| {
            ReconcileError::validation("data_factory_id", format!("{:?} is not a data factory id", resolved))
        })
    }
}

fn non_empty_string() -> Attribute {
    Attribute::optional_string().with_validator(Validator::StringIsNotEmpty)
}

fn type_properties_block() -> Block {
    Block::new().with_attribute("connection_string", Attribute::required_string().tolerant())
}

fn key_vault_password_block() -> Block {
    Block::new()
        .with_attribute(
            "linked_service_name",
            Attribute::required_string().with_validator(Validator::StringIsNotEmpty),
        )
        .with_attribute(
            "secret_name",
            Attribute::required_string().with_validator(Validator::StringIsNotEmpty),
        )
}

fn expand_key_vault_password(password: &ConfigValue) -> serde_json::Value {
    json!({
        "type": "AzureKeyVaultSecret",
        "store": {
            "referenceName": password.get_str("linked_service_name").unwrap_or_default(),
            "type": "LinkedServiceReference"
        },
        "secretName": password.get_str("secret_name").unwrap_or_default()
    })
}

fn flatten_key_vault_password(password: &serde_json::Value) -> Option<Value> {
    let linked_service_name = password
        .get("store")
        .and_then(|store| store.get("referenceName"))
        .and_then(serde_json::Value::as_str)?;
    let secret_name = password.get("secretName").and_then(serde_json::Value::as_str)?;
    Some(Value::block(
        ConfigValue::new()
            .with("linked_service_name", linked_service_name)
            .with("secret_name", secret_name),
    ))
}

fn string_map(json: Option<&serde_json::Value>) -> Map<String, serde_json::Value> {
    match json {
        Some(serde_json::Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

impl Resource for LinkedServiceSynapseResource {
    fn type_name(&self) -> &'static str {
        "azurerm_data_factory_linked_service_synapse"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute(
                "name",
                Attribute::required_string()
                    .path_only()
                    .with_validator(Validator::LinkedServiceName),
            )
            .with_attribute(
                "data_factory_name",
                Attribute::optional_string()
                    .computed()
                    .path_only()
                    .with_validator(Validator::DataFactoryName)
                    .deprecated(
                        "`data_factory_name` is deprecated in favour of `data_factory_id`",
                    ),
            )
            .with_attribute(
                "data_factory_id",
                Attribute::optional_string()
                    .computed()
                    .path_only()
                    .with_validator(Validator::DataFactoryId),
            )
            .with_exactly_one_of(["data_factory_id", "data_factory_name"])
            // the API returns it lower-cased
            .with_attribute(
                "resource_group_name",
                Attribute::required_string()
                    .path_only()
                    .with_validator(Validator::ResourceGroupName)
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute(
                "connection_string",
                Attribute::required_string()
                    .tolerant()
                    .with_validator(Validator::StringIsNotEmpty)
                    .with_diff_suppress(DiffSuppress::ConnectionString),
            )
            .with_block(
                "key_vault_password",
                NestedBlock::single(key_vault_password_block()).custom_wire(),
            )
            .with_attribute("description", non_empty_string())
            .with_attribute("integration_runtime_name", non_empty_string())
            .with_attribute(
                "parameters",
                Attribute::optional_string_map().with_validator(Validator::StringIsNotEmpty),
            )
            .with_attribute(
                "annotations",
                Attribute::optional_string_list().with_validator(Validator::StringIsNotEmpty),
            )
            .with_attribute(
                "additional_properties",
                Attribute::optional_string_map().with_validator(Validator::StringIsNotEmpty),
            )
    }

    fn resource_id(
        &self,
        config: &ConfigValue,
        provider: &ProviderConfig,
    ) -> Result<String, ReconcileError> {
        let factory = self.data_factory_id(config, provider)?;
        let name = id_segment(config, "name")?;
        Ok(LinkedServiceId::new(&factory, name).to_string())
    }

    fn expand(&self, config: &ConfigValue) -> Result<serde_json::Value, ReconcileError> {
        let config = normalize(config, &self.schema().block)?;

        let mut properties = Map::new();
        if let Some(additional) = config.get("additional_properties").and_then(Value::as_map) {
            for (key, value) in additional {
                properties.insert(key.clone(), value.to_json());
            }
        }
        properties.insert("type".to_string(), json!(LINKED_SERVICE_TYPE));
        if let Some(description) = config.get_str("description") {
            properties.insert("description".to_string(), json!(description));
        }
        if let Some(runtime) = config.get_str("integration_runtime_name") {
            properties.insert(
                "connectVia".to_string(),
                json!({"referenceName": runtime, "type": "IntegrationRuntimeReference"}),
            );
        }
        if let Some(parameters) = config.get("parameters").and_then(Value::as_map) {
            let parameters: Map<String, serde_json::Value> = parameters
                .iter()
                .map(|(name, value)| {
                    (name.clone(), json!({"type": "String", "defaultValue": value.to_json()}))
                })
                .collect();
            properties.insert("parameters".to_string(), serde_json::Value::Object(parameters));
        }
        if let Some(annotations) = config.get_set("annotations") {
            properties.insert("annotations".to_string(), annotations.to_json());
        }

        let mut type_properties = Map::new();
        type_properties.insert(
            "connectionString".to_string(),
            json!(required_str(&config, "connection_string")?),
        );
        if let Some(password) = config.get_block("key_vault_password") {
            type_properties.insert("password".to_string(), expand_key_vault_password(&password));
        }
        properties.insert(
            "typeProperties".to_string(),
            serde_json::Value::Object(type_properties),
        );

        Ok(json!({ "properties": properties }))
    }

    fn flatten(&self, id: &str, response: &serde_json::Value) -> Result<Flattened, ReconcileError> {
        let id = LinkedServiceId::parse(id)?;
        classify(response, "properties.type", LINKED_SERVICE_TYPE)?;
        let properties = string_map(response.get("properties"));

        let type_properties = properties
            .get("typeProperties")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let mut flattened = flatten::flatten(&type_properties, &type_properties_block())?;
        let config = &mut flattened.config;

        config.insert("name", id.name.clone());
        config.insert("resource_group_name", id.resource_group.clone());
        config.insert("data_factory_name", id.factory_name.clone());
        config.insert("data_factory_id", id.data_factory_id().to_string());

        if let Some(description) = properties.get("description").and_then(serde_json::Value::as_str) {
            if !description.is_empty() {
                config.insert("description", description);
            }
        }
        if let Some(runtime) = properties
            .get("connectVia")
            .and_then(|v| v.get("referenceName"))
            .and_then(serde_json::Value::as_str)
        {
            config.insert("integration_runtime_name", runtime);
        }

        let parameters: BTreeMap<String, Value> = string_map(properties.get("parameters"))
            .iter()
            .filter_map(|(name, parameter)| {
                let default = parameter.get("defaultValue").and_then(Value::from_json)?;
                Some((name.clone(), Value::string(default.to_string())))
            })
            .collect();
        if !parameters.is_empty() {
            config.insert("parameters", Value::Map(parameters));
        }

        if let Some(serde_json::Value::Array(annotations)) = properties.get("annotations") {
            let annotations: Vec<&str> =
                annotations.iter().filter_map(serde_json::Value::as_str).collect();
            if !annotations.is_empty() {
                config.insert("annotations", Value::strings(annotations));
            }
        }

        let additional: BTreeMap<String, Value> = properties
            .iter()
            .filter(|(key, _)| !KNOWN_PROPERTIES.contains(&key.as_str()))
            .filter_map(|(key, value)| {
                Value::from_json(value).map(|v| (key.clone(), Value::string(v.to_string())))
            })
            .collect();
        if !additional.is_empty() {
            config.insert("additional_properties", Value::Map(additional));
        }

        if let Some(password) = type_properties
            .get("password")
            .and_then(flatten_key_vault_password)
        {
            config.insert("key_vault_password", password);
        }

        Ok(flattened)
    }

    fn importer_check(&self, id: &str) -> Result<(), ReconcileError> {
        LinkedServiceId::parse(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::plan;
    use crate::schema::DiagnosticSeverity;
    use crate::validation::validate;

    const SUB: &str = "12345678-1234-9876-4563-123456789012";

    fn factory_id() -> String {
        format!(
            "/subscriptions/{}/resourceGroups/rg1/providers/Microsoft.DataFactory/factories/df1",
            SUB
        )
    }

    fn id() -> String {
        format!("{}/linkedservices/synapse1", factory_id())
    }

    fn config() -> ConfigValue {
        ConfigValue::new()
            .with("name", "synapse1")
            .with("resource_group_name", "rg1")
            .with("data_factory_id", factory_id())
            .with(
                "connection_string",
                "Integrated Security=False;Data Source=test;Initial Catalog=test;User ID=test;Password=test",
            )
            .with("description", "synapse")
            .with("integration_runtime_name", "ir1")
            .with("annotations", Value::strings(["a1", "a2"]))
            .with(
                "parameters",
                Value::Map([("env".to_string(), Value::from("prod"))].into_iter().collect()),
            )
            .with(
                "key_vault_password",
                Value::block(
                    ConfigValue::new()
                        .with("linked_service_name", "kv1")
                        .with("secret_name", "secret"),
                ),
            )
    }

    fn response(connection_string: serde_json::Value) -> serde_json::Value {
        json!({
            "id": id(),
            "name": "synapse1",
            "properties": {
                "type": "AzureSqlDW",
                "description": "synapse",
                "connectVia": {"referenceName": "ir1", "type": "IntegrationRuntimeReference"},
                "parameters": {"env": {"type": "String", "defaultValue": "prod"}},
                "annotations": ["a1", "a2"],
                "typeProperties": {
                    "connectionString": connection_string,
                    "password": {
                        "type": "AzureKeyVaultSecret",
                        "store": {"referenceName": "kv1", "type": "LinkedServiceReference"},
                        "secretName": "secret"
                    }
                }
            }
        })
    }

    #[test]
    fn test_resource_id_from_data_factory_id() {
        let id = LinkedServiceSynapseResource
            .resource_id(&config(), &ProviderConfig::new())
            .unwrap();
        assert_eq!(id, self::id());
    }

    #[test]
    fn test_resource_id_from_deprecated_name() {
        let mut config = config();
        config.remove("data_factory_id");
        config.insert("data_factory_name", "df1");

        assert!(matches!(
            LinkedServiceSynapseResource.resource_id(&config, &ProviderConfig::new()),
            Err(ReconcileError::Configuration(_))
        ));
        let provider = ProviderConfig::new().with_subscription_id(SUB);
        assert_eq!(
            LinkedServiceSynapseResource.resource_id(&config, &provider).unwrap(),
            id()
        );
    }

    #[test]
    fn test_resource_id_requires_a_factory() {
        let mut config = config();
        config.remove("data_factory_id");
        match LinkedServiceSynapseResource.resource_id(&config, &ProviderConfig::new()) {
            Err(ReconcileError::MissingField { fields }) => {
                assert_eq!(fields, vec!["data_factory_id", "data_factory_name"])
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_expand_body() {
        let body = LinkedServiceSynapseResource.expand(&config()).unwrap();
        let properties = &body["properties"];
        assert_eq!(properties["type"], json!("AzureSqlDW"));
        assert_eq!(properties["description"], json!("synapse"));
        assert_eq!(
            properties["connectVia"],
            json!({"referenceName": "ir1", "type": "IntegrationRuntimeReference"})
        );
        assert_eq!(
            properties["parameters"],
            json!({"env": {"type": "String", "defaultValue": "prod"}})
        );
        assert_eq!(properties["annotations"], json!(["a1", "a2"]));
        assert_eq!(
            properties["typeProperties"]["password"]["store"]["referenceName"],
            json!("kv1")
        );
        assert!(properties["typeProperties"]["connectionString"]
            .as_str()
            .unwrap()
            .starts_with("Integrated Security=False"));
        assert!(properties.get("name").is_none());
        assert!(properties.get("dataFactoryId").is_none());
    }

    #[test]
    fn test_expand_additional_properties() {
        let config = config().with(
            "additional_properties",
            Value::Map([("foo".to_string(), Value::from("bar"))].into_iter().collect()),
        );
        let body = LinkedServiceSynapseResource.expand(&config).unwrap();
        assert_eq!(body["properties"]["foo"], json!("bar"));

        let flattened = LinkedServiceSynapseResource.flatten(&id(), &body).unwrap();
        assert_eq!(
            flattened.config.get("additional_properties"),
            config.get("additional_properties")
        );
    }

    #[test]
    fn test_expand_rejects_both_factory_fields() {
        let config = config().with("data_factory_name", "df1");
        match LinkedServiceSynapseResource.expand(&config) {
            Err(ReconcileError::ConflictingFields { fields }) => {
                assert_eq!(fields, vec!["data_factory_id", "data_factory_name"])
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_flatten_sets_id_fields() {
        let flattened = LinkedServiceSynapseResource
            .flatten(&id(), &response(json!("Data Source=test")))
            .unwrap();
        let state = flattened.config;
        assert_eq!(state.get_str("name"), Some("synapse1"));
        assert_eq!(state.get_str("resource_group_name"), Some("rg1"));
        assert_eq!(state.get_str("data_factory_name"), Some("df1"));
        assert_eq!(state.get_str("data_factory_id"), Some(factory_id().as_str()));
        assert_eq!(state.get_str("connection_string"), Some("Data Source=test"));
        assert_eq!(state.get_str("integration_runtime_name"), Some("ir1"));
        assert_eq!(state.get("annotations"), Some(&Value::strings(["a1", "a2"])));
        assert!(state.get("additional_properties").is_none());
        let password = state.get_block("key_vault_password").unwrap();
        assert_eq!(password.get_str("secret_name"), Some("secret"));
        assert!(flattened.diagnostics.is_empty());
    }

    #[test]
    fn test_flatten_non_string_connection_string() {
        let reference = json!({
            "type": "AzureKeyVaultSecret",
            "store": {"referenceName": "kv1", "type": "LinkedServiceReference"},
            "secretName": "conn"
        });
        let flattened = LinkedServiceSynapseResource
            .flatten(&id(), &response(reference))
            .unwrap();
        assert_eq!(flattened.config.get("connection_string"), Some(&Value::from("")));
        assert_eq!(flattened.diagnostics.len(), 1);
        let diagnostic = &flattened.diagnostics[0];
        assert_eq!(diagnostic.severity, DiagnosticSeverity::Warning);
        assert_eq!(diagnostic.attribute.as_deref(), Some("connection_string"));
    }

    #[test]
    fn test_flatten_rejects_other_variant() {
        let mut body = response(json!("Data Source=test"));
        body["properties"]["type"] = json!("AzureBlobStorage");
        match LinkedServiceSynapseResource.flatten(&id(), &body) {
            Err(ReconcileError::UnexpectedVariant { expected, actual }) => {
                assert_eq!(expected, "AzureSqlDW");
                assert_eq!(actual, "AzureBlobStorage");
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_plan_suppresses_api_echo() {
        let resource = LinkedServiceSynapseResource;
        let mut observed = resource
            .flatten(&id(), &resource.expand(&config()).unwrap())
            .unwrap()
            .config;
        // the API lower-cases the resource group and never returns the password
        observed.insert("resource_group_name", "RG1");
        observed.insert(
            "connection_string",
            "integrated security=False;data source=test;initial catalog=test;user id=test",
        );

        let result = plan(&config(), &observed, &resource.schema()).unwrap();
        assert!(result.is_noop(), "unexpected changes {:?}", result.changes);

        let changed = config().with("description", "other");
        let result = plan(&changed, &observed, &resource.schema()).unwrap();
        assert!(!result.requires_replace());
        assert!(result.change("description").is_some());

        let moved = config().with("name", "synapse2");
        assert!(plan(&moved, &observed, &resource.schema())
            .unwrap()
            .requires_replace());
    }

    #[test]
    fn test_deprecated_name_warns() {
        let mut config = config();
        config.remove("data_factory_id");
        config.insert("data_factory_name", "df1");
        let diagnostics = validate(&LinkedServiceSynapseResource.schema(), &config);
        assert!(diagnostics.iter().all(|d| !d.is_error()));
        assert!(diagnostics
            .iter()
            .any(|d| d.attribute.as_deref() == Some("data_factory_name")));
    }

    #[test]
    fn test_importer_check() {
        assert!(LinkedServiceSynapseResource.importer_check(&id()).is_ok());
        assert!(LinkedServiceSynapseResource.importer_check(&factory_id()).is_err());
    }
}
