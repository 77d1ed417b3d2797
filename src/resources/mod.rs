//! Resource definitions.
//!
//! Each resource is a schema plus the glue that does not fit the generic
//! engine: how its id is derived from configuration, and the parts of its
//! payload (envelopes, keyed maps, polymorphic bodies) that need custom
//! mapping. Remote calls are made by [`crate::provider::Provider`], never by
//! a resource.

use crate::config::ProviderConfig;
use crate::error::ReconcileError;
use crate::flatten::Flattened;
use crate::ids;
use crate::schema::Schema;
use crate::value::ConfigValue;

pub mod budget;
pub mod data_factory;
pub mod linked_service_synapse;

pub use budget::{BudgetResource, BudgetScope};
pub use data_factory::DataFactoryResource;
pub use linked_service_synapse::LinkedServiceSynapseResource;

/// A resource type the provider can manage.
pub trait Resource: Send + Sync {
    /// Type name, e.g. `azurerm_consumption_budget_subscription`.
    fn type_name(&self) -> &'static str;

    /// Schema describing the resource configuration.
    fn schema(&self) -> Schema;

    /// The id the configuration addresses.
    ///
    /// Fails when the identifying fields are missing or invalid.
    fn resource_id(
        &self,
        config: &ConfigValue,
        provider: &ProviderConfig,
    ) -> Result<String, ReconcileError>;

    /// Build the request body for a create or update.
    fn expand(&self, config: &ConfigValue) -> Result<serde_json::Value, ReconcileError>;

    /// Read a response body into configuration. Fields carried by the id are
    /// filled in from `id`.
    fn flatten(&self, id: &str, response: &serde_json::Value) -> Result<Flattened, ReconcileError>;

    /// Check that `id` has the shape this resource type is imported with.
    fn importer_check(&self, id: &str) -> Result<(), ReconcileError>;
}

/// Every resource this crate ships.
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(BudgetResource::new(BudgetScope::Subscription)),
        Box::new(BudgetResource::new(BudgetScope::ResourceGroup)),
        Box::new(BudgetResource::new(BudgetScope::ManagementGroup)),
        Box::new(DataFactoryResource),
        Box::new(LinkedServiceSynapseResource),
    ]
}

/// Look up a required string, failing with [`ReconcileError::MissingField`].
pub(crate) fn required_str<'a>(
    config: &'a ConfigValue,
    field: &str,
) -> Result<&'a str, ReconcileError> {
    config
        .get_str(field)
        .ok_or_else(|| ReconcileError::missing(field))
}

/// Look up a required string that becomes one segment of a resource id.
pub(crate) fn id_segment<'a>(
    config: &'a ConfigValue,
    field: &str,
) -> Result<&'a str, ReconcileError> {
    let value = required_str(config, field)?;
    ids::check_segment(field, value)?;
    Ok(value)
}
