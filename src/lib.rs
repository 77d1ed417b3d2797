//! Hemmer Provider for Azure Resource Manager
//!
//! This crate reconciles declared Azure resources against what the Resource
//! Manager API reports. Each resource is described once by a [`schema`], and
//! a generic engine derives everything else from it.
//!
//! # Overview
//!
//! - **Schema**: attribute types, flags, validators, wire names and diff
//!   suppression rules for each resource
//! - **Validation**: structured [`Diagnostic`](schema::Diagnostic)s for a
//!   configuration before anything is sent
//! - **Expand / Flatten**: configuration to request body and response body
//!   back to state
//! - **Diff**: per-field plans that decide between in-place update and
//!   replacement
//! - **Resources**: consumption budgets at three scopes, data factories and
//!   Synapse linked services
//! - **Provider**: create, read, update, delete and import through an
//!   [`ApiClient`], each bounded by a timeout
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_azurerm::{
//!     init_logging, ApiClient, ConfigValue, Provider, ProviderConfig,
//! };
//!
//! async fn run(client: impl ApiClient) -> Result<(), hemmer_provider_azurerm::ReconcileError> {
//!     init_logging();
//!
//!     let config = ProviderConfig::new()
//!         .with_subscription_id("12345678-1234-9876-4563-123456789012")
//!         .with_env_overrides();
//!     let provider = Provider::try_new(config, client)?;
//!
//!     let desired = ConfigValue::new()
//!         .with("name", "df1")
//!         .with("resource_group_name", "rg1")
//!         .with("location", "West Europe");
//!     let plan = provider.plan("azurerm_data_factory", &desired, None)?;
//!     if !plan.is_noop() {
//!         let created = provider.create("azurerm_data_factory", &plan.planned_state).await?;
//!         tracing::info!(id = %created.id, "created");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod expand;
pub mod flatten;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod testing;
pub mod types;
pub mod validation;
pub mod value;

// Re-export main types at crate root
pub use client::ApiClient;
pub use config::{ProviderConfig, Timeouts};
pub use error::ReconcileError;
pub use logging::{init_logging, init_logging_with_config, try_init_logging, LogConfig};
pub use provider::Provider;
pub use resources::Resource;
pub use schema::ProviderSchema;
pub use types::{
    AttributeChange, FieldAction, ImportedResource, PlanResult, ReadOutcome, ReadResult,
    ResourceAction,
};
pub use validation::{is_valid, validate, validate_result};
pub use value::{ConfigValue, Value};

// Re-export async_trait for ApiClient implementations
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
