//! Consumption budgets at subscription, resource group and management group
//! scope.
//!
//! The three resources share one schema and differ only in the scope field
//! and in the notification contacts a management group budget accepts. On
//! the wire everything but the etag lives under `properties`; notifications
//! are a map keyed by their trigger and the filter is an expression tree,
//! so both are mapped here rather than by the generic engine.

use serde_json::{json, Map};

use crate::config::ProviderConfig;
use crate::error::ReconcileError;
use crate::expand::{self, normalize};
use crate::flatten::{self, Flattened};
use crate::ids::{BudgetId, ManagementGroupId, ResourceGroupId, Scope};
use crate::resources::{required_str, Resource};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};
use crate::validation::Validator;
use crate::value::{ConfigValue, Value};

/// Cost dimensions a filter can match on.
pub const DIMENSIONS: [&str; 22] = [
    "ChargeType",
    "Frequency",
    "InvoiceId",
    "Meter",
    "MeterCategory",
    "MeterSubCategory",
    "PartNumber",
    "PricingModel",
    "Product",
    "ProductOrderId",
    "ProductOrderName",
    "PublisherType",
    "ReservationId",
    "ReservationName",
    "ResourceGroupName",
    "ResourceGuid",
    "ResourceId",
    "ResourceLocation",
    "ResourceType",
    "ServiceFamily",
    "ServiceName",
    "UnitOfMeasure",
];

const TIME_GRAINS: [&str; 6] = [
    "BillingAnnual",
    "BillingMonth",
    "BillingQuarter",
    "Annually",
    "Monthly",
    "Quarterly",
];

const OPERATORS: [&str; 3] = ["EqualTo", "GreaterThan", "GreaterThanOrEqualTo"];

const THRESHOLD_TYPES: [&str; 2] = ["Actual", "Forecasted"];

/// Which scope a budget applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetScope {
    /// `azurerm_consumption_budget_subscription`
    Subscription,
    /// `azurerm_consumption_budget_resource_group`
    ResourceGroup,
    /// `azurerm_consumption_budget_management_group`
    ManagementGroup,
}

impl BudgetScope {
    fn type_name(self) -> &'static str {
        match self {
            Self::Subscription => "azurerm_consumption_budget_subscription",
            Self::ResourceGroup => "azurerm_consumption_budget_resource_group",
            Self::ManagementGroup => "azurerm_consumption_budget_management_group",
        }
    }

    /// The configuration field naming the scope.
    pub fn field(self) -> &'static str {
        match self {
            Self::Subscription => "subscription_id",
            Self::ResourceGroup => "resource_group_id",
            Self::ManagementGroup => "management_group_id",
        }
    }

    fn attribute(self) -> Attribute {
        let validator = match self {
            Self::Subscription => Validator::IsUuid,
            Self::ResourceGroup => Validator::ResourceGroupId,
            Self::ManagementGroup => Validator::ManagementGroupId,
        };
        Attribute::required_string()
            .path_only()
            .with_validator(validator)
    }

    fn parse(self, value: &str) -> Result<Scope, ReconcileError> {
        match self {
            Self::Subscription => {
                Validator::IsUuid.check(self.field(), &Value::from(value))?;
                Ok(Scope::Subscription {
                    subscription_id: value.to_string(),
                })
            },
            Self::ResourceGroup => {
                let id = ResourceGroupId::parse(value)?;
                Ok(Scope::ResourceGroup {
                    subscription_id: id.subscription_id,
                    resource_group: id.resource_group,
                })
            },
            Self::ManagementGroup => Ok(Scope::ManagementGroup {
                name: ManagementGroupId::parse(value)?.name,
            }),
        }
    }

    /// The scope field value for a parsed id, if the id is at this scope.
    fn render(self, scope: &Scope) -> Option<String> {
        match (self, scope) {
            (Self::Subscription, Scope::Subscription { subscription_id }) => {
                Some(subscription_id.clone())
            },
            (
                Self::ResourceGroup,
                Scope::ResourceGroup {
                    subscription_id,
                    resource_group,
                },
            ) => Some(ResourceGroupId::new(subscription_id.clone(), resource_group.clone()).to_string()),
            (Self::ManagementGroup, Scope::ManagementGroup { name }) => {
                Some(ManagementGroupId::new(name.clone()).to_string())
            },
            _ => None,
        }
    }
}

/// A consumption budget.
#[derive(Debug, Clone, Copy)]
pub struct BudgetResource {
    scope: BudgetScope,
}

impl BudgetResource {
    /// Create the budget resource for a scope.
    pub fn new(scope: BudgetScope) -> Self {
        Self { scope }
    }

    fn notification_block(&self) -> Block {
        let contact = || Attribute::optional_string_list().with_validator(Validator::StringIsNotEmpty);
        let block = Block::new()
            .with_attribute("enabled", Attribute::optional_bool().with_default(true))
            .with_attribute(
                "threshold",
                Attribute::required_int64().with_validator(Validator::IntBetween { min: 0, max: 1000 }),
            )
            // the API accepts a change but silently keeps the old type
            .with_attribute(
                "threshold_type",
                Attribute::optional_string()
                    .with_default("Actual")
                    .with_force_new()
                    .with_validator(in_slice(&THRESHOLD_TYPES)),
            )
            .with_attribute(
                "operator",
                Attribute::required_string().with_validator(in_slice(&OPERATORS)),
            );
        match self.scope {
            BudgetScope::ManagementGroup => block.with_attribute(
                "contact_emails",
                Attribute::required_string_list()
                    .with_min_items(1)
                    .with_validator(Validator::StringIsNotEmpty),
            ),
            BudgetScope::Subscription | BudgetScope::ResourceGroup => block
                .with_attribute("contact_emails", contact())
                .with_attribute("contact_groups", contact())
                .with_attribute("contact_roles", contact()),
        }
    }
}

fn in_slice(values: &[&str]) -> Validator {
    Validator::StringInSlice {
        values: values.iter().map(|v| v.to_string()).collect(),
        ignore_case: false,
    }
}

fn predicate_block(dimension: bool) -> Block {
    let name = if dimension {
        Attribute::required_string().with_validator(in_slice(&DIMENSIONS))
    } else {
        Attribute::required_string()
    };
    Block::new()
        .with_attribute("name", name)
        .with_attribute(
            "operator",
            Attribute::optional_string()
                .with_default("In")
                .with_validator(in_slice(&["In"])),
        )
        .with_attribute(
            "values",
            Attribute::required_string_list()
                .with_min_items(1)
                .with_validator(Validator::StringIsNotEmpty),
        )
}

fn not_block() -> Block {
    Block::new()
        .with_block("dimension", NestedBlock::single(predicate_block(true)))
        .with_block("tag", NestedBlock::single(predicate_block(false)))
        .with_exactly_one_of(["dimension", "tag"])
}

fn filter_block() -> Block {
    Block::new()
        .with_block("dimension", NestedBlock::set(predicate_block(true)))
        .with_block("tag", NestedBlock::set(predicate_block(false)))
        .with_block("not", NestedBlock::single(not_block()))
        .with_at_least_one_of(["dimension", "tag", "not"])
}

fn time_period_block() -> Block {
    Block::new()
        .with_attribute(
            "start_date",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::BudgetStartDate),
        )
        .with_attribute(
            "end_date",
            Attribute::optional_string()
                .computed()
                .with_validator(Validator::IsRfc3339Time),
        )
}

/// `{thresholdType}_{operator}_{threshold}_Percent`, the map key the API
/// stores a notification under.
pub fn notification_key(notification: &ConfigValue) -> String {
    let threshold = notification
        .get("threshold")
        .and_then(Value::as_float)
        .unwrap_or_default();
    format!(
        "{}_{}_{:.6}_Percent",
        notification.get_str("threshold_type").unwrap_or("Actual"),
        notification.get_str("operator").unwrap_or_default(),
        threshold
    )
}

fn expand_predicate(
    predicate: &ConfigValue,
    dimension: bool,
) -> Result<serde_json::Value, ReconcileError> {
    let key = if dimension { "dimensions" } else { "tags" };
    let mut expression = Map::new();
    expression.insert(
        key.to_string(),
        expand::expand(predicate, &predicate_block(dimension))?,
    );
    Ok(serde_json::Value::Object(expression))
}

fn list_blocks(config: &ConfigValue, field: &str) -> Vec<ConfigValue> {
    config
        .get_list(field)
        .iter()
        .filter_map(Value::as_map)
        .map(|map| ConfigValue(map.clone()))
        .collect()
}

fn expand_filter(filter: &ConfigValue) -> Result<serde_json::Value, ReconcileError> {
    let mut predicates = Vec::new();
    for dimension in list_blocks(filter, "dimension") {
        predicates.push(expand_predicate(&dimension, true)?);
    }
    for tag in list_blocks(filter, "tag") {
        predicates.push(expand_predicate(&tag, false)?);
    }

    let mut body = Map::new();
    if predicates.len() > 1 {
        body.insert("and".to_string(), serde_json::Value::Array(predicates));
    } else if let Some(serde_json::Value::Object(single)) = predicates.pop() {
        body.extend(single);
    }

    if let Some(not) = filter.get_block("not") {
        let negated = match (not.get_block("dimension"), not.get_block("tag")) {
            (Some(dimension), _) => expand_predicate(&dimension, true)?,
            (None, Some(tag)) => expand_predicate(&tag, false)?,
            (None, None) => {
                return Err(ReconcileError::MissingField {
                    fields: vec![
                        "filter.0.not.0.dimension".to_string(),
                        "filter.0.not.0.tag".to_string(),
                    ],
                })
            },
        };
        body.insert("not".to_string(), negated);
    }
    Ok(serde_json::Value::Object(body))
}

#[derive(Default)]
struct Predicates {
    dimensions: Vec<Value>,
    tags: Vec<Value>,
    diagnostics: Vec<Diagnostic>,
}

impl Predicates {
    fn collect(&mut self, expression: &serde_json::Value) -> Result<(), ReconcileError> {
        if let Some(dimension) = expression.get("dimensions").filter(|v| !v.is_null()) {
            let flattened = flatten::flatten(dimension, &predicate_block(true))?;
            self.diagnostics.extend(flattened.diagnostics);
            self.dimensions.push(flattened.config.into());
        }
        if let Some(tag) = expression.get("tags").filter(|v| !v.is_null()) {
            let flattened = flatten::flatten(tag, &predicate_block(false))?;
            self.diagnostics.extend(flattened.diagnostics);
            self.tags.push(flattened.config.into());
        }
        Ok(())
    }
}

fn flatten_filter(filter: &serde_json::Value) -> Result<Flattened, ReconcileError> {
    let mut predicates = Predicates::default();
    predicates.collect(filter)?;
    if let Some(serde_json::Value::Array(and)) = filter.get("and") {
        for expression in and {
            predicates.collect(expression)?;
        }
    }

    let mut config = ConfigValue::new();
    if !predicates.dimensions.is_empty() {
        config.insert(
            "dimension",
            Value::List(Value::normalize_set(predicates.dimensions)),
        );
    }
    if !predicates.tags.is_empty() {
        config.insert("tag", Value::List(Value::normalize_set(predicates.tags)));
    }

    let mut diagnostics = predicates.diagnostics;
    if let Some(not) = filter.get("not").filter(|v| !v.is_null()) {
        let mut negated = Predicates::default();
        negated.collect(not)?;
        diagnostics.extend(negated.diagnostics);
        let mut block = ConfigValue::new();
        if let Some(dimension) = negated.dimensions.into_iter().next() {
            block.insert("dimension", Value::List(vec![dimension]));
        }
        if let Some(tag) = negated.tags.into_iter().next() {
            block.insert("tag", Value::List(vec![tag]));
        }
        if !block.is_empty() {
            config.insert("not", Value::block(block));
        }
    }

    Ok(Flattened {
        config,
        diagnostics,
    })
}

impl Resource for BudgetResource {
    fn type_name(&self) -> &'static str {
        self.scope.type_name()
    }

    fn schema(&self) -> Schema {
        let common = Schema::v0()
            .with_attribute(
                "name",
                Attribute::required_string()
                    .path_only()
                    .with_validator(Validator::BudgetName),
            )
            .with_attribute(
                "etag",
                Attribute::optional_string().computed().with_wire_name("eTag"),
            )
            .with_attribute(
                "amount",
                Attribute::required_float64().with_validator(Validator::FloatAtLeast(1.0)),
            )
            .with_attribute(
                "time_grain",
                Attribute::optional_string()
                    .with_default("Monthly")
                    .with_force_new()
                    .with_validator(in_slice(&TIME_GRAINS)),
            )
            .with_block(
                "time_period",
                NestedBlock::single(time_period_block()).with_min_items(1),
            )
            .with_block("filter", NestedBlock::single(filter_block()).custom_wire())
            .with_block(
                "notification",
                NestedBlock::set(self.notification_block())
                    .with_min_items(1)
                    .with_max_items(5)
                    .custom_wire(),
            );
        let scoped = Schema::v0().with_attribute(self.scope.field(), self.scope.attribute());
        common.merge(scoped)
    }

    fn resource_id(
        &self,
        config: &ConfigValue,
        _provider: &ProviderConfig,
    ) -> Result<String, ReconcileError> {
        let name = required_str(config, "name")?;
        Validator::BudgetName.check("name", &Value::from(name))?;
        let scope = self.scope.parse(required_str(config, self.scope.field())?)?;
        Ok(BudgetId::new(scope, name).to_string())
    }

    fn expand(&self, config: &ConfigValue) -> Result<serde_json::Value, ReconcileError> {
        let schema = self.schema();
        let normalized = normalize(config, &schema.block)?;
        let mut properties = match expand::expand(&normalized, &schema.block)? {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        };
        let etag = properties.remove("eTag");
        properties.insert("category".to_string(), json!("Cost"));

        if let Some(filter) = normalized.get_block("filter") {
            properties.insert("filter".to_string(), expand_filter(&filter)?);
        }

        let notification_block = self.notification_block();
        let mut notifications = Map::new();
        for notification in list_blocks(&normalized, "notification") {
            notifications.insert(
                notification_key(&notification),
                expand::expand(&notification, &notification_block)?,
            );
        }
        properties.insert(
            "notifications".to_string(),
            serde_json::Value::Object(notifications),
        );

        let mut body = Map::new();
        if let Some(etag) = etag {
            body.insert("eTag".to_string(), etag);
        }
        body.insert("properties".to_string(), serde_json::Value::Object(properties));
        Ok(serde_json::Value::Object(body))
    }

    fn flatten(&self, id: &str, response: &serde_json::Value) -> Result<Flattened, ReconcileError> {
        let budget_id = BudgetId::parse(id)?;
        let scope_value = self.scope.render(&budget_id.scope).ok_or_else(|| {
            ReconcileError::InvalidId {
                input: id.to_string(),
                reason: format!("not a {} id", self.type_name()),
            }
        })?;

        let mut merged = match response.get("properties") {
            Some(serde_json::Value::Object(properties)) => properties.clone(),
            None | Some(serde_json::Value::Null) => Map::new(),
            Some(_) => {
                return Err(ReconcileError::UnexpectedShape {
                    field: "properties".to_string(),
                    expected: "object".to_string(),
                    actual: "non-object".to_string(),
                })
            },
        };
        if let Some(etag) = response.get("eTag").filter(|v| !v.is_null()) {
            merged.insert("eTag".to_string(), etag.clone());
        }
        let merged = serde_json::Value::Object(merged);

        let schema = self.schema();
        let mut flattened = flatten::flatten(&merged, &schema.block)?;
        flattened.config.insert("name", budget_id.name.clone());
        flattened.config.insert(self.scope.field(), scope_value);

        if let Some(filter) = merged.get("filter").filter(|v| !v.is_null()) {
            let filter = flatten_filter(filter)?;
            flattened.diagnostics.extend(filter.diagnostics);
            if !filter.config.is_empty() {
                flattened.config.insert("filter", Value::block(filter.config));
            }
        }

        if let Some(serde_json::Value::Object(notifications)) = merged.get("notifications") {
            let block = self.notification_block();
            let mut items = Vec::with_capacity(notifications.len());
            for notification in notifications.values() {
                let element = flatten::flatten(notification, &block)?;
                flattened.diagnostics.extend(element.diagnostics);
                items.push(Value::from(element.config));
            }
            if !items.is_empty() {
                flattened
                    .config
                    .insert("notification", Value::List(Value::normalize_set(items)));
            }
        }

        Ok(flattened)
    }

    fn importer_check(&self, id: &str) -> Result<(), ReconcileError> {
        let budget_id = BudgetId::parse(id)?;
        match self.scope.render(&budget_id.scope) {
            Some(_) => Ok(()),
            None => Err(ReconcileError::InvalidId {
                input: id.to_string(),
                reason: format!("expected a budget scoped to a {}", self.scope.field()),
            }),
        }
    }
}
