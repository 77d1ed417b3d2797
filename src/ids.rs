//! Azure Resource Manager identifiers.
//!
//! [`ResourceId`] is the generic parsed form of a path such as
//! `/subscriptions/{id}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}`.
//! The typed ids on top of it check the namespace and resource types of one
//! kind of resource. Rendering is canonical and parsing accepts exactly what
//! rendering produces, so `parse(render(id)) == id` for every valid id.
//! Constructors take names as given; names from user input go through
//! [`check_segment`] first.
//!
//! Some APIs echo ids back with different casing (`resourcegroups`,
//! `userassignedidentities`); the `parse_insensitively` functions accept those
//! and normalise to the canonical spelling.

use std::fmt;

use crate::error::ReconcileError;

const SUBSCRIPTIONS: &str = "subscriptions";
const RESOURCE_GROUPS: &str = "resourceGroups";
const PROVIDERS: &str = "providers";
const MANAGEMENT_NAMESPACE: &str = "Microsoft.Management";
const MANAGEMENT_GROUPS: &str = "managementGroups";

/// Check that `value` can be one segment of an id: non-empty, no `/`.
pub fn check_segment(field: &str, value: &str) -> Result<(), ReconcileError> {
    if value.is_empty() || value.contains('/') {
        return Err(ReconcileError::validation(
            field,
            format!("{:?} cannot be used in a resource id", value),
        ));
    }
    Ok(())
}

/// Where a resource lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// `/subscriptions/{subscription_id}`
    Subscription {
        /// The subscription id.
        subscription_id: String,
    },
    /// `/subscriptions/{subscription_id}/resourceGroups/{resource_group}`
    ResourceGroup {
        /// The subscription id.
        subscription_id: String,
        /// The resource group name.
        resource_group: String,
    },
    /// `/providers/Microsoft.Management/managementGroups/{name}`
    ManagementGroup {
        /// The management group name.
        name: String,
    },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Subscription { subscription_id } => {
                write!(f, "/{}/{}", SUBSCRIPTIONS, subscription_id)
            },
            Scope::ResourceGroup {
                subscription_id,
                resource_group,
            } => write!(
                f,
                "/{}/{}/{}/{}",
                SUBSCRIPTIONS, subscription_id, RESOURCE_GROUPS, resource_group
            ),
            Scope::ManagementGroup { name } => write!(
                f,
                "/{}/{}/{}/{}",
                PROVIDERS, MANAGEMENT_NAMESPACE, MANAGEMENT_GROUPS, name
            ),
        }
    }
}

/// A parsed resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// The scope the resource lives in.
    pub scope: Scope,
    /// Resource provider namespace, e.g. `Microsoft.DataFactory`.
    pub provider: Option<String>,
    /// `(type, name)` pairs below the provider, outermost first.
    pub segments: Vec<(String, String)>,
}

impl ResourceId {
    /// An id naming the scope itself.
    pub fn scope(scope: Scope) -> Self {
        Self {
            scope,
            provider: None,
            segments: Vec::new(),
        }
    }

    /// An id for a resource under `scope`. Names are not checked.
    pub fn new(
        scope: Scope,
        provider: impl Into<String>,
        segments: Vec<(String, String)>,
    ) -> Self {
        Self {
            scope,
            provider: Some(provider.into()),
            segments,
        }
    }

    /// Parse an id, requiring the canonical casing of the fixed keys.
    pub fn parse(input: &str) -> Result<Self, ReconcileError> {
        Self::parse_with(input, false)
    }

    /// Parse an id, accepting any casing of the fixed keys.
    pub fn parse_insensitively(input: &str) -> Result<Self, ReconcileError> {
        Self::parse_with(input, true)
    }

    fn parse_with(input: &str, insensitive: bool) -> Result<Self, ReconcileError> {
        let invalid = |reason: &str| ReconcileError::InvalidId {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let key_eq = |actual: &str, expected: &str| {
            if insensitive {
                actual.eq_ignore_ascii_case(expected)
            } else {
                actual == expected
            }
        };

        let rest = input
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("contains an empty segment"));
        }

        let (scope, pos) = match parts.first() {
            Some(&key) if key_eq(key, SUBSCRIPTIONS) => {
                let subscription_id = parts
                    .get(1)
                    .ok_or_else(|| invalid("missing subscription id"))?
                    .to_string();
                match parts.get(2) {
                    Some(&key) if key_eq(key, RESOURCE_GROUPS) => {
                        let resource_group = parts
                            .get(3)
                            .ok_or_else(|| invalid("missing resource group name"))?
                            .to_string();
                        let scope = Scope::ResourceGroup {
                            subscription_id,
                            resource_group,
                        };
                        (scope, 4)
                    },
                    _ => (Scope::Subscription { subscription_id }, 2),
                }
            },
            Some(&key)
                if key_eq(key, PROVIDERS)
                    && parts
                        .get(1)
                        .is_some_and(|ns| ns.eq_ignore_ascii_case(MANAGEMENT_NAMESPACE))
                    && parts.get(2).is_some_and(|t| key_eq(*t, MANAGEMENT_GROUPS)) =>
            {
                if !insensitive && parts[1] != MANAGEMENT_NAMESPACE {
                    return Err(invalid("expected namespace Microsoft.Management"));
                }
                let name = parts
                    .get(3)
                    .ok_or_else(|| invalid("missing management group name"))?
                    .to_string();
                (Scope::ManagementGroup { name }, 4)
            },
            _ => return Err(invalid("expected a subscription or management group scope")),
        };

        let remaining = &parts[pos..];
        if remaining.is_empty() {
            return Ok(Self::scope(scope));
        }
        if !key_eq(remaining[0], PROVIDERS) {
            return Err(invalid("expected 'providers' after the scope"));
        }
        let provider = remaining
            .get(1)
            .ok_or_else(|| invalid("missing provider namespace"))?
            .to_string();
        let pairs = &remaining[2..];
        if pairs.is_empty() {
            return Err(invalid("missing resource type and name"));
        }
        if pairs.len() % 2 != 0 {
            return Err(invalid("resource type without a name"));
        }
        let segments = pairs
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();

        Ok(Self {
            scope,
            provider: Some(provider),
            segments,
        })
    }

    /// The subscription this id belongs to, if it is subscription scoped.
    pub fn subscription_id(&self) -> Option<&str> {
        match &self.scope {
            Scope::Subscription { subscription_id }
            | Scope::ResourceGroup {
                subscription_id, ..
            } => Some(subscription_id),
            Scope::ManagementGroup { .. } => None,
        }
    }

    /// The resource group this id belongs to, if any.
    pub fn resource_group(&self) -> Option<&str> {
        match &self.scope {
            Scope::ResourceGroup { resource_group, .. } => Some(resource_group),
            _ => None,
        }
    }

    /// The innermost resource name.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(|(_, name)| name.as_str())
    }

    /// Check the namespace and resource types, returning the names in order.
    ///
    /// In insensitive mode the namespace and types may differ in case and are
    /// rewritten to the expected spelling.
    fn expect_resource(
        &mut self,
        input: &str,
        namespace: &str,
        types: &[&str],
        insensitive: bool,
    ) -> Result<Vec<String>, ReconcileError> {
        let matches = |actual: &str, expected: &str| {
            if insensitive {
                actual.eq_ignore_ascii_case(expected)
            } else {
                actual == expected
            }
        };
        let expected_shape = || {
            let mut shape = format!("/providers/{}", namespace);
            for t in types {
                shape.push_str(&format!("/{}/{{name}}", t));
            }
            shape
        };
        let invalid = || ReconcileError::InvalidId {
            input: input.to_string(),
            reason: format!("expected a resource of the form {}", expected_shape()),
        };

        match &self.provider {
            Some(ns) if matches(ns.as_str(), namespace) => {},
            _ => return Err(invalid()),
        }
        if self.segments.len() != types.len()
            || !self
                .segments
                .iter()
                .zip(types)
                .all(|((t, _), expected)| matches(t.as_str(), *expected))
        {
            return Err(invalid());
        }

        self.provider = Some(namespace.to_string());
        for ((t, _), expected) in self.segments.iter_mut().zip(types) {
            *t = expected.to_string();
        }
        Ok(self.segments.iter().map(|(_, name)| name.clone()).collect())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scope)?;
        if let Some(provider) = &self.provider {
            write!(f, "/{}/{}", PROVIDERS, provider)?;
            for (resource_type, name) in &self.segments {
                write!(f, "/{}/{}", resource_type, name)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for ResourceId {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn resource_group_scope(id: &ResourceId, input: &str) -> Result<(String, String), ReconcileError> {
    match &id.scope {
        Scope::ResourceGroup {
            subscription_id,
            resource_group,
        } => Ok((subscription_id.clone(), resource_group.clone())),
        _ => Err(ReconcileError::InvalidId {
            input: input.to_string(),
            reason: "expected a resource group scoped id".to_string(),
        }),
    }
}

/// `/subscriptions/{subscription_id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    /// The subscription id.
    pub subscription_id: String,
}

impl SubscriptionId {
    /// Build an id from the subscription GUID.
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
        }
    }

    /// Parse a subscription id.
    pub fn parse(input: &str) -> Result<Self, ReconcileError> {
        match ResourceId::parse(input)? {
            ResourceId {
                scope: Scope::Subscription { subscription_id },
                provider: None,
                ..
            } => Ok(Self { subscription_id }),
            _ => Err(ReconcileError::InvalidId {
                input: input.to_string(),
                reason: "expected a subscription id".to_string(),
            }),
        }
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            Scope::Subscription {
                subscription_id: self.subscription_id.clone()
            }
        )
    }
}

/// `/subscriptions/{subscription_id}/resourceGroups/{resource_group}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceGroupId {
    /// The subscription id.
    pub subscription_id: String,
    /// The resource group name.
    pub resource_group: String,
}

impl ResourceGroupId {
    /// Build an id from its parts.
    pub fn new(subscription_id: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
        }
    }

    /// Parse a resource group id.
    pub fn parse(input: &str) -> Result<Self, ReconcileError> {
        let id = ResourceId::parse(input)?;
        if id.provider.is_some() {
            return Err(ReconcileError::InvalidId {
                input: input.to_string(),
                reason: "expected a resource group id, got a resource below it".to_string(),
            });
        }
        let (subscription_id, resource_group) = resource_group_scope(&id, input)?;
        Ok(Self::new(subscription_id, resource_group))
    }
}

impl fmt::Display for ResourceGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = Scope::ResourceGroup {
            subscription_id: self.subscription_id.clone(),
            resource_group: self.resource_group.clone(),
        };
        write!(f, "{}", scope)
    }
}

/// `/providers/Microsoft.Management/managementGroups/{name}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagementGroupId {
    /// The management group name.
    pub name: String,
}

impl ManagementGroupId {
    /// Build an id from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Parse a management group id.
    pub fn parse(input: &str) -> Result<Self, ReconcileError> {
        match ResourceId::parse(input)? {
            ResourceId {
                scope: Scope::ManagementGroup { name },
                provider: None,
                ..
            } => Ok(Self { name }),
            _ => Err(ReconcileError::InvalidId {
                input: input.to_string(),
                reason: "expected a management group id".to_string(),
            }),
        }
    }
}

impl fmt::Display for ManagementGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            Scope::ManagementGroup {
                name: self.name.clone()
            }
        )
    }
}

/// `/subscriptions/{s}/resourceGroups/{rg}/providers/Microsoft.DataFactory/factories/{name}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataFactoryId {
    /// The subscription id.
    pub subscription_id: String,
    /// The resource group name.
    pub resource_group: String,
    /// The factory name.
    pub factory_name: String,
}

impl DataFactoryId {
    const NAMESPACE: &'static str = "Microsoft.DataFactory";
    const TYPES: [&'static str; 1] = ["factories"];

    /// Build an id from its parts.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        factory_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            factory_name: factory_name.into(),
        }
    }

    /// Parse a data factory id.
    pub fn parse(input: &str) -> Result<Self, ReconcileError> {
        Self::parse_with(input, false)
    }

    /// Parse a data factory id, ignoring the casing of keys and types.
    pub fn parse_insensitively(input: &str) -> Result<Self, ReconcileError> {
        Self::parse_with(input, true)
    }

    fn parse_with(input: &str, insensitive: bool) -> Result<Self, ReconcileError> {
        let mut id = ResourceId::parse_with(input, insensitive)?;
        let names = id.expect_resource(input, Self::NAMESPACE, &Self::TYPES, insensitive)?;
        let (subscription_id, resource_group) = resource_group_scope(&id, input)?;
        Ok(Self::new(subscription_id, resource_group, names[0].clone()))
    }

    /// The generic form of this id.
    pub fn to_resource_id(&self) -> ResourceId {
        ResourceId::new(
            Scope::ResourceGroup {
                subscription_id: self.subscription_id.clone(),
                resource_group: self.resource_group.clone(),
            },
            Self::NAMESPACE,
            vec![(Self::TYPES[0].to_string(), self.factory_name.clone())],
        )
    }
}

impl fmt::Display for DataFactoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_resource_id())
    }
}

/// A linked service inside a data factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkedServiceId {
    /// The subscription id.
    pub subscription_id: String,
    /// The resource group name.
    pub resource_group: String,
    /// The factory name.
    pub factory_name: String,
    /// The linked service name.
    pub name: String,
}

impl LinkedServiceId {
    const TYPES: [&'static str; 2] = ["factories", "linkedservices"];

    /// Build an id below a factory.
    pub fn new(factory: &DataFactoryId, name: impl Into<String>) -> Self {
        Self {
            subscription_id: factory.subscription_id.clone(),
            resource_group: factory.resource_group.clone(),
            factory_name: factory.factory_name.clone(),
            name: name.into(),
        }
    }

    /// Parse a linked service id.
    pub fn parse(input: &str) -> Result<Self, ReconcileError> {
        let mut id = ResourceId::parse(input)?;
        let names = id.expect_resource(input, DataFactoryId::NAMESPACE, &Self::TYPES, false)?;
        let (subscription_id, resource_group) = resource_group_scope(&id, input)?;
        Ok(Self {
            subscription_id,
            resource_group,
            factory_name: names[0].clone(),
            name: names[1].clone(),
        })
    }

    /// The id of the factory this linked service belongs to.
    pub fn data_factory_id(&self) -> DataFactoryId {
        DataFactoryId::new(
            self.subscription_id.clone(),
            self.resource_group.clone(),
            self.factory_name.clone(),
        )
    }

    /// The generic form of this id.
    pub fn to_resource_id(&self) -> ResourceId {
        ResourceId::new(
            Scope::ResourceGroup {
                subscription_id: self.subscription_id.clone(),
                resource_group: self.resource_group.clone(),
            },
            DataFactoryId::NAMESPACE,
            vec![
                (Self::TYPES[0].to_string(), self.factory_name.clone()),
                (Self::TYPES[1].to_string(), self.name.clone()),
            ],
        )
    }
}

impl fmt::Display for LinkedServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_resource_id())
    }
}

/// A user assigned managed identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserAssignedIdentityId {
    /// The subscription id.
    pub subscription_id: String,
    /// The resource group name.
    pub resource_group: String,
    /// The identity name.
    pub name: String,
}

impl UserAssignedIdentityId {
    const NAMESPACE: &'static str = "Microsoft.ManagedIdentity";
    const TYPES: [&'static str; 1] = ["userAssignedIdentities"];

    /// Build an id from its parts.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Parse an identity id.
    pub fn parse(input: &str) -> Result<Self, ReconcileError> {
        Self::parse_with(input, false)
    }

    /// Parse an identity id, ignoring the casing of keys and types.
    pub fn parse_insensitively(input: &str) -> Result<Self, ReconcileError> {
        Self::parse_with(input, true)
    }

    fn parse_with(input: &str, insensitive: bool) -> Result<Self, ReconcileError> {
        let mut id = ResourceId::parse_with(input, insensitive)?;
        let names = id.expect_resource(input, Self::NAMESPACE, &Self::TYPES, insensitive)?;
        let (subscription_id, resource_group) = resource_group_scope(&id, input)?;
        Ok(Self::new(subscription_id, resource_group, names[0].clone()))
    }

    /// The generic form of this id.
    pub fn to_resource_id(&self) -> ResourceId {
        ResourceId::new(
            Scope::ResourceGroup {
                subscription_id: self.subscription_id.clone(),
                resource_group: self.resource_group.clone(),
            },
            Self::NAMESPACE,
            vec![(Self::TYPES[0].to_string(), self.name.clone())],
        )
    }
}

impl fmt::Display for UserAssignedIdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_resource_id())
    }
}

/// A consumption budget at subscription, resource group or management group scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BudgetId {
    /// The scope the budget applies to.
    pub scope: Scope,
    /// The budget name.
    pub name: String,
}

impl BudgetId {
    const NAMESPACE: &'static str = "Microsoft.Consumption";
    const TYPES: [&'static str; 1] = ["budgets"];

    /// Build an id from its parts.
    pub fn new(scope: Scope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }

    /// Parse a budget id.
    pub fn parse(input: &str) -> Result<Self, ReconcileError> {
        let mut id = ResourceId::parse(input)?;
        let names = id.expect_resource(input, Self::NAMESPACE, &Self::TYPES, false)?;
        Ok(Self::new(id.scope, names[0].clone()))
    }

    /// The generic form of this id.
    pub fn to_resource_id(&self) -> ResourceId {
        ResourceId::new(
            self.scope.clone(),
            Self::NAMESPACE,
            vec![(Self::TYPES[0].to_string(), self.name.clone())],
        )
    }
}

impl fmt::Display for BudgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_resource_id())
    }
}
