//! Result types returned by planning and the provider operations.

use serde::{Deserialize, Serialize};

use crate::schema::Diagnostic;
use crate::value::{ConfigValue, Value};

/// What a plan does to a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAction {
    /// Desired and observed agree.
    NoOp,
    /// The field can be changed in place.
    Update,
    /// The field cannot be changed without recreating the resource.
    Replace,
}

/// What a plan does to the resource as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    /// No prior state; the resource will be created.
    Create,
    /// Delete and recreate.
    Replace,
    /// Change in place.
    Update,
    /// Nothing to do.
    NoOp,
}

impl ResourceAction {
    /// Fold per-field actions: any replace wins, then any update.
    pub fn from_fields<I>(actions: I) -> Self
    where
        I: IntoIterator<Item = FieldAction>,
    {
        match actions.into_iter().max() {
            Some(FieldAction::Replace) => Self::Replace,
            Some(FieldAction::Update) => Self::Update,
            _ => Self::NoOp,
        }
    }
}

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The observed value (None if unset).
    pub before: Option<Value>,
    /// The desired value (None if unset).
    pub after: Option<Value>,
    /// Whether the change can be applied in place.
    pub action: FieldAction,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(
        path: impl Into<String>,
        before: Option<Value>,
        after: Option<Value>,
        action: FieldAction,
    ) -> Self {
        Self {
            path: path.into(),
            before,
            after,
            action,
        }
    }

    /// Whether this change forces replacement.
    pub fn requires_replace(&self) -> bool {
        self.action == FieldAction::Replace
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The state the resource will have after the plan is applied.
    pub planned_state: ConfigValue,
    /// Every field that differs.
    pub changes: Vec<AttributeChange>,
    /// The resource-level action.
    pub action: ResourceAction,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: ConfigValue) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            action: ResourceAction::NoOp,
        }
    }

    /// Create a plan result, deriving the action from the changes.
    pub fn with_changes(planned_state: ConfigValue, changes: Vec<AttributeChange>) -> Self {
        let action = ResourceAction::from_fields(changes.iter().map(|c| c.action));
        Self {
            planned_state,
            changes,
            action,
        }
    }

    /// Whether the resource must be recreated.
    pub fn requires_replace(&self) -> bool {
        self.action == ResourceAction::Replace
    }

    /// Whether the plan changes nothing.
    pub fn is_noop(&self) -> bool {
        self.action == ResourceAction::NoOp
    }

    /// The change recorded for `path`, if any.
    pub fn change(&self, path: &str) -> Option<&AttributeChange> {
        self.changes.iter().find(|c| c.path == path)
    }
}

/// The observed state of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResult {
    /// The resource id.
    pub id: String,
    /// The observed configuration, including computed fields.
    pub state: ConfigValue,
    /// Warnings raised while reading.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// The outcome of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The resource exists.
    Found(ReadResult),
    /// The resource no longer exists remotely; the caller should drop its state.
    Gone,
}

impl ReadOutcome {
    /// The read result, if the resource exists.
    pub fn found(self) -> Option<ReadResult> {
        match self {
            Self::Found(result) => Some(result),
            Self::Gone => None,
        }
    }
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The resource id.
    pub id: String,
    /// The imported state.
    pub state: ConfigValue,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>, state: ConfigValue) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            state,
        }
    }
}
