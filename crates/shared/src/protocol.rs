use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{FieldChange, Item, ItemId, Priority},
    error::ValidationError,
};

pub fn items_route() -> &'static str {
    "/items"
}

pub fn item_route(id: &ItemId) -> String {
    format!("/items/{id}")
}

/// Body of `POST /items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

impl NewItem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: Priority::default(),
            due_date: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        Ok(())
    }
}

/// Body of `PATCH /items/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChanges {
    #[serde(default, skip_serializing_if = "FieldChange::is_unspecified")]
    pub title: FieldChange<String>,
    #[serde(default, skip_serializing_if = "FieldChange::is_unspecified")]
    pub description: FieldChange<String>,
    #[serde(default, skip_serializing_if = "FieldChange::is_unspecified")]
    pub completed: FieldChange<bool>,
    #[serde(default, skip_serializing_if = "FieldChange::is_unspecified")]
    pub priority: FieldChange<Priority>,
    #[serde(default, skip_serializing_if = "FieldChange::is_unspecified")]
    pub due_date: FieldChange<NaiveDate>,
}

impl ItemChanges {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: FieldChange::Set(completed),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_unspecified()
            && self.description.is_unspecified()
            && self.completed.is_unspecified()
            && self.priority.is_unspecified()
            && self.due_date.is_unspecified()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.title {
            FieldChange::Set(title) if title.trim().is_empty() => {
                return Err(ValidationError::EmptyTitle)
            }
            FieldChange::Cleared => return Err(ValidationError::RequiredFieldCleared("title")),
            _ => {}
        }
        if matches!(self.completed, FieldChange::Cleared) {
            return Err(ValidationError::RequiredFieldCleared("completed"));
        }
        if matches!(self.priority, FieldChange::Cleared) {
            return Err(ValidationError::RequiredFieldCleared("priority"));
        }
        Ok(())
    }

    /// Overlays the changes onto `base`. Identity and timestamps are kept.
    pub fn apply_to(&self, base: &Item) -> Result<Item, ValidationError> {
        self.validate()?;
        Ok(Item {
            id: base.id.clone(),
            title: self.title.apply_required(&base.title, "title")?,
            description: self.description.apply_optional(&base.description),
            completed: self.completed.apply_required(&base.completed, "completed")?,
            priority: self.priority.apply_required(&base.priority, "priority")?,
            due_date: self.due_date.apply_optional(&base.due_date),
            created_at: base.created_at,
            updated_at: base.updated_at,
        })
    }
}
