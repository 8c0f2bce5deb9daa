//! Dashboards, filters and persisted parameter mappings
//!
//! A [`DashboardFilter`] carries its own mapping configuration: one
//! [`ParameterMapping`] per dashcard it is bound to. The mapping state of a
//! filter is derived from its mappings and its current and applied values.

use crate::error::{Error, Result};
use crate::query::CardId;
use crate::stages::MappingTarget;
use crate::types::FilterType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
#[cfg(feature = "bindings")]
use ts_rs::TS;

pub type DashboardId = u32;
pub type DashcardId = u32;

/// Submitted filter values, keyed by filter id
pub type FilterValues = BTreeMap<String, FilterValue>;

/// Whether the dashboard is being edited. Mapping changes require editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardMode {
    Viewing,
    Editing,
}

/// Mapping lifecycle of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "bindings", ts(export))]
pub enum MappingState {
    /// No dashcard column selected
    Unmapped,
    /// Mapped, but the current value has not been submitted
    MappedPendingApply,
    /// The current value has been submitted to every mapped dashcard
    Applied,
}

/// A filter value as submitted by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[serde(untagged)]
#[cfg_attr(feature = "bindings", ts(export))]
pub enum FilterValue {
    Strings(Vec<String>),
    Numbers(Vec<f64>),
    /// A single string, e.g. a date expression like `Q1 2024`
    Single(String),
}

impl FilterValue {
    pub fn single(value: impl Into<String>) -> Self {
        FilterValue::Single(value.into())
    }

    pub fn strings<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::Strings(values.into_iter().map(Into::into).collect())
    }

    pub fn numbers(values: impl IntoIterator<Item = f64>) -> Self {
        FilterValue::Numbers(values.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FilterValue::Strings(values) => values.is_empty(),
            FilterValue::Numbers(values) => values.is_empty(),
            FilterValue::Single(value) => value.trim().is_empty(),
        }
    }

    /// Check that this value fits a filter of the given type
    pub fn validate(&self, filter: &str, filter_type: FilterType) -> Result<()> {
        if self.is_empty() {
            return Err(Error::invalid_value(filter, "value must not be empty"));
        }
        match (filter_type, self) {
            (FilterType::Date, FilterValue::Single(_)) => Ok(()),
            (FilterType::Date, _) => Err(Error::invalid_value(
                filter,
                "expected a single date expression",
            )),
            (FilterType::Number, FilterValue::Numbers(_)) => Ok(()),
            (FilterType::Number, _) => Err(Error::invalid_value(filter, "expected numbers")),
            (FilterType::Text | FilterType::Location, FilterValue::Numbers(_)) => Err(
                Error::invalid_value(filter, format!("expected {} strings", filter_type)),
            ),
            (FilterType::Text | FilterType::Location | FilterType::Id, _) => Ok(()),
        }
    }
}

/// Persisted binding of a filter to one dashcard column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
pub struct ParameterMapping {
    pub dashcard_id: DashcardId,
    pub card_id: CardId,
    pub target: MappingTarget,
}

/// A dashboard filter and its mappings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardFilter {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub filter_type: FilterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FilterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_value: Option<FilterValue>,
    #[serde(default)]
    pub mappings: Vec<ParameterMapping>,
}

impl DashboardFilter {
    pub fn new(id: impl Into<String>, name: impl Into<String>, filter_type: FilterType) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            slug: slugify(&name),
            name,
            filter_type,
            value: None,
            applied_value: None,
            mappings: Vec::new(),
        }
    }

    pub fn state(&self) -> MappingState {
        if self.mappings.is_empty() {
            MappingState::Unmapped
        } else if self.applied_value.is_some() && self.applied_value == self.value {
            MappingState::Applied
        } else {
            MappingState::MappedPendingApply
        }
    }

    /// Whether `value` is the value this filter already has applied
    pub fn is_applied(&self, value: &FilterValue) -> bool {
        self.state() == MappingState::Applied && self.value.as_ref() == Some(value)
    }

    /// Mapping for a dashcard, if any
    pub fn mapping(&self, dashcard_id: DashcardId) -> Option<&ParameterMapping> {
        self.mappings.iter().find(|m| m.dashcard_id == dashcard_id)
    }

    /// Change the current value. An applied filter goes back to pending.
    pub fn set_value(&mut self, value: FilterValue) -> Result<MappingState> {
        value.validate(&self.id, self.filter_type)?;
        self.value = Some(value);
        Ok(self.state())
    }

    /// Add or replace the mapping for a dashcard. The new dashcard has not
    /// seen the value yet, so an applied filter goes back to pending.
    pub(crate) fn upsert_mapping(&mut self, mapping: ParameterMapping) -> MappingState {
        self.mappings.retain(|m| m.dashcard_id != mapping.dashcard_id);
        self.mappings.push(mapping);
        self.applied_value = None;
        self.state()
    }

    /// Remove the mapping for a dashcard. Returns `None` if there was none.
    pub(crate) fn remove_mapping(&mut self, dashcard_id: DashcardId) -> Option<MappingState> {
        let before = self.mappings.len();
        self.mappings.retain(|m| m.dashcard_id != dashcard_id);
        if self.mappings.len() == before {
            return None;
        }
        // The remaining dashcards still show the old value
        self.applied_value = None;
        Some(self.state())
    }
}

/// A card placed on a dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashcard {
    pub id: DashcardId,
    pub card_id: CardId,
}

/// A dashboard with its dashcards and filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: DashboardId,
    pub name: String,
    /// Set when the dashboard is shared through a public link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_uuid: Option<String>,
    #[serde(default)]
    pub enable_embedding: bool,
    #[serde(default)]
    pub dashcards: Vec<Dashcard>,
    #[serde(default)]
    pub parameters: Vec<DashboardFilter>,
}

impl Dashboard {
    pub fn new(id: DashboardId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            public_uuid: None,
            enable_embedding: false,
            dashcards: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn with_dashcard(mut self, id: DashcardId, card_id: CardId) -> Self {
        self.dashcards.push(Dashcard { id, card_id });
        self
    }

    pub fn with_filter(mut self, filter: DashboardFilter) -> Self {
        self.parameters.push(filter);
        self
    }

    pub fn with_public_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.public_uuid = Some(uuid.into());
        self
    }

    pub fn with_embedding(mut self, enabled: bool) -> Self {
        self.enable_embedding = enabled;
        self
    }

    pub fn dashcard(&self, id: DashcardId) -> Result<&Dashcard> {
        self.dashcards
            .iter()
            .find(|d| d.id == id)
            .ok_or(Error::UnknownDashcard(id))
    }

    pub fn filter(&self, id: &str) -> Result<&DashboardFilter> {
        self.parameters
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::UnknownFilter(id.to_string()))
    }

    pub fn filter_mut(&mut self, id: &str) -> Result<&mut DashboardFilter> {
        self.parameters
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::UnknownFilter(id.to_string()))
    }

    /// Add a filter while editing
    pub fn add_filter(&mut self, mode: DashboardMode, filter: DashboardFilter) -> Result<()> {
        self.require_editing(mode)?;
        if self.parameters.iter().any(|f| f.id == filter.id) {
            return Err(Error::invalid_transition(&filter.id, "filter already exists"));
        }
        self.parameters.push(filter);
        Ok(())
    }

    /// Delete a filter and all of its mappings while editing
    pub fn remove_filter(&mut self, mode: DashboardMode, id: &str) -> Result<DashboardFilter> {
        self.require_editing(mode)?;
        let index = self
            .parameters
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| Error::UnknownFilter(id.to_string()))?;
        Ok(self.parameters.remove(index))
    }

    pub(crate) fn require_editing(&self, mode: DashboardMode) -> Result<()> {
        match mode {
            DashboardMode::Editing => Ok(()),
            DashboardMode::Viewing => Err(Error::NotEditing(self.id)),
        }
    }

    /// Dashcards a submission of `values` would re-fetch, in dashcard order,
    /// without changing any filter.
    ///
    /// A value that is already applied affects nothing. Mappings to dashcards
    /// no longer on the dashboard are left out. Fails like [`Self::submit`].
    pub fn affected_by(&self, values: &FilterValues) -> Result<Vec<DashcardId>> {
        let mut affected = Vec::new();
        for (id, value) in values {
            let filter = self.filter(id)?;
            value.validate(id, filter.filter_type)?;
            if filter.mappings.is_empty() {
                return Err(Error::invalid_transition(id, "filter is not mapped to any dashcard"));
            }
            if filter.is_applied(value) {
                continue;
            }
            affected.extend(
                filter
                    .mappings
                    .iter()
                    .map(|m| m.dashcard_id)
                    .filter(|&dashcard_id| self.dashcard(dashcard_id).is_ok()),
            );
        }
        affected.sort_unstable();
        affected.dedup();
        Ok(affected)
    }

    /// Submit values, moving the filters to the applied state.
    ///
    /// Returns the dashcards that need one re-fetch each, as
    /// [`Self::affected_by`] does.
    pub fn submit(&mut self, values: &FilterValues) -> Result<Vec<DashcardId>> {
        // Validate everything before mutating anything
        let affected = self.affected_by(values)?;

        for (id, value) in values {
            let filter = self.filter_mut(id)?;
            if filter.is_applied(value) {
                continue;
            }
            filter.value = Some(value.clone());
            filter.applied_value = Some(value.clone());
        }

        tracing::debug!(dashboard = self.id, dashcards = ?affected, "submitted filter values");
        Ok(affected)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// `Created At (Quarter)` → `created_at_quarter`
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}
