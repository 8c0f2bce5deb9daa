//! Semantic Types
//!
//! Column semantic types, dashboard filter types and the compatibility table
//! that decides which columns a filter may be bound to.

use serde::{Deserialize, Serialize};
#[cfg(feature = "bindings")]
use ts_rs::TS;

/// Semantic type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "bindings", ts(export))]
pub enum SemanticType {
    /// Dates and timestamps
    Date,
    /// Free text
    Text,
    /// Low-cardinality text (e.g. product category)
    Category,
    /// Address, city, state, zip
    Location,
    /// Numeric measures
    Number,
    /// Primary and foreign keys
    Identifier,
    /// Booleans
    Boolean,
    /// Anything else (JSON, arrays, ...)
    Other,
}

/// Semantic type of a dashboard filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "bindings", ts(export))]
pub enum FilterType {
    Date,
    Text,
    Number,
    Location,
    Id,
}

impl FilterType {
    /// All filter types, in the order the editor lists them
    pub const ALL: [FilterType; 5] = [
        FilterType::Date,
        FilterType::Text,
        FilterType::Number,
        FilterType::Location,
        FilterType::Id,
    ];

    /// Whether a column of the given semantic type can receive this filter.
    ///
    /// There are no cross-type matches.
    pub fn accepts(self, column_type: SemanticType) -> bool {
        matches!(
            (self, column_type),
            (FilterType::Date, SemanticType::Date)
                | (FilterType::Text, SemanticType::Text)
                | (FilterType::Text, SemanticType::Category)
                | (FilterType::Number, SemanticType::Number)
                | (FilterType::Location, SemanticType::Location)
                | (FilterType::Id, SemanticType::Identifier)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterType::Date => "date",
            FilterType::Text => "text",
            FilterType::Number => "number",
            FilterType::Location => "location",
            FilterType::Id => "id",
        }
    }
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coercion class used when inferring the type of arithmetic expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum CoercionClass {
    Text = 0,
    Numeric = 1,
    Timelike = 2,
}

impl CoercionClass {
    pub(crate) fn of(semantic_type: SemanticType) -> Option<Self> {
        match semantic_type {
            SemanticType::Text | SemanticType::Category | SemanticType::Location => {
                Some(CoercionClass::Text)
            }
            SemanticType::Number | SemanticType::Boolean => Some(CoercionClass::Numeric),
            SemanticType::Date => Some(CoercionClass::Timelike),
            SemanticType::Identifier | SemanticType::Other => None,
        }
    }
}
