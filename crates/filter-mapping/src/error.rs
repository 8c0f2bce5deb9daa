//! Error types for filter-mapping

use crate::metadata::MetadataError;
use thiserror::Error;

/// The result type for filter-mapping operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while extracting, classifying or resolving mappings
#[derive(Debug, Error)]
pub enum Error {
    /// The stored query of a card is cyclic or references something that does not exist.
    ///
    /// This reflects a corrupt stored query; callers must not retry.
    #[error("Invalid query graph for card {card}: {message}")]
    InvalidQueryGraph { card: u32, message: String },

    /// Metadata lookup failed
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// A mapping change was attempted outside of dashboard edit mode
    #[error("Dashboard {0} is not in edit mode")]
    NotEditing(u32),

    /// The dashboard has no filter with this id
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    /// The dashboard has no dashcard with this id
    #[error("Unknown dashcard: {0}")]
    UnknownDashcard(u32),

    /// The selected column is not a mapping option for this dashcard and filter
    #[error("Column {column} at stage {stage} is not a valid target for filter {filter}")]
    UnknownTarget {
        filter: String,
        stage: usize,
        column: String,
    },

    /// The submitted value does not fit the filter type
    #[error("Invalid value for filter {filter}: {message}")]
    InvalidValue { filter: String, message: String },

    /// The filter state does not allow this transition
    #[error("Invalid transition for filter {filter}: {message}")]
    InvalidTransition { filter: String, message: String },

    /// The presentation surface is not enabled for this dashboard
    #[error("Surface {surface} is unavailable for dashboard {dashboard}")]
    SurfaceUnavailable { surface: String, dashboard: u32 },

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid query graph error
    pub fn invalid_graph(card: u32, message: impl Into<String>) -> Self {
        Error::InvalidQueryGraph {
            card,
            message: message.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidValue {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Create an invalid transition error
    pub fn invalid_transition(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidTransition {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Create a surface unavailable error
    pub fn surface_unavailable(surface: impl Into<String>, dashboard: u32) -> Self {
        Error::SurfaceUnavailable {
            surface: surface.into(),
            dashboard,
        }
    }

    /// Whether this error means the card can never receive filter mappings
    /// until its stored query is repaired.
    pub fn is_fatal_for_card(&self) -> bool {
        matches!(self, Error::InvalidQueryGraph { .. } | Error::Metadata(_))
    }
}
