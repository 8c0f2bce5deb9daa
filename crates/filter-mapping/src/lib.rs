//! Filter Mapping - dashboard filter to card column mapping resolution
//!
//! This library decides which columns of a dashboard card a dashboard filter
//! can be bound to, keeps the resulting mapping configuration, and turns
//! submitted filter values into per-dashcard query parameters.
//!
//! # Architecture
//!
//! The library follows a pipeline architecture, one pass per dashcard per filter:
//! 1. **Extractor** - Converts a card's stored query into ordered query stages
//! 2. **Classifier** - Picks the columns compatible with a filter type, per stage
//! 3. **Resolver** - Renders labelled mapping options and applies filter values
//!
//! Questions keep one labelled group per contributing table or stage; models
//! flatten their provenance into a single unlabelled group.

pub mod classify;
pub mod dashboard;
pub mod error;
pub mod execution;
pub mod expressions;
pub mod helper;
pub mod metadata;
pub mod options;
pub mod query;
pub mod resolver;
pub mod stages;
pub mod surface;
pub mod types;

pub use classify::{classify, classify_with_options, Candidate, CandidateBucket};
pub use dashboard::{
    Dashboard, DashboardFilter, DashboardId, DashboardMode, Dashcard, DashcardId, FilterValue,
    FilterValues, MappingState, ParameterMapping,
};
pub use error::{Error, Result};
pub use execution::{
    refresh, DashcardOutcome, ExecutionError, QueryExecutor, QueryResult, RefreshReport,
};
pub use expressions::Expression;
pub use helper::find_new_name;
pub use metadata::{Field, MappingMetadata, Metadata, MetadataError, Table};
pub use options::{DuplicateJoinPolicy, ResolverOptions};
pub use query::{
    Aggregation, Card, CardId, CardKind, CardVariant, FieldRef, Join, Query, Source,
    StageDefinition, TemporalUnit,
};
pub use resolver::{
    merge_by_label, ApplyPlan, DashcardMappingOption, MappingColumn, QueryParameter, Resolver,
    StaleMapping, StaleReason,
};
pub use stages::{
    extract_stages, extract_stages_with_options, ColumnKey, ColumnOrigin, ColumnRef,
    MappingTarget, QueryStage, StagePipeline,
};
pub use surface::{DashcardRequest, HttpMethod, Surface};
pub use types::{FilterType, SemanticType};

/// Mapping options of a saved card for a filter type.
///
/// # Example
/// ```
/// use filter_mapping::{
///     mapping_options, Card, Field, FilterType, MappingMetadata, Query, SemanticType, Source,
///     Table,
/// };
///
/// let metadata = MappingMetadata::new()
///     .with_table(
///         Table::new("orders", "Orders")
///             .field(Field::new("Total", SemanticType::Number))
///             .field(Field::new("Created At", SemanticType::Date)),
///     )
///     .unwrap()
///     .with_card(Card::question(1, "Orders", Query::new(Source::table("orders"))));
///
/// let options = mapping_options(&metadata, 1, FilterType::Date).unwrap();
/// assert_eq!(options[0].label.as_deref(), Some("Orders"));
/// assert_eq!(options[0].column_names(), vec!["Created At"]);
/// ```
pub fn mapping_options(
    metadata: &dyn Metadata,
    card_id: CardId,
    filter_type: FilterType,
) -> Result<Vec<DashcardMappingOption>> {
    let resolver = Resolver::new(metadata);
    let dashcard = Dashcard { id: 0, card_id };
    let filter = DashboardFilter::new("", "", filter_type);
    resolver.resolve(&dashcard, &filter)
}

/// Mapping options as JSON, from a JSON metadata snapshot.
///
/// # Arguments
/// * `metadata_json` - Tables and cards, as accepted by [`MappingMetadata::from_json`]
/// * `card_id` - The card whose columns are offered
/// * `filter_type` - Filter type name, e.g. `"date"`
pub fn mapping_options_json(metadata_json: &str, card_id: CardId, filter_type: &str) -> Result<String> {
    let metadata = MappingMetadata::from_json(metadata_json)?;
    let filter_type: FilterType = serde_json::from_value(serde_json::Value::String(filter_type.to_string()))?;
    let options = mapping_options(&metadata, card_id, filter_type)?;
    Ok(serde_json::to_string(&options)?)
}
