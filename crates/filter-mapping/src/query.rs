//! Stored Query Definitions
//!
//! The persisted shape of a card's query: a source (table or saved card)
//! followed by an ordered list of stage definitions. Each stage may join other
//! sources, define custom columns and summarize with aggregations and
//! breakouts.

use crate::error::{Error, Result};
use crate::expressions::Expression;
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
#[cfg(feature = "bindings")]
use ts_rs::TS;

/// Identifier of a saved card (question or model)
pub type CardId = u32;

/// Whether a saved card is a question or a curated model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "bindings", ts(export))]
pub enum CardKind {
    Question,
    Model,
}

/// A saved card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub name: String,
    pub kind: CardKind,
    pub query: Query,
}

impl Card {
    pub fn new(id: CardId, name: impl Into<String>, kind: CardKind, query: Query) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            query,
        }
    }

    pub fn question(id: CardId, name: impl Into<String>, query: Query) -> Self {
        Self::new(id, name, CardKind::Question, query)
    }

    pub fn model(id: CardId, name: impl Into<String>, query: Query) -> Self {
        Self::new(id, name, CardKind::Model, query)
    }

    pub fn is_model(&self) -> bool {
        self.kind == CardKind::Model
    }

    /// Determine the provenance variant of this card.
    ///
    /// Only the immediate source is inspected: a question built on a model
    /// built on a question is model-based.
    pub fn variant(&self, metadata: &dyn Metadata) -> Result<CardVariant> {
        let upstream = match &self.query.source {
            Source::Table { .. } => None,
            Source::Card { card_id } => {
                let source = metadata.card(*card_id).map_err(|_| {
                    Error::invalid_graph(self.id, format!("source card {} does not exist", card_id))
                })?;
                Some(source.kind)
            }
        };
        Ok(CardVariant::from_kinds(upstream, self.kind))
    }
}

/// Provenance chain of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardVariant {
    TableBasedQuestion,
    TableBasedModel,
    QuestionBasedQuestion,
    QuestionBasedModel,
    ModelBasedQuestion,
    ModelBasedModel,
}

impl CardVariant {
    /// Combine the kind of the upstream card (if any) with the card's own kind
    pub fn from_kinds(upstream: Option<CardKind>, kind: CardKind) -> Self {
        match (upstream, kind) {
            (None, CardKind::Question) => CardVariant::TableBasedQuestion,
            (None, CardKind::Model) => CardVariant::TableBasedModel,
            (Some(CardKind::Question), CardKind::Question) => CardVariant::QuestionBasedQuestion,
            (Some(CardKind::Question), CardKind::Model) => CardVariant::QuestionBasedModel,
            (Some(CardKind::Model), CardKind::Question) => CardVariant::ModelBasedQuestion,
            (Some(CardKind::Model), CardKind::Model) => CardVariant::ModelBasedModel,
        }
    }

    /// Models flatten provenance labels into a single unlabeled bucket
    pub fn is_model(self) -> bool {
        matches!(
            self,
            CardVariant::TableBasedModel
                | CardVariant::QuestionBasedModel
                | CardVariant::ModelBasedModel
        )
    }
}

/// Where the rows of a query (or a join) come from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    Table { table: String },
    Card { card_id: CardId },
}

impl Source {
    pub fn table(name: impl Into<String>) -> Self {
        Source::Table { table: name.into() }
    }

    pub fn card(card_id: CardId) -> Self {
        Source::Card { card_id }
    }
}

/// A card's query: a source and its ordered stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub source: Source,
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

impl Query {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            stages: Vec::new(),
        }
    }

    /// Append a stage definition
    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }
}

/// One stage of a query pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub expressions: Vec<CustomColumn>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub breakouts: Vec<FieldRef>,
}

impl StageDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn expression(mut self, name: impl Into<String>, expression: Expression) -> Self {
        self.expressions.push(CustomColumn {
            name: name.into(),
            expression,
        });
        self
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn breakout(mut self, field: FieldRef) -> Self {
        self.breakouts.push(field);
        self
    }

    /// A stage with aggregations or breakouts replaces its raw columns
    pub fn is_summarized(&self) -> bool {
        !self.aggregations.is_empty() || !self.breakouts.is_empty()
    }
}

/// An explicit join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    /// Display name of the joined source; also the label of its columns
    pub alias: String,
    pub source: Source,
    #[serde(default)]
    pub conditions: Vec<JoinCondition>,
}

impl Join {
    pub fn new(alias: impl Into<String>, source: Source) -> Self {
        Self {
            alias: alias.into(),
            source,
            conditions: Vec::new(),
        }
    }

    /// Add an equality condition. `right` is resolved against the joined source.
    pub fn on(mut self, left: FieldRef, right: FieldRef) -> Self {
        self.conditions.push(JoinCondition { left, right });
        self
    }
}

/// `left = right` where `left` lives in the stage and `right` in the joined source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left: FieldRef,
    pub right: FieldRef,
}

/// A named derived column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomColumn {
    pub name: String,
    pub expression: Expression,
}

/// Which part of the stage a field reference points into
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldSource {
    /// The stage input or one of its custom columns
    #[default]
    Stage,
    /// Columns of an explicit join, by alias
    Join { alias: String },
    /// Columns reachable through a foreign-key field of the stage input
    Implicit { via: String },
}

/// A reference to a column from within a stage definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    #[serde(default)]
    pub source: FieldSource,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_unit: Option<TemporalUnit>,
}

impl FieldRef {
    pub fn stage(name: impl Into<String>) -> Self {
        Self {
            source: FieldSource::Stage,
            name: name.into(),
            temporal_unit: None,
        }
    }

    pub fn joined(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: FieldSource::Join {
                alias: alias.into(),
            },
            name: name.into(),
            temporal_unit: None,
        }
    }

    pub fn implicit(via: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: FieldSource::Implicit { via: via.into() },
            name: name.into(),
            temporal_unit: None,
        }
    }

    /// Bucket the field by a temporal unit
    pub fn with_unit(mut self, unit: TemporalUnit) -> Self {
        self.temporal_unit = Some(unit);
        self
    }

    /// Display name as shown for breakouts and aggregation arguments,
    /// e.g. `User → Created At: Year`
    pub fn display_name(&self) -> String {
        let mut name = match &self.source {
            FieldSource::Stage => self.name.clone(),
            FieldSource::Join { alias } => format!("{} → {}", alias, self.name),
            FieldSource::Implicit { via } => format!("{} → {}", fk_label(via), self.name),
        };
        if let Some(unit) = self.temporal_unit {
            name.push_str(": ");
            name.push_str(unit.display_name());
        }
        name
    }
}

/// Label used for columns reached through a foreign key: `User ID` → `User`
pub fn fk_label(field_name: &str) -> String {
    let trimmed = field_name.trim();
    for suffix in [" ID", " Id", "_id", "_ID"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Temporal bucketing of a date breakout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
    MinuteOfHour,
    HourOfDay,
    DayOfWeek,
    DayOfMonth,
    DayOfYear,
    WeekOfYear,
    MonthOfYear,
    QuarterOfYear,
}

impl TemporalUnit {
    pub fn display_name(self) -> &'static str {
        match self {
            TemporalUnit::Minute => "Minute",
            TemporalUnit::Hour => "Hour",
            TemporalUnit::Day => "Day",
            TemporalUnit::Week => "Week",
            TemporalUnit::Month => "Month",
            TemporalUnit::Quarter => "Quarter",
            TemporalUnit::Year => "Year",
            TemporalUnit::MinuteOfHour => "Minute of hour",
            TemporalUnit::HourOfDay => "Hour of day",
            TemporalUnit::DayOfWeek => "Day of week",
            TemporalUnit::DayOfMonth => "Day of month",
            TemporalUnit::DayOfYear => "Day of year",
            TemporalUnit::WeekOfYear => "Week of year",
            TemporalUnit::MonthOfYear => "Month of year",
            TemporalUnit::QuarterOfYear => "Quarter of year",
        }
    }

    /// Extraction units yield integers rather than truncated dates
    pub fn is_extraction(self) -> bool {
        matches!(
            self,
            TemporalUnit::MinuteOfHour
                | TemporalUnit::HourOfDay
                | TemporalUnit::DayOfWeek
                | TemporalUnit::DayOfMonth
                | TemporalUnit::DayOfYear
                | TemporalUnit::WeekOfYear
                | TemporalUnit::MonthOfYear
                | TemporalUnit::QuarterOfYear
        )
    }
}

/// An aggregation of a summarizing stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregation {
    Count,
    Sum { field: FieldRef },
    Average { field: FieldRef },
    Min { field: FieldRef },
    Max { field: FieldRef },
    Distinct { field: FieldRef },
    /// A custom aggregation expression with a user-supplied name, e.g. `5 * Count`
    Named { name: String, expression: Expression },
}

impl Aggregation {
    /// Display name, e.g. `Sum of Total`
    pub fn display_name(&self) -> String {
        match self {
            Aggregation::Count => "Count".to_string(),
            Aggregation::Sum { field } => format!("Sum of {}", field.display_name()),
            Aggregation::Average { field } => format!("Average of {}", field.display_name()),
            Aggregation::Min { field } => format!("Min of {}", field.display_name()),
            Aggregation::Max { field } => format!("Max of {}", field.display_name()),
            Aggregation::Distinct { field } => {
                format!("Distinct values of {}", field.display_name())
            }
            Aggregation::Named { name, .. } => name.clone(),
        }
    }

    /// The field this aggregation reads, if it reads exactly one
    pub fn field(&self) -> Option<&FieldRef> {
        match self {
            Aggregation::Sum { field }
            | Aggregation::Average { field }
            | Aggregation::Min { field }
            | Aggregation::Max { field }
            | Aggregation::Distinct { field } => Some(field),
            Aggregation::Count | Aggregation::Named { .. } => None,
        }
    }
}
