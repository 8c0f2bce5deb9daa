//! Query Stage Extraction
//!
//! Turns a card's stored query into an ordered sequence of [`QueryStage`]s.
//! Each stage enumerates the columns flowing in from its source (or from the
//! previous stage), the columns of its explicit and implicit joins, its custom
//! columns, and the breakout and aggregation outputs it produces.
//!
//! Cards built on other cards are flattened: the source card is extracted
//! recursively and only its final output is visible, labelled with the source
//! card's name.

use crate::error::{Error, Result};
use crate::expressions::{aggregation_type, infer_type};
use crate::helper::{find_new_name, summaries_label};
use crate::metadata::Metadata;
use crate::options::ResolverOptions;
use crate::query::{
    fk_label, Card, CardId, CardVariant, FieldRef, FieldSource, Source, StageDefinition,
};
use crate::types::SemanticType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
#[cfg(feature = "bindings")]
use ts_rs::TS;

/// How a column entered its stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnOrigin {
    /// The source table/card, or the previous stage
    Source,
    /// An explicit join; `ordinal` is the join's position within the stage
    Join { alias: String, ordinal: usize },
    /// Reached through a foreign-key field of the stage input
    Implicit { via: String },
    Custom,
    Breakout,
    Aggregation,
}

/// A column of a query stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Originating table, model or join label; `None` for derived columns
    pub table: Option<String>,
    /// Display name
    pub name: String,
    pub semantic_type: SemanticType,
    pub origin: ColumnOrigin,
    /// Table this column references, for foreign keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fk_target: Option<String>,
}

impl ColumnRef {
    fn join_alias(&self) -> Option<&str> {
        match &self.origin {
            ColumnOrigin::Join { alias, .. } => Some(alias),
            _ => None,
        }
    }

    fn implicit_via(&self) -> Option<&str> {
        match &self.origin {
            ColumnOrigin::Implicit { via } => Some(via),
            _ => None,
        }
    }
}

/// Persisted identifier of a column within one stage.
///
/// `occurrence` tells apart columns sharing a label and a name, which happens
/// when the same table is traversed twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
pub struct ColumnKey {
    pub source: Option<String>,
    pub name: String,
    #[serde(default)]
    pub occurrence: usize,
}

impl ColumnKey {
    pub fn new(source: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            source: source.map(str::to_string),
            name: name.into(),
            occurrence: 0,
        }
    }

    pub fn with_occurrence(mut self, occurrence: usize) -> Self {
        self.occurrence = occurrence;
        self
    }
}

impl std::fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "{}.", source)?;
        }
        write!(f, "{}", self.name)?;
        if self.occurrence > 0 {
            write!(f, "#{}", self.occurrence)?;
        }
        Ok(())
    }
}

/// The column a filter is bound to: a stage index and a column key.
///
/// A stage index equal to the number of stages addresses the filter stage
/// appended on top of the final output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
pub struct MappingTarget {
    pub stage: usize,
    pub column: ColumnKey,
}

impl MappingTarget {
    pub fn new(stage: usize, column: ColumnKey) -> Self {
        Self { stage, column }
    }
}

/// Pair every column with its key, numbering repeated (label, name) pairs
pub fn keyed_columns<'a, I>(columns: I) -> Vec<(ColumnKey, &'a ColumnRef)>
where
    I: IntoIterator<Item = &'a ColumnRef>,
{
    let mut seen: Vec<(Option<&str>, &str)> = Vec::new();
    columns
        .into_iter()
        .map(|column| {
            let id = (column.table.as_deref(), column.name.as_str());
            let occurrence = seen.iter().filter(|s| **s == id).count();
            seen.push(id);
            let key = ColumnKey::new(column.table.as_deref(), column.name.clone())
                .with_occurrence(occurrence);
            (key, column)
        })
        .collect()
}

/// One stage of an extracted query pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStage {
    pub index: usize,
    /// Label of the input bucket: the source name for stage 0, `Summaries`
    /// after a summarizing stage
    pub input_label: Option<String>,
    /// The input came unchanged from an unsummarized stage
    pub passthrough: bool,
    pub input: Vec<ColumnRef>,
    pub joined: Vec<ColumnRef>,
    pub implicit: Vec<ColumnRef>,
    pub custom: Vec<ColumnRef>,
    pub breakouts: Vec<ColumnRef>,
    pub aggregations: Vec<ColumnRef>,
    /// `k` when this is the k-th summarizing stage of the pipeline
    pub summary_ordinal: Option<usize>,
}

impl QueryStage {
    fn new(index: usize, input_label: Option<String>, passthrough: bool, input: Vec<ColumnRef>) -> Self {
        Self {
            index,
            input_label,
            passthrough,
            input,
            joined: Vec::new(),
            implicit: Vec::new(),
            custom: Vec::new(),
            breakouts: Vec::new(),
            aggregations: Vec::new(),
            summary_ordinal: None,
        }
    }

    /// Aggregations or breakouts replace the raw columns for the next stage
    pub fn is_summarized(&self) -> bool {
        self.summary_ordinal.is_some()
    }

    /// Columns a filter placed at this stage can see
    pub fn exposed(&self) -> impl Iterator<Item = &ColumnRef> {
        self.input
            .iter()
            .chain(self.joined.iter())
            .chain(self.implicit.iter())
            .chain(self.custom.iter())
    }

    /// Columns handed to the next stage
    pub fn outputs(&self) -> Vec<ColumnRef> {
        if self.is_summarized() {
            self.breakouts
                .iter()
                .chain(self.aggregations.iter())
                .cloned()
                .collect()
        } else {
            self.input
                .iter()
                .chain(self.joined.iter())
                .chain(self.custom.iter())
                .cloned()
                .collect()
        }
    }

    /// Resolve a field reference against this stage
    pub fn resolve_field(&self, field: &FieldRef) -> Option<&ColumnRef> {
        match &field.source {
            FieldSource::Stage => self
                .input
                .iter()
                .chain(self.custom.iter())
                .find(|c| c.name == field.name),
            FieldSource::Join { alias } => self
                .joined
                .iter()
                .find(|c| c.join_alias() == Some(alias.as_str()) && c.name == field.name),
            FieldSource::Implicit { via } => self
                .implicit
                .iter()
                .find(|c| c.implicit_via() == Some(via.as_str()) && c.name == field.name),
        }
    }

    /// Exposed columns with their keys, tagged with the group they belong to
    pub fn keyed_exposed(&self) -> Vec<(ColumnGroup, ColumnKey, &ColumnRef)> {
        let groups = std::iter::repeat(ColumnGroup::Input)
            .take(self.input.len())
            .chain(std::iter::repeat(ColumnGroup::Joined).take(self.joined.len()))
            .chain(std::iter::repeat(ColumnGroup::Implicit).take(self.implicit.len()))
            .chain(std::iter::repeat(ColumnGroup::Custom).take(self.custom.len()));
        groups
            .zip(keyed_columns(self.exposed()))
            .map(|(group, (key, column))| (group, key, column))
            .collect()
    }

    /// Find an exposed column by key
    pub fn find(&self, key: &ColumnKey) -> Option<&ColumnRef> {
        keyed_columns(self.exposed())
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, c)| c)
    }
}

/// The part of a stage an exposed column belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnGroup {
    Input,
    Joined,
    Implicit,
    Custom,
}

/// Look up the column a mapping target points at.
///
/// Returns `None` when the target no longer exists, e.g. after the query was
/// edited.
pub fn target_column(stages: &[QueryStage], target: &MappingTarget) -> Option<ColumnRef> {
    if target.stage < stages.len() {
        return stages[target.stage].find(&target.column).cloned();
    }
    if target.stage == stages.len() {
        let outputs = stages.last()?.outputs();
        return keyed_columns(&outputs)
            .into_iter()
            .find(|(k, _)| *k == target.column)
            .map(|(_, c)| c.clone());
    }
    None
}

/// A card's extracted stages together with its provenance variant.
///
/// This is what the query executor receives for a dashcard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePipeline {
    pub card_id: CardId,
    pub variant: CardVariant,
    pub stages: Vec<QueryStage>,
}

impl StagePipeline {
    pub fn extract(card: &Card, metadata: &dyn Metadata, options: &ResolverOptions) -> Result<Self> {
        let variant = card.variant(metadata)?;
        let stages = extract_stages_with_options(card, metadata, options)?;
        Ok(Self {
            card_id: card.id,
            variant,
            stages,
        })
    }

    pub fn target_column(&self, target: &MappingTarget) -> Option<ColumnRef> {
        target_column(&self.stages, target)
    }
}

/// Extract the ordered stages of a card's query with default options
pub fn extract_stages(card: &Card, metadata: &dyn Metadata) -> Result<Vec<QueryStage>> {
    extract_stages_with_options(card, metadata, &ResolverOptions::default())
}

/// Extract the ordered stages of a card's query.
///
/// Fails with [`Error::InvalidQueryGraph`] when the card graph is cyclic,
/// deeper than `max_source_depth`, or references a missing card, table or
/// field.
pub fn extract_stages_with_options(
    card: &Card,
    metadata: &dyn Metadata,
    options: &ResolverOptions,
) -> Result<Vec<QueryStage>> {
    let mut extractor = Extractor {
        metadata,
        options,
        stack: Vec::new(),
    };
    let stages = extractor.card_stages(card)?;
    tracing::debug!(card = card.id, stages = stages.len(), "extracted query stages");
    Ok(stages)
}

struct Extractor<'a> {
    metadata: &'a dyn Metadata,
    options: &'a ResolverOptions,
    /// Cards currently being extracted, outermost first
    stack: Vec<CardId>,
}

impl<'a> Extractor<'a> {
    fn card_stages(&mut self, card: &Card) -> Result<Vec<QueryStage>> {
        if self.stack.contains(&card.id) {
            let mut path: Vec<String> = self.stack.iter().map(|id| id.to_string()).collect();
            path.push(card.id.to_string());
            let root = self.stack[0];
            return Err(Error::invalid_graph(
                root,
                format!("cycle detected: {}", path.join(" → ")),
            ));
        }
        if self.stack.len() >= self.options.max_source_depth {
            return Err(Error::invalid_graph(
                self.stack[0],
                format!(
                    "source chain deeper than {} cards",
                    self.options.max_source_depth
                ),
            ));
        }

        self.stack.push(card.id);
        let stages = self.query_stages(card);
        self.stack.pop();
        stages
    }

    /// Columns of a source, labelled with the source's display name
    fn source_columns(&mut self, owner: CardId, source: &Source) -> Result<(String, Vec<ColumnRef>)> {
        match source {
            Source::Table { table } => {
                let table = self.metadata.table(table).map_err(|_| {
                    Error::invalid_graph(owner, format!("table {} does not exist", table))
                })?;
                let columns = table
                    .visible_fields()
                    .map(|field| ColumnRef {
                        table: Some(table.display_name.clone()),
                        name: field.name.clone(),
                        semantic_type: field.semantic_type,
                        origin: ColumnOrigin::Source,
                        fk_target: field.fk_target.clone(),
                    })
                    .collect();
                Ok((table.display_name.clone(), columns))
            }
            Source::Card { card_id } => {
                let metadata = self.metadata;
                let source_card = metadata.card(*card_id).map_err(|_| {
                    Error::invalid_graph(owner, format!("card {} does not exist", card_id))
                })?;
                let stages = self.card_stages(source_card)?;
                let columns = stages
                    .last()
                    .map(QueryStage::outputs)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|column| ColumnRef {
                        table: Some(source_card.name.clone()),
                        origin: ColumnOrigin::Source,
                        ..column
                    })
                    .collect();
                Ok((source_card.name.clone(), columns))
            }
        }
    }

    fn query_stages(&mut self, card: &Card) -> Result<Vec<QueryStage>> {
        let (source_label, source_columns) = self.source_columns(card.id, &card.query.source)?;

        let empty = [StageDefinition::default()];
        let definitions: &[StageDefinition] = if card.query.stages.is_empty() {
            &empty
        } else {
            &card.query.stages
        };

        let mut stages = Vec::with_capacity(definitions.len());
        let mut input = source_columns;
        let mut input_label = Some(source_label);
        let mut passthrough = false;
        let mut summaries = 0;

        for (index, definition) in definitions.iter().enumerate() {
            let mut stage = QueryStage::new(index, input_label.clone(), passthrough, input);

            self.add_joins(card.id, &mut stage, definition)?;
            self.add_implicit_joins(&mut stage);
            add_custom_columns(card.id, &mut stage, definition)?;
            add_breakouts(card.id, &mut stage, definition)?;
            add_aggregations(card.id, &mut stage, definition)?;

            if definition.is_summarized() {
                summaries += 1;
                stage.summary_ordinal = Some(summaries);
                input_label = Some(summaries_label(summaries));
                passthrough = false;
            } else {
                passthrough = true;
            }

            tracing::debug!(
                card = card.id,
                stage = index,
                input = stage.input.len(),
                joined = stage.joined.len(),
                implicit = stage.implicit.len(),
                custom = stage.custom.len(),
                summarized = stage.is_summarized(),
                "extracted stage"
            );

            input = stage.outputs();
            stages.push(stage);
        }

        Ok(stages)
    }

    fn add_joins(&mut self, owner: CardId, stage: &mut QueryStage, definition: &StageDefinition) -> Result<()> {
        for (ordinal, join) in definition.joins.iter().enumerate() {
            let (_, columns) = self.source_columns(owner, &join.source)?;
            let columns: Vec<ColumnRef> = columns
                .into_iter()
                .map(|column| ColumnRef {
                    table: Some(join.alias.clone()),
                    origin: ColumnOrigin::Join {
                        alias: join.alias.clone(),
                        ordinal,
                    },
                    fk_target: None,
                    ..column
                })
                .collect();

            for condition in &join.conditions {
                let left = stage.resolve_field(&condition.left).ok_or_else(|| {
                    Error::invalid_graph(
                        owner,
                        format!(
                            "join {} references unknown field {}",
                            join.alias,
                            condition.left.display_name()
                        ),
                    )
                })?;
                check_unit(owner, &condition.left, left)?;

                let right_matches_join = match &condition.right.source {
                    FieldSource::Stage => true,
                    FieldSource::Join { alias } => alias == &join.alias,
                    FieldSource::Implicit { .. } => false,
                };
                let right = columns
                    .iter()
                    .find(|c| right_matches_join && c.name == condition.right.name)
                    .ok_or_else(|| {
                        Error::invalid_graph(
                            owner,
                            format!(
                                "join {} references unknown joined field {}",
                                join.alias, condition.right.name
                            ),
                        )
                    })?;
                check_unit(owner, &condition.right, right)?;
            }

            stage.joined.extend(columns);
        }
        Ok(())
    }

    fn add_implicit_joins(&self, stage: &mut QueryStage) {
        let mut implicit = Vec::new();
        for column in &stage.input {
            let Some(target) = &column.fk_target else {
                continue;
            };
            let table = match self.metadata.table(target) {
                Ok(table) => table,
                Err(_) => {
                    tracing::warn!(
                        field = %column.name,
                        target = %target,
                        "foreign key points at an unknown table, skipping implicit join"
                    );
                    continue;
                }
            };
            let label = fk_label(&column.name);
            implicit.extend(table.visible_fields().map(|field| ColumnRef {
                table: Some(label.clone()),
                name: field.name.clone(),
                semantic_type: field.semantic_type,
                origin: ColumnOrigin::Implicit {
                    via: column.name.clone(),
                },
                fk_target: None,
            }));
        }
        stage.implicit = implicit;
    }
}

fn add_custom_columns(owner: CardId, stage: &mut QueryStage, definition: &StageDefinition) -> Result<()> {
    for custom in &definition.expressions {
        let semantic_type = infer_type(&custom.expression, &|f: &FieldRef| {
            stage.resolve_field(f).map(|c| c.semantic_type)
        })
        .map_err(|field| {
            Error::invalid_graph(
                owner,
                format!(
                    "custom column {} references unknown field {}",
                    custom.name,
                    field.display_name()
                ),
            )
        })?;

        let taken: HashSet<String> = stage
            .input
            .iter()
            .chain(stage.custom.iter())
            .map(|c| c.name.clone())
            .collect();
        stage.custom.push(ColumnRef {
            table: None,
            name: find_new_name(&taken, &custom.name),
            semantic_type,
            origin: ColumnOrigin::Custom,
            fk_target: None,
        });
    }
    Ok(())
}

fn add_breakouts(owner: CardId, stage: &mut QueryStage, definition: &StageDefinition) -> Result<()> {
    for field in &definition.breakouts {
        let column = stage.resolve_field(field).ok_or_else(|| {
            Error::invalid_graph(
                owner,
                format!("breakout references unknown field {}", field.display_name()),
            )
        })?;
        check_unit(owner, field, column)?;

        let (semantic_type, fk_target) = match field.temporal_unit {
            Some(unit) if unit.is_extraction() => (SemanticType::Number, None),
            Some(_) => (SemanticType::Date, None),
            None => (column.semantic_type, column.fk_target.clone()),
        };
        let breakout = ColumnRef {
            table: None,
            name: field.display_name(),
            semantic_type,
            origin: ColumnOrigin::Breakout,
            fk_target,
        };
        stage.breakouts.push(breakout);
    }
    Ok(())
}

fn add_aggregations(owner: CardId, stage: &mut QueryStage, definition: &StageDefinition) -> Result<()> {
    for aggregation in &definition.aggregations {
        let semantic_type = aggregation_type(aggregation, &|f: &FieldRef| {
            stage.resolve_field(f).map(|c| c.semantic_type)
        })
        .map_err(|field| {
            Error::invalid_graph(
                owner,
                format!(
                    "aggregation {} references unknown field {}",
                    aggregation.display_name(),
                    field.display_name()
                ),
            )
        })?;

        let taken: HashSet<String> = stage
            .breakouts
            .iter()
            .chain(stage.aggregations.iter())
            .map(|c| c.name.clone())
            .collect();
        stage.aggregations.push(ColumnRef {
            table: None,
            name: find_new_name(&taken, &aggregation.display_name()),
            semantic_type,
            origin: ColumnOrigin::Aggregation,
            fk_target: None,
        });
    }
    Ok(())
}

/// Temporal buckets only apply to date columns
fn check_unit(owner: CardId, field: &FieldRef, column: &ColumnRef) -> Result<()> {
    match field.temporal_unit {
        Some(unit) if column.semantic_type != SemanticType::Date => Err(Error::invalid_graph(
            owner,
            format!(
                "temporal unit {} applied to non-date field {}",
                unit.display_name(),
                column.name
            ),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::Expression;
    use crate::metadata::{Field, MappingMetadata, Table};
    use crate::query::{Aggregation, Join, Query, TemporalUnit};

    fn metadata() -> MappingMetadata {
        MappingMetadata::new()
            .with_table(
                Table::new("orders", "Orders")
                    .field(Field::new("ID", SemanticType::Identifier))
                    .field(Field::foreign_key("Product ID", "products"))
                    .field(Field::new("Total", SemanticType::Number))
                    .field(Field::new("Created At", SemanticType::Date)),
            )
            .unwrap()
            .with_table(
                Table::new("products", "Products")
                    .field(Field::new("ID", SemanticType::Identifier))
                    .field(Field::new("Category", SemanticType::Category))
                    .field(Field::new("Created At", SemanticType::Date)),
            )
            .unwrap()
    }

    fn names(columns: &[ColumnRef]) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_empty_query_is_one_stage() {
        let card = Card::question(1, "Orders", Query::new(Source::table("orders")));
        let stages = extract_stages(&card, &metadata()).unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].input_label.as_deref(), Some("Orders"));
        assert_eq!(
            names(&stages[0].input),
            vec!["ID", "Product ID", "Total", "Created At"]
        );
        // Implicit join through Product ID
        assert_eq!(names(&stages[0].implicit), vec!["ID", "Category", "Created At"]);
        assert_eq!(stages[0].implicit[0].table.as_deref(), Some("Product"));
    }

    #[test]
    fn test_summarized_stage_replaces_columns() {
        let query = Query::new(Source::table("orders"))
            .stage(
                StageDefinition::new()
                    .join(
                        Join::new("Products", Source::table("products"))
                            .on(FieldRef::stage("Product ID"), FieldRef::stage("ID")),
                    )
                    .aggregate(Aggregation::Count)
                    .aggregate(Aggregation::Sum {
                        field: FieldRef::stage("Total"),
                    })
                    .breakout(FieldRef::stage("Created At").with_unit(TemporalUnit::Month))
                    .breakout(FieldRef::joined("Products", "Category")),
            )
            .stage(StageDefinition::new());
        let card = Card::question(1, "Q", query);
        let stages = extract_stages(&card, &metadata()).unwrap();

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].summary_ordinal, Some(1));
        assert_eq!(
            names(&stages[1].input),
            vec!["Created At: Month", "Products → Category", "Count", "Sum of Total"]
        );
        assert_eq!(stages[1].input_label.as_deref(), Some("Summaries"));
        assert!(stages[1].input.iter().all(|c| c.table.is_none()));
        assert_eq!(stages[1].input[0].semantic_type, SemanticType::Date);
        assert_eq!(stages[1].input[1].semantic_type, SemanticType::Category);
        assert!(!stages[1].passthrough);
    }

    #[test]
    fn test_extraction_unit_is_number() {
        let query = Query::new(Source::table("orders")).stage(
            StageDefinition::new()
                .breakout(FieldRef::stage("Created At").with_unit(TemporalUnit::DayOfWeek)),
        );
        let stages = extract_stages(&Card::question(1, "Q", query), &metadata()).unwrap();
        assert_eq!(stages[0].breakouts[0].name, "Created At: Day of week");
        assert_eq!(stages[0].breakouts[0].semantic_type, SemanticType::Number);
    }

    #[test]
    fn test_custom_column_names_are_unique() {
        let query = Query::new(Source::table("orders")).stage(
            StageDefinition::new()
                .expression("Total", Expression::field(FieldRef::stage("Total")).mul(Expression::number(2.0)))
                .expression("Day", Expression::function("day", [Expression::field(FieldRef::stage("Created At"))])),
        );
        let stages = extract_stages(&Card::question(1, "Q", query), &metadata()).unwrap();
        assert_eq!(names(&stages[0].custom), vec!["Total_2", "Day"]);
        assert_eq!(stages[0].custom[1].semantic_type, SemanticType::Number);
    }

    #[test]
    fn test_card_source_is_flattened() {
        let base = Card::question(
            1,
            "Base Orders Question",
            Query::new(Source::table("orders")).stage(
                StageDefinition::new().join(Join::new("Products", Source::table("products"))),
            ),
        );
        let meta = metadata().with_card(base);
        let card = Card::model(2, "On Base", Query::new(Source::card(1)));
        let stages = extract_stages(&card, &meta).unwrap();
        assert_eq!(stages[0].input.len(), 7);
        assert!(stages[0]
            .input
            .iter()
            .all(|c| c.table.as_deref() == Some("Base Orders Question")));
        // Foreign keys survive flattening
        assert_eq!(names(&stages[0].implicit), vec!["ID", "Category", "Created At"]);
    }

    #[test]
    fn test_cycle_is_invalid_graph() {
        let meta = metadata()
            .with_card(Card::question(1, "A", Query::new(Source::card(2))))
            .with_card(Card::question(2, "B", Query::new(Source::card(1))));
        let card = meta.card(1).unwrap().clone();
        let err = extract_stages(&card, &meta).unwrap_err();
        match err {
            Error::InvalidQueryGraph { card, message } => {
                assert_eq!(card, 1);
                assert_eq!(message, "cycle detected: 1 → 2 → 1");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_cycle_through_join_is_invalid_graph() {
        let meta = metadata().with_card(Card::question(
            1,
            "Self Join",
            Query::new(Source::table("orders"))
                .stage(StageDefinition::new().join(Join::new("Me", Source::card(1)))),
        ));
        let card = meta.card(1).unwrap().clone();
        assert!(matches!(
            extract_stages(&card, &meta),
            Err(Error::InvalidQueryGraph { .. })
        ));
    }

    #[test]
    fn test_dangling_references() {
        let missing_card = Card::question(1, "Q", Query::new(Source::card(99)));
        assert!(matches!(
            extract_stages(&missing_card, &metadata()),
            Err(Error::InvalidQueryGraph { .. })
        ));

        let missing_field = Card::question(
            1,
            "Q",
            Query::new(Source::table("orders"))
                .stage(StageDefinition::new().breakout(FieldRef::stage("Nope"))),
        );
        let err = extract_stages(&missing_field, &metadata()).unwrap_err();
        assert!(err.to_string().contains("breakout references unknown field Nope"));

        let bad_join = Card::question(
            1,
            "Q",
            Query::new(Source::table("orders")).stage(StageDefinition::new().join(
                Join::new("Products", Source::table("products"))
                    .on(FieldRef::stage("Product ID"), FieldRef::stage("Price")),
            )),
        );
        assert!(extract_stages(&bad_join, &metadata()).is_err());
    }

    #[test]
    fn test_temporal_unit_on_number_is_invalid() {
        let card = Card::question(
            1,
            "Q",
            Query::new(Source::table("orders")).stage(
                StageDefinition::new().breakout(FieldRef::stage("Total").with_unit(TemporalUnit::Year)),
            ),
        );
        assert!(extract_stages(&card, &metadata()).is_err());
    }

    #[test]
    fn test_max_source_depth() {
        let meta = metadata()
            .with_card(Card::question(1, "A", Query::new(Source::table("orders"))))
            .with_card(Card::question(2, "B", Query::new(Source::card(1))))
            .with_card(Card::question(3, "C", Query::new(Source::card(2))));
        let card = meta.card(3).unwrap().clone();
        let options = ResolverOptions::new().with_max_source_depth(2);
        assert!(extract_stages_with_options(&card, &meta, &options).is_err());
        assert!(extract_stages(&card, &meta).is_ok());
    }

    #[test]
    fn test_keyed_columns_number_duplicates() {
        let column = ColumnRef {
            table: Some("Product".to_string()),
            name: "Category".to_string(),
            semantic_type: SemanticType::Category,
            origin: ColumnOrigin::Source,
            fk_target: None,
        };
        let columns = vec![column.clone(), column];
        let keyed = keyed_columns(&columns);
        assert_eq!(keyed[0].0.occurrence, 0);
        assert_eq!(keyed[1].0.occurrence, 1);
        assert_eq!(keyed[1].0.to_string(), "Product.Category#1");
    }
}
