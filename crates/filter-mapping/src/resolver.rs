//! Mapping Resolver
//!
//! Turns classified candidate buckets into the mapping options shown by the
//! dashboard editor, edits a dashboard's mapping configuration, and turns
//! submitted filter values into per-dashcard query parameters.
//!
//! Edit mode is never ambient: every mutation takes a [`DashboardMode`].

use crate::classify::classify_with_options;
use crate::dashboard::{
    Dashboard, Dashcard, DashcardId, DashboardFilter, DashboardMode, FilterValue, FilterValues,
    MappingState, ParameterMapping,
};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::options::ResolverOptions;
use crate::query::CardId;
use crate::stages::{MappingTarget, StagePipeline};
use crate::types::{FilterType, SemanticType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
#[cfg(feature = "bindings")]
use ts_rs::TS;

/// A column offered in the mapping picker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
pub struct MappingColumn {
    pub name: String,
    pub semantic_type: SemanticType,
    pub target: MappingTarget,
}

/// One labelled group of the mapping picker for a dashcard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
pub struct DashcardMappingOption {
    /// Provenance label; `None` when the card is a model
    pub label: Option<String>,
    pub stage: usize,
    pub columns: Vec<MappingColumn>,
}

impl DashcardMappingOption {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Merge options sharing a stage and a label into one section, placed where
/// the first of them was. Columns of repeated traversals appear twice.
pub fn merge_by_label(options: &[DashcardMappingOption]) -> Vec<DashcardMappingOption> {
    let mut merged: Vec<DashcardMappingOption> = Vec::with_capacity(options.len());
    for option in options {
        match merged
            .iter_mut()
            .find(|m| m.stage == option.stage && m.label == option.label)
        {
            Some(section) => section.columns.extend(option.columns.iter().cloned()),
            None => merged.push(option.clone()),
        }
    }
    merged
}

/// A filter value bound to one column of one dashcard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
pub struct QueryParameter {
    /// Filter id
    pub id: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub target: MappingTarget,
    pub value: FilterValue,
}

/// Why a persisted mapping can no longer be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    /// The dashcard was removed from the dashboard
    MissingDashcard,
    /// The dashcard now shows a different card
    CardChanged { card_id: CardId },
    /// The card's query can no longer be extracted
    InvalidCard { message: String },
    /// The target column is gone after a query edit
    MissingColumn,
    /// The target column changed type
    IncompatibleType { semantic_type: SemanticType },
}

/// A mapping skipped by [`Resolver::apply`] or removed by
/// [`Resolver::demote_stale_mappings`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleMapping {
    pub filter_id: String,
    pub dashcard_id: DashcardId,
    pub target: MappingTarget,
    #[serde(flatten)]
    pub reason: StaleReason,
}

/// What to fetch after submitting filter values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyPlan {
    /// Full parameter set of every affected dashcard
    pub parameters: BTreeMap<DashcardId, Vec<QueryParameter>>,
    /// Mappings skipped because their target is gone
    pub stale: Vec<StaleMapping>,
}

impl ApplyPlan {
    /// Dashcards that need one re-fetch each
    pub fn affected_dashcards(&self) -> Vec<DashcardId> {
        self.parameters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// Resolves mapping options and applies filter values for dashboards whose
/// cards are described by `metadata`.
pub struct Resolver<'a> {
    metadata: &'a dyn Metadata,
    options: ResolverOptions,
}

impl<'a> Resolver<'a> {
    /// Create a resolver with default options
    pub fn new(metadata: &'a dyn Metadata) -> Self {
        Self::with_options(metadata, ResolverOptions::default())
    }

    pub fn with_options(metadata: &'a dyn Metadata, options: ResolverOptions) -> Self {
        Self { metadata, options }
    }

    /// Extract the stage pipeline of a saved card
    pub fn pipeline(&self, card_id: CardId) -> Result<StagePipeline> {
        let card = self.metadata.card(card_id)?;
        StagePipeline::extract(card, self.metadata, &self.options)
    }

    /// Mapping options for one dashcard and one filter.
    ///
    /// An empty list means the dashcard cannot receive this filter. A card
    /// whose stored query is broken fails with [`Error::InvalidQueryGraph`].
    pub fn resolve(&self, dashcard: &Dashcard, filter: &DashboardFilter) -> Result<Vec<DashcardMappingOption>> {
        let pipeline = self.pipeline(dashcard.card_id)?;
        Ok(self.options_for(&pipeline, filter.filter_type))
    }

    fn options_for(&self, pipeline: &StagePipeline, filter_type: FilterType) -> Vec<DashcardMappingOption> {
        classify_with_options(filter_type, &pipeline.stages, pipeline.variant, &self.options)
            .into_iter()
            .map(|bucket| DashcardMappingOption {
                label: bucket.label,
                stage: bucket.stage,
                columns: bucket
                    .columns
                    .into_iter()
                    .map(|candidate| MappingColumn {
                        name: candidate.column.name,
                        semantic_type: candidate.column.semantic_type,
                        target: candidate.target,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Bind a filter to a dashcard column offered by [`Self::resolve`]
    pub fn map_column(
        &self,
        dashboard: &mut Dashboard,
        mode: DashboardMode,
        filter_id: &str,
        dashcard_id: DashcardId,
        target: MappingTarget,
    ) -> Result<MappingState> {
        dashboard.require_editing(mode)?;
        let dashcard = *dashboard.dashcard(dashcard_id)?;
        let filter = dashboard.filter(filter_id)?;

        let offered = self
            .resolve(&dashcard, filter)?
            .iter()
            .flat_map(|option| option.columns.iter())
            .any(|column| column.target == target);
        if !offered {
            return Err(Error::UnknownTarget {
                filter: filter_id.to_string(),
                stage: target.stage,
                column: target.column.to_string(),
            });
        }

        tracing::debug!(
            filter = filter_id,
            dashcard = dashcard_id,
            stage = target.stage,
            column = %target.column,
            "mapped filter"
        );
        let state = dashboard.filter_mut(filter_id)?.upsert_mapping(ParameterMapping {
            dashcard_id,
            card_id: dashcard.card_id,
            target,
        });
        Ok(state)
    }

    /// Remove a filter's binding to a dashcard
    pub fn unmap_column(
        &self,
        dashboard: &mut Dashboard,
        mode: DashboardMode,
        filter_id: &str,
        dashcard_id: DashcardId,
    ) -> Result<MappingState> {
        dashboard.require_editing(mode)?;
        let filter = dashboard.filter_mut(filter_id)?;
        let state = filter.remove_mapping(dashcard_id).ok_or_else(|| {
            Error::invalid_transition(
                filter_id,
                format!("filter is not mapped to dashcard {}", dashcard_id),
            )
        })?;
        tracing::debug!(filter = filter_id, dashcard = dashcard_id, ?state, "unmapped filter");
        Ok(state)
    }

    /// Turn submitted values into per-dashcard parameter sets.
    ///
    /// The affected dashcards are the ones [`Dashboard::submit`] would report
    /// for the same values, and it fails the same way. Each affected dashcard
    /// gets every filter with a value bound to it: the submitted value, or the
    /// one already applied. Stale mappings are skipped and reported rather
    /// than applied to the wrong column; a mapping of a submitted filter to a
    /// removed dashcard is reported without being fetched.
    pub fn apply(&self, dashboard: &Dashboard, values: &FilterValues) -> Result<ApplyPlan> {
        let affected = dashboard.affected_by(values)?;
        let mut plan = self.plan(dashboard, values, affected);

        for id in values.keys() {
            let filter = dashboard.filter(id)?;
            for mapping in &filter.mappings {
                if dashboard.dashcard(mapping.dashcard_id).is_ok() {
                    continue;
                }
                tracing::warn!(
                    filter = %filter.id,
                    dashcard = mapping.dashcard_id,
                    "skipping mapping to a removed dashcard"
                );
                plan.stale.push(StaleMapping {
                    filter_id: filter.id.clone(),
                    dashcard_id: mapping.dashcard_id,
                    target: mapping.target.clone(),
                    reason: StaleReason::MissingDashcard,
                });
            }
        }
        Ok(plan)
    }

    /// Parameter sets of every dashcard for the values already applied, as
    /// used when the dashboard is first loaded
    pub fn load(&self, dashboard: &Dashboard) -> ApplyPlan {
        let dashcards = dashboard.dashcards.iter().map(|d| d.id).collect();
        self.plan(dashboard, &FilterValues::new(), dashcards)
    }

    fn plan(&self, dashboard: &Dashboard, values: &FilterValues, mut affected: Vec<DashcardId>) -> ApplyPlan {
        affected.sort_unstable();
        affected.dedup();

        let mut pipelines = PipelineCache::new(self);
        let mut plan = ApplyPlan::default();

        for dashcard_id in affected {
            let mut parameters = Vec::new();
            for filter in &dashboard.parameters {
                let Some(value) = values.get(&filter.id).or(filter.applied_value.as_ref()) else {
                    continue;
                };
                let Some(mapping) = filter.mapping(dashcard_id) else {
                    continue;
                };
                match pipelines.check(dashboard, filter, mapping) {
                    Some(reason) => {
                        tracing::warn!(
                            filter = %filter.id,
                            dashcard = dashcard_id,
                            ?reason,
                            "skipping stale mapping"
                        );
                        plan.stale.push(StaleMapping {
                            filter_id: filter.id.clone(),
                            dashcard_id,
                            target: mapping.target.clone(),
                            reason,
                        });
                    }
                    None => parameters.push(QueryParameter {
                        id: filter.id.clone(),
                        slug: filter.slug.clone(),
                        filter_type: filter.filter_type,
                        target: mapping.target.clone(),
                        value: value.clone(),
                    }),
                }
            }
            plan.parameters.insert(dashcard_id, parameters);
        }

        tracing::debug!(
            dashboard = dashboard.id,
            dashcards = plan.parameters.len(),
            stale = plan.stale.len(),
            "planned filter application"
        );
        plan
    }

    /// Every mapping of the dashboard whose target is gone
    pub fn stale_mappings(&self, dashboard: &Dashboard) -> Vec<StaleMapping> {
        let mut pipelines = PipelineCache::new(self);
        let mut stale = Vec::new();
        for filter in &dashboard.parameters {
            for mapping in &filter.mappings {
                if let Some(reason) = pipelines.check(dashboard, filter, mapping) {
                    stale.push(StaleMapping {
                        filter_id: filter.id.clone(),
                        dashcard_id: mapping.dashcard_id,
                        target: mapping.target.clone(),
                        reason,
                    });
                }
            }
        }
        stale
    }

    /// Remove stale mappings; filters left without mappings become unmapped
    pub fn demote_stale_mappings(
        &self,
        dashboard: &mut Dashboard,
        mode: DashboardMode,
    ) -> Result<Vec<StaleMapping>> {
        dashboard.require_editing(mode)?;
        let stale = self.stale_mappings(dashboard);
        for mapping in &stale {
            tracing::warn!(
                filter = %mapping.filter_id,
                dashcard = mapping.dashcard_id,
                reason = ?mapping.reason,
                "demoting stale mapping"
            );
            dashboard
                .filter_mut(&mapping.filter_id)?
                .remove_mapping(mapping.dashcard_id);
        }
        Ok(stale)
    }
}

/// Pipelines extracted once per card for the duration of one operation
struct PipelineCache<'r, 'a> {
    resolver: &'r Resolver<'a>,
    pipelines: HashMap<CardId, std::result::Result<StagePipeline, String>>,
}

impl<'r, 'a> PipelineCache<'r, 'a> {
    fn new(resolver: &'r Resolver<'a>) -> Self {
        Self {
            resolver,
            pipelines: HashMap::new(),
        }
    }

    /// `None` when the mapping still points at a compatible column
    fn check(
        &mut self,
        dashboard: &Dashboard,
        filter: &DashboardFilter,
        mapping: &ParameterMapping,
    ) -> Option<StaleReason> {
        let dashcard = match dashboard.dashcard(mapping.dashcard_id) {
            Ok(dashcard) => dashcard,
            Err(_) => return Some(StaleReason::MissingDashcard),
        };
        if dashcard.card_id != mapping.card_id {
            return Some(StaleReason::CardChanged {
                card_id: dashcard.card_id,
            });
        }

        let resolver = self.resolver;
        let pipeline = self
            .pipelines
            .entry(mapping.card_id)
            .or_insert_with(|| resolver.pipeline(mapping.card_id).map_err(|e| e.to_string()));
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(message) => {
                return Some(StaleReason::InvalidCard {
                    message: message.clone(),
                })
            }
        };

        match pipeline.target_column(&mapping.target) {
            None => Some(StaleReason::MissingColumn),
            Some(column) if !filter.filter_type.accepts(column.semantic_type) => {
                Some(StaleReason::IncompatibleType {
                    semantic_type: column.semantic_type,
                })
            }
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Field, MappingMetadata, Table};
    use crate::query::{Aggregation, Card, FieldRef, Join, Query, Source, StageDefinition, TemporalUnit};
    use crate::stages::ColumnKey;

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
                    .field(Field::new("Category", SemanticType::Category)),
            )
            .unwrap()
            .with_card(Card::question(
                1,
                "Orders by year",
                Query::new(Source::table("orders")).stage(
                    StageDefinition::new()
                        .join(
                            Join::new("Product", Source::table("products"))
                                .on(FieldRef::stage("Product ID"), FieldRef::stage("ID")),
                        )
                        .aggregate(Aggregation::Count)
                        .breakout(FieldRef::stage("Created At").with_unit(TemporalUnit::Year)),
                ),
            ))
            .with_card(Card::model(2, "Orders model", Query::new(Source::card(1))))
    }

    fn dashboard() -> Dashboard {
        Dashboard::new(1, "Sales")
            .with_dashcard(10, 1)
            .with_dashcard(20, 2)
            .with_filter(DashboardFilter::new("text", "Category", FilterType::Text))
            .with_filter(DashboardFilter::new("date", "Year", FilterType::Date))
    }

    fn year_target() -> MappingTarget {
        MappingTarget::new(1, ColumnKey::new(None, "Created At: Year"))
    }

    #[test]
    fn test_resolve_question_and_model() {
        let metadata = metadata();
        let resolver = Resolver::new(&metadata);
        let dashboard = dashboard();
        let filter = dashboard.filter("text").unwrap();

        let options = resolver.resolve(dashboard.dashcard(10).unwrap(), filter).unwrap();
        let labels: Vec<_> = options.iter().map(|o| o.label.as_deref()).collect();
        assert_eq!(labels, vec![Some("Product"), Some("Product")]);

        // The model's terminal output has no text column
        let options = resolver.resolve(dashboard.dashcard(20).unwrap(), filter).unwrap();
        assert!(options.is_empty());

        let date = dashboard.filter("date").unwrap();
        let options = resolver.resolve(dashboard.dashcard(20).unwrap(), date).unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].label, None);
        assert_eq!(options[0].column_names(), vec!["Created At: Year"]);
    }

    #[test]
    fn test_merge_by_label() {
        let metadata = metadata();
        let resolver = Resolver::new(&metadata);
        let dashboard = dashboard();
        let options = resolver
            .resolve(dashboard.dashcard(10).unwrap(), dashboard.filter("text").unwrap())
            .unwrap();
        let merged = merge_by_label(&options);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].column_names(), vec!["Category", "Category"]);
    }

    #[test]
    fn test_map_column_requires_editing_and_offered_target() {
        let metadata = metadata();
        let resolver = Resolver::new(&metadata);
        let mut dashboard = dashboard();

        let err = resolver
            .map_column(&mut dashboard, DashboardMode::Viewing, "date", 10, year_target())
            .unwrap_err();
        assert!(matches!(err, Error::NotEditing(1)));

        let wrong = MappingTarget::new(0, ColumnKey::new(Some("Orders"), "Total"));
        let err = resolver
            .map_column(&mut dashboard, DashboardMode::Editing, "date", 10, wrong)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTarget { .. }));

        let state = resolver
            .map_column(&mut dashboard, DashboardMode::Editing, "date", 10, year_target())
            .unwrap();
        assert_eq!(state, MappingState::MappedPendingApply);

        let state = resolver
            .unmap_column(&mut dashboard, DashboardMode::Editing, "date", 10)
            .unwrap();
        assert_eq!(state, MappingState::Unmapped);
        assert!(resolver
            .unmap_column(&mut dashboard, DashboardMode::Editing, "date", 10)
            .is_err());
    }

    #[test]
    fn test_apply_builds_parameters_per_dashcard() {
        let metadata = metadata();
        let resolver = Resolver::new(&metadata);
        let mut dashboard = dashboard();
        resolver
            .map_column(&mut dashboard, DashboardMode::Editing, "date", 10, year_target())
            .unwrap();

        let values: FilterValues = [("date".to_string(), FilterValue::single("2024"))].into();
        let plan = resolver.apply(&dashboard, &values).unwrap();
        assert_eq!(plan.affected_dashcards(), vec![10]);
        assert!(plan.stale.is_empty());
        let parameters = &plan.parameters[&10];
        assert_eq!(parameters.len(), 1);
        assert_eq!(parameters[0].slug, "year");
        assert_eq!(parameters[0].target, year_target());

        let json = serde_json::to_value(&parameters[0]).unwrap();
        assert_eq!(json["type"], "date");
        assert_eq!(json["value"], "2024");
    }

    #[test]
    fn test_load_covers_every_dashcard() {
        let metadata = metadata();
        let resolver = Resolver::new(&metadata);
        let plan = resolver.load(&dashboard());
        assert_eq!(plan.affected_dashcards(), vec![10, 20]);
        assert!(plan.parameters.values().all(Vec::is_empty));
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let metadata = metadata();
        let resolver = Resolver::new(&metadata);
        let dashboard = dashboard();
        let values: FilterValues = [("date".to_string(), FilterValue::numbers([1.0]))].into();
        assert!(matches!(
            resolver.apply(&dashboard, &values),
            Err(Error::InvalidValue { .. })
        ));
        let values: FilterValues = [("gone".to_string(), FilterValue::single("x"))].into();
        assert!(matches!(
            resolver.apply(&dashboard, &values),
            Err(Error::UnknownFilter(_))
        ));
    }

    #[test]
    fn test_stale_mapping_after_card_change() {
        let metadata = metadata();
        let resolver = Resolver::new(&metadata);
        let mut dashboard = dashboard();
        resolver
            .map_column(&mut dashboard, DashboardMode::Editing, "date", 10, year_target())
            .unwrap();

        // The dashcard now shows the model instead
        dashboard.dashcards[0].card_id = 2;
        let stale = resolver.stale_mappings(&dashboard);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].reason, StaleReason::CardChanged { card_id: 2 });

        let demoted = resolver
            .demote_stale_mappings(&mut dashboard, DashboardMode::Editing)
            .unwrap();
        assert_eq!(demoted.len(), 1);
        assert_eq!(dashboard.filter("date").unwrap().state(), MappingState::Unmapped);
    }
}
