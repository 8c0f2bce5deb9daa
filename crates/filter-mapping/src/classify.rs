//! Filter Compatibility Classification
//!
//! Decides which columns of an extracted pipeline can receive a filter of a
//! given type, and groups them into labelled buckets per stage.
//!
//! Questions keep one bucket per contributing table or stage. Models flatten
//! everything into a single unlabelled bucket holding only their terminal
//! output columns.

use crate::helper::summaries_label;
use crate::options::{DuplicateJoinPolicy, ResolverOptions};
use crate::query::CardVariant;
use crate::stages::{
    keyed_columns, ColumnGroup, ColumnKey, ColumnOrigin, ColumnRef, MappingTarget, QueryStage,
};
use crate::types::FilterType;
use std::collections::HashSet;

/// A column a filter may be bound to
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub target: MappingTarget,
    pub column: ColumnRef,
}

/// Candidate columns sharing a stage and a provenance label
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateBucket {
    /// Stage a filter bound to one of these columns is applied at
    pub stage: usize,
    /// Provenance label; `None` for models
    pub label: Option<String>,
    pub columns: Vec<Candidate>,
}

impl CandidateBucket {
    fn new(stage: usize, label: Option<String>) -> Self {
        Self {
            stage,
            label,
            columns: Vec::new(),
        }
    }
}

/// Which bucket of a stage a column goes to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Input,
    Join(usize),
    Implicit(String),
}

/// Classify with default options
pub fn classify(filter_type: FilterType, stages: &[QueryStage], variant: CardVariant) -> Vec<CandidateBucket> {
    classify_with_options(filter_type, stages, variant, &ResolverOptions::default())
}

/// Group the columns compatible with `filter_type` into buckets.
///
/// An empty result means the card cannot receive this filter. Buckets come
/// out in insertion order: per stage the input bucket first, then joins in
/// join order, then implicit joins, and the final summaries last.
pub fn classify_with_options(
    filter_type: FilterType,
    stages: &[QueryStage],
    variant: CardVariant,
    options: &ResolverOptions,
) -> Vec<CandidateBucket> {
    let mut buckets = if variant.is_model() {
        model_buckets(filter_type, stages)
    } else {
        question_buckets(filter_type, stages, options)
    };

    buckets.retain(|bucket| !bucket.columns.is_empty());

    if options.duplicate_joins == DuplicateJoinPolicy::Collapse {
        let mut seen: HashSet<(usize, Option<String>)> = HashSet::new();
        buckets.retain(|bucket| seen.insert((bucket.stage, bucket.label.clone())));
    }

    tracing::debug!(
        filter_type = %filter_type,
        ?variant,
        buckets = buckets.len(),
        candidates = buckets.iter().map(|b| b.columns.len()).sum::<usize>(),
        "classified columns"
    );
    buckets
}

fn model_buckets(filter_type: FilterType, stages: &[QueryStage]) -> Vec<CandidateBucket> {
    let Some(last) = stages.last() else {
        return Vec::new();
    };
    let outputs = last.outputs();
    let mut bucket = CandidateBucket::new(stages.len(), None);
    bucket.columns = compatible(filter_type, stages.len(), keyed_columns(&outputs));
    vec![bucket]
}

fn question_buckets(
    filter_type: FilterType,
    stages: &[QueryStage],
    options: &ResolverOptions,
) -> Vec<CandidateBucket> {
    let mut buckets = Vec::new();

    for stage in stages {
        let mut slots: Vec<(Slot, CandidateBucket)> =
            vec![(Slot::Input, CandidateBucket::new(stage.index, stage.input_label.clone()))];

        for (group, key, column) in stage.keyed_exposed() {
            let slot = match (group, &column.origin) {
                // Raw inputs of a passthrough stage were offered where they came in
                (ColumnGroup::Input, _) if stage.passthrough => continue,
                (ColumnGroup::Input | ColumnGroup::Custom, _) => Slot::Input,
                (ColumnGroup::Joined, ColumnOrigin::Join { ordinal, .. }) => Slot::Join(*ordinal),
                (ColumnGroup::Implicit, ColumnOrigin::Implicit { via }) => {
                    if stage.passthrough || !options.include_implicit_joins {
                        continue;
                    }
                    Slot::Implicit(via.clone())
                }
                _ => continue,
            };

            if !filter_type.accepts(column.semantic_type) {
                continue;
            }

            let candidate = Candidate {
                target: MappingTarget::new(stage.index, key),
                column: column.clone(),
            };
            match slots.iter_mut().find(|(s, _)| *s == slot) {
                Some((_, bucket)) => bucket.columns.push(candidate),
                None => {
                    let mut bucket = CandidateBucket::new(stage.index, column.table.clone());
                    bucket.columns.push(candidate);
                    slots.push((slot, bucket));
                }
            }
        }

        // Joins in join order, then implicit joins in the order their keys appear
        let (input, rest): (Vec<_>, Vec<_>) = slots.into_iter().partition(|(s, _)| *s == Slot::Input);
        let (mut joins, implicit): (Vec<_>, Vec<_>) =
            rest.into_iter().partition(|(s, _)| matches!(s, Slot::Join(_)));
        joins.sort_by_key(|(s, _)| match s {
            Slot::Join(ordinal) => *ordinal,
            _ => usize::MAX,
        });

        buckets.extend(
            input
                .into_iter()
                .chain(joins)
                .chain(implicit)
                .map(|(_, bucket)| bucket),
        );
    }

    if let Some(last) = stages.last() {
        if let Some(ordinal) = last.summary_ordinal {
            let outputs = last.outputs();
            let mut bucket = CandidateBucket::new(stages.len(), Some(summaries_label(ordinal)));
            bucket.columns = compatible(filter_type, stages.len(), keyed_columns(&outputs));
            buckets.push(bucket);
        }
    }

    buckets
}

fn compatible(
    filter_type: FilterType,
    stage: usize,
    keyed: Vec<(ColumnKey, &ColumnRef)>,
) -> Vec<Candidate> {
    keyed
        .into_iter()
        .filter(|(_, column)| filter_type.accepts(column.semantic_type))
        .map(|(key, column)| Candidate {
            target: MappingTarget::new(stage, key),
            column: column.clone(),
        })
        .collect()
}
