#![allow(dead_code)]
//! A query executor answering from canned row counts and recording every call

use filter_mapping::{
    CardId, ExecutionError, FilterValue, QueryExecutor, QueryParameter, QueryResult, StagePipeline,
};
use std::sync::Mutex;

use super::sample_data::{NET_ORDERS, ORDERS_BY_QUARTER};

/// Row count returned when a card is filtered on `column` with `value`
#[derive(Debug, Clone)]
struct Rule {
    card_id: CardId,
    column: String,
    value: FilterValue,
    row_count: usize,
}

#[derive(Default)]
pub struct RecordingExecutor {
    baselines: Vec<(CardId, usize)>,
    rules: Vec<Rule>,
    failing: Vec<CardId>,
    calls: Mutex<Vec<(CardId, Vec<QueryParameter>)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row counts of the sample database
    pub fn sample() -> Self {
        Self::new()
            .with_baseline(ORDERS_BY_QUARTER, 20)
            .with_rule(
                ORDERS_BY_QUARTER,
                "Created At: Quarter",
                FilterValue::single("Q1 2024"),
                1077,
            )
            .with_baseline(NET_ORDERS, 953)
            .with_rule(NET_ORDERS, "Net", FilterValue::numbers([30.0, 100.0]), 688)
    }

    pub fn with_baseline(mut self, card_id: CardId, row_count: usize) -> Self {
        self.baselines.push((card_id, row_count));
        self
    }

    pub fn with_rule(mut self, card_id: CardId, column: &str, value: FilterValue, row_count: usize) -> Self {
        self.rules.push(Rule {
            card_id,
            column: column.to_string(),
            value,
            row_count,
        });
        self
    }

    pub fn failing(mut self, card_id: CardId) -> Self {
        self.failing.push(card_id);
        self
    }

    pub fn calls(&self) -> Vec<(CardId, Vec<QueryParameter>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, card_id: CardId) -> usize {
        self.calls.lock().unwrap().iter().filter(|(id, _)| *id == card_id).count()
    }
}

impl QueryExecutor for RecordingExecutor {
    fn run_query(
        &self,
        pipeline: &StagePipeline,
        parameters: &[QueryParameter],
    ) -> Result<QueryResult, ExecutionError> {
        self.calls
            .lock()
            .unwrap()
            .push((pipeline.card_id, parameters.to_vec()));

        if self.failing.contains(&pipeline.card_id) {
            return Err(ExecutionError::Query(format!("card {} failed", pipeline.card_id)));
        }

        // Every parameter must point at a column of the pipeline
        for parameter in parameters {
            if pipeline.target_column(&parameter.target).is_none() {
                return Err(ExecutionError::Query(format!(
                    "unknown column {}",
                    parameter.target.column
                )));
            }
        }

        let filtered = parameters.iter().find_map(|parameter| {
            self.rules.iter().find(|rule| {
                rule.card_id == pipeline.card_id
                    && rule.column == parameter.target.column.name
                    && rule.value == parameter.value
            })
        });
        let row_count = match filtered {
            Some(rule) => rule.row_count,
            None => self
                .baselines
                .iter()
                .find(|(id, _)| *id == pipeline.card_id)
                .map(|(_, rows)| *rows)
                .unwrap_or(0),
        };
        Ok(QueryResult::with_row_count(row_count))
    }
}
