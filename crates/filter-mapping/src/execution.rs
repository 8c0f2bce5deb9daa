//! Dashboard refresh
//!
//! Issues one fetch per affected dashcard through a [`QueryExecutor`], all of
//! them concurrently, and waits until every one has settled. A failing fetch
//! only marks its own dashcard as failed.

use crate::dashboard::{Dashboard, DashcardId};
use crate::error::Result;
use crate::resolver::{ApplyPlan, QueryParameter, Resolver};
use crate::stages::StagePipeline;
use crate::surface::{DashcardRequest, Surface};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rows returned for one dashcard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub row_count: usize,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    pub fn with_row_count(row_count: usize) -> Self {
        Self {
            row_count,
            rows: Vec::new(),
        }
    }
}

/// Errors of a single dashcard fetch
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid request: {0}")]
    Request(String),

    #[error("Cannot build pipeline: {0}")]
    Pipeline(String),
}

/// The query engine. Called from several threads at once.
pub trait QueryExecutor: Sync {
    fn run_query(
        &self,
        pipeline: &StagePipeline,
        parameters: &[QueryParameter],
    ) -> std::result::Result<QueryResult, ExecutionError>;
}

/// Result of one dashcard fetch
#[derive(Debug, Clone, PartialEq)]
pub struct DashcardOutcome {
    pub dashcard_id: DashcardId,
    pub request: DashcardRequest,
    pub result: std::result::Result<QueryResult, ExecutionError>,
}

/// Outcomes of every fetch of a refresh, in dashcard order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub outcomes: Vec<DashcardOutcome>,
}

impl RefreshReport {
    pub fn outcome(&self, dashcard_id: DashcardId) -> Option<&DashcardOutcome> {
        self.outcomes.iter().find(|o| o.dashcard_id == dashcard_id)
    }

    /// Row count of a dashcard whose fetch succeeded
    pub fn row_count(&self, dashcard_id: DashcardId) -> Option<usize> {
        self.outcome(dashcard_id)?
            .result
            .as_ref()
            .ok()
            .map(|r| r.row_count)
    }

    /// Dashcards showing an error state
    pub fn failed(&self) -> Vec<DashcardId> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.dashcard_id)
            .collect()
    }
}

struct Job {
    dashcard_id: DashcardId,
    request: DashcardRequest,
    pipeline: std::result::Result<StagePipeline, String>,
}

/// Fetch every dashcard of `plan` through `surface`.
///
/// A planned dashcard the dashboard no longer has is skipped. Fails only when
/// a request payload cannot be encoded.
pub fn refresh(
    resolver: &Resolver<'_>,
    dashboard: &Dashboard,
    plan: &ApplyPlan,
    surface: &Surface,
    executor: &dyn QueryExecutor,
) -> Result<RefreshReport> {
    let mut jobs = Vec::with_capacity(plan.parameters.len());
    for (&dashcard_id, parameters) in &plan.parameters {
        let Ok(dashcard) = dashboard.dashcard(dashcard_id) else {
            tracing::warn!(dashcard = dashcard_id, "skipping removed dashcard");
            continue;
        };
        let request = surface.request(dashcard_id, dashcard.card_id, parameters)?;
        let pipeline = resolver
            .pipeline(dashcard.card_id)
            .map_err(|e| e.to_string());
        jobs.push(Job {
            dashcard_id,
            request,
            pipeline,
        });
    }

    tracing::debug!(
        dashboard = dashboard.id,
        surface = surface.name(),
        fetches = jobs.len(),
        "refreshing dashcards"
    );

    let outcomes: Vec<DashcardOutcome> = jobs
        .into_par_iter()
        .map(|job| {
            let result = fetch(&job, executor);
            if let Err(error) = &result {
                tracing::warn!(dashcard = job.dashcard_id, %error, "dashcard fetch failed");
            }
            DashcardOutcome {
                dashcard_id: job.dashcard_id,
                request: job.request,
                result,
            }
        })
        .collect();

    Ok(RefreshReport { outcomes })
}

fn fetch(job: &Job, executor: &dyn QueryExecutor) -> std::result::Result<QueryResult, ExecutionError> {
    let pipeline = job
        .pipeline
        .as_ref()
        .map_err(|message| ExecutionError::Pipeline(message.clone()))?;
    // Parameters go through their wire form, as they would over HTTP
    let parameters = job
        .request
        .decode_parameters()
        .map_err(|e| ExecutionError::Request(e.to_string()))?;
    executor.run_query(pipeline, &parameters)
}
