//! Run identity for tracking pipeline executions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one run of the graph.
///
/// `run_date` is the logical date the run is for. Storage keys are derived
/// from it, so a rerun of an old date reads and writes that date's objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID for this pipeline run.
    pub pipeline_run_id: Uuid,

    /// The logical date of the run.
    pub run_date: NaiveDate,

    /// When the run object was created.
    pub started_at: DateTime<Utc>,
}

impl RunIdentity {
    /// Creates a new run identity for the given logical date.
    #[must_use]
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            pipeline_run_id: Uuid::new_v4(),
            run_date,
            started_at: Utc::now(),
        }
    }

    /// Creates a run identity for today's UTC date.
    #[must_use]
    pub fn today() -> Self {
        Self::new(Utc::now().date_naive())
    }

    /// Replaces the generated run id.
    #[must_use]
    pub fn with_pipeline_run_id(mut self, pipeline_run_id: Uuid) -> Self {
        self.pipeline_run_id = pipeline_run_id;
        self
    }

    /// Returns the run date as `YYYY-MM-DD`.
    #[must_use]
    pub fn run_date_str(&self) -> String {
        self.run_date.format("%Y-%m-%d").to_string()
    }
}
