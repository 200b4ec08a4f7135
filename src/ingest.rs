//! Feedback ingestion
//!
//! Applies one inbound [`FeedbackBatch`]: registers the project, its declared
//! variables and every reported flag, then adds the reported counters to the
//! statistics accumulator.
//!
//! Every name and count in the batch is validated before storage is touched.
//! All resolution happens before the first increment. If any resolution fails
//! (timeout, storage error, invariant violation) the batch is rejected and the
//! accumulator is left untouched, so the sender can retry it without double
//! counting.

use crate::error::{FlagfeedError, Result};
use crate::resolver::EntityResolver;
use crate::statistics::StatisticsAccumulator;
use crate::types::{FeedbackBatch, FlagId, FlagUsage, ProjectId, MAX_COUNT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a successfully applied batch touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub project_id: ProjectId,
    /// Variables registered (or confirmed)
    pub variables: usize,
    /// Usage records added to the accumulator
    pub flag_updates: usize,
}

/// Orchestrates resolution and accumulation for inbound feedback
pub struct FeedbackIngestor {
    resolver: Arc<EntityResolver>,
    accumulator: Arc<StatisticsAccumulator>,
}

impl FeedbackIngestor {
    pub fn new(resolver: Arc<EntityResolver>, accumulator: Arc<StatisticsAccumulator>) -> Self {
        Self {
            resolver,
            accumulator,
        }
    }

    pub fn accumulator(&self) -> &Arc<StatisticsAccumulator> {
        &self.accumulator
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    /// Apply one feedback batch
    pub async fn ingest(&self, batch: &FeedbackBatch) -> Result<IngestSummary> {
        match self.apply(batch).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                warn!("Rejected feedback batch for project {:?}: {}", batch.project, e);
                Err(e)
            }
        }
    }

    /// Reject malformed batches before any storage access
    fn validate(batch: &FeedbackBatch) -> Result<()> {
        if batch.project.is_empty() {
            return Err(FlagfeedError::Validation("feedback batch has no project".into()));
        }
        if batch.variables.iter().any(|variable| variable.name.is_empty()) {
            return Err(FlagfeedError::Validation(format!(
                "project {:?} declares a variable with an empty name",
                batch.project
            )));
        }
        for usage in &batch.flags_usage {
            if usage.name.is_empty() {
                return Err(FlagfeedError::Validation(format!(
                    "project {:?} reports usage for a flag with an empty name",
                    batch.project
                )));
            }
            if usage.positive_count > MAX_COUNT || usage.negative_count > MAX_COUNT {
                return Err(FlagfeedError::Validation(format!(
                    "usage of flag {:?} exceeds the maximum count {}",
                    usage.name, MAX_COUNT
                )));
            }
        }
        Ok(())
    }

    async fn apply(&self, batch: &FeedbackBatch) -> Result<IngestSummary> {
        Self::validate(batch)?;

        let project_id = self.resolver.project(&batch.project).await?;

        for variable in &batch.variables {
            self.resolver
                .variable(project_id, &variable.name, variable.var_type)
                .await?;
        }

        let mut resolved: Vec<(FlagId, &FlagUsage)> = Vec::with_capacity(batch.flags_usage.len());
        for usage in &batch.flags_usage {
            let flag_id = self.resolver.flag(project_id, &usage.name).await?;
            resolved.push((flag_id, usage));
        }

        for (flag_id, usage) in &resolved {
            self.accumulator.increment(
                *flag_id,
                usage.interval,
                usage.positive_count,
                usage.negative_count,
            );
        }

        debug!(
            "Ingested feedback for project {} ({} variables, {} usage records)",
            batch.project,
            batch.variables.len(),
            resolved.len()
        );

        Ok(IngestSummary {
            project_id,
            variables: batch.variables.len(),
            flag_updates: resolved.len(),
        })
    }
}
