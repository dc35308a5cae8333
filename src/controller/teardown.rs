//! Per-resource teardown outcomes
//!
//! Stop and remove delete each resource independently: one failing
//! deletion never prevents the next. Every step lands in a
//! [`TeardownReport`] which the caller logs or inspects.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::controller::platform::ResourceKind;
use crate::error::{Error, Result};

#[cfg(feature = "metrics")]
use crate::controller::metrics;

/// Outcome of a single teardown step
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "camelCase")]
pub enum StepOutcome {
    Deleted,
    /// The object was already gone
    Absent,
    /// Deletion was accepted but the object was still readable when polling gave up
    Lingering,
    Failed(String),
    Skipped,
}

impl StepOutcome {
    /// The object is gone or on its way out
    pub fn is_gone(&self) -> bool {
        matches!(self, StepOutcome::Deleted | StepOutcome::Absent)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownStep {
    /// Stable step name, e.g. "route" or "workload"
    pub step: &'static str,
    pub kind: &'static str,
    pub name: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownReport {
    pub instance_id: String,
    pub steps: Vec<TeardownStep>,
}

impl TeardownReport {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            steps: Vec::new(),
        }
    }

    /// Record the result of a delete call
    ///
    /// NotFound counts as [`StepOutcome::Absent`]; any other error is a failure.
    pub fn record(
        &mut self,
        step: &'static str,
        kind: ResourceKind,
        name: &str,
        result: Result<()>,
    ) {
        let outcome = match result {
            Ok(()) => StepOutcome::Deleted,
            Err(Error::NotFound { .. }) => StepOutcome::Absent,
            Err(e) => {
                #[cfg(feature = "metrics")]
                metrics::inc_teardown_failure(step);
                StepOutcome::Failed(e.to_string())
            }
        };
        self.push(step, kind, name, outcome);
    }

    pub fn skip(&mut self, step: &'static str, kind: ResourceKind, name: &str) {
        self.push(step, kind, name, StepOutcome::Skipped);
    }

    /// Downgrade a deleted step whose absence poll timed out
    pub fn mark_lingering(&mut self, step: &'static str) {
        if let Some(entry) = self
            .steps
            .iter_mut()
            .find(|s| s.step == step && s.outcome == StepOutcome::Deleted)
        {
            entry.outcome = StepOutcome::Lingering;
        }
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TeardownStep> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
    }

    /// No step failed and nothing was left lingering
    pub fn is_clean(&self) -> bool {
        self.steps
            .iter()
            .all(|s| !matches!(s.outcome, StepOutcome::Failed(_) | StepOutcome::Lingering))
    }

    pub fn log(&self) {
        for s in &self.steps {
            match &s.outcome {
                StepOutcome::Deleted => debug!("Instance {} - deleted {} {}", self.instance_id, s.kind, s.name),
                StepOutcome::Absent => debug!("Instance {} - {} {} already gone", self.instance_id, s.kind, s.name),
                StepOutcome::Skipped => {}
                StepOutcome::Lingering => warn!(
                    "Instance {} - {} {} was not deleted in time",
                    self.instance_id, s.kind, s.name
                ),
                StepOutcome::Failed(reason) => error!(
                    "Instance {} - error deleting {} {}: {}",
                    self.instance_id, s.kind, s.name, reason
                ),
            }
        }
        if self.is_clean() {
            info!("Instance {} - teardown complete", self.instance_id);
        }
    }

    fn push(
        &mut self,
        step: &'static str,
        kind: ResourceKind,
        name: &str,
        outcome: StepOutcome,
    ) {
        self.steps.push(TeardownStep {
            step,
            kind: kind.as_str(),
            name: name.to_string(),
            outcome,
        });
    }
}
