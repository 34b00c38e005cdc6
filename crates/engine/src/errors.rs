//! Reconciler errors.
//!
//! A failed apply stops at the first failing resource. [`ApplyFailure`]
//! records what had already been applied (and is recorded in state) and what
//! was never attempted.

use thiserror::Error;

use stack::{ApplyRunId, ResourceName, StackError};

use crate::plan::{Operation, PlannedStep};

/// The first failure of an `up` or `destroy` run.
#[derive(Debug, Error)]
#[error("{operation} of '{resource}' failed: {cause} ({} applied, {} skipped)", .completed.len(), .skipped.len())]
pub struct ApplyFailure {
    pub run_id: ApplyRunId,
    pub resource: ResourceName,
    pub operation: Operation,
    #[source]
    pub cause: StackError,
    /// Steps that finished before the failure.
    pub completed: Vec<PlannedStep>,
    /// Resources with pending changes that were never attempted.
    pub skipped: Vec<ResourceName>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The graph or state could not be planned; nothing was applied.
    #[error(transparent)]
    Plan(#[from] StackError),

    #[error(transparent)]
    Apply(Box<ApplyFailure>),
}

impl From<ApplyFailure> for EngineError {
    fn from(failure: ApplyFailure) -> Self {
        Self::Apply(Box::new(failure))
    }
}

impl EngineError {
    /// The apply failure, if the run got past planning.
    pub fn apply_failure(&self) -> Option<&ApplyFailure> {
        match self {
            Self::Apply(failure) => Some(failure),
            Self::Plan(_) => None,
        }
    }
}
