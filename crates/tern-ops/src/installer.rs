//! Applying an install plan.

use miette::Diagnostic;
use thiserror::Error;

use crate::plan::{InstallPlan, PlanStep};

/// Some steps of a plan failed. Steps are never rolled back, so `applied`
/// lists what did change.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{} of {} install steps failed", failed.len(), applied.len() + failed.len())]
#[diagnostic(help("Run sync again to retry the failed steps"))]
pub struct InstallError {
    pub applied: Vec<PlanStep>,
    /// Each failed step with the reason.
    pub failed: Vec<(PlanStep, String)>,
}

impl InstallError {
    /// Fold per-step results into `Ok` when every step succeeded.
    pub fn collect(results: Vec<(PlanStep, Result<(), String>)>) -> Result<(), InstallError> {
        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for (step, result) in results {
            match result {
                Ok(()) => applied.push(step),
                Err(reason) => {
                    tracing::warn!(step = %step, "install step failed: {reason}");
                    failed.push((step, reason));
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(InstallError { applied, failed })
        }
    }
}

/// Applies plans to one environment.
pub trait Installer {
    fn apply(&self, plan: &InstallPlan) -> Result<(), InstallError>;
}
