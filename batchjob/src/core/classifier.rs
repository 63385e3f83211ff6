//! Deterministic classification of job watch events.

use k8s_openapi::api::batch::v1::Job;

use crate::core::types::{Classification, JobOutcome, StatusCounts};

/// Classify a job snapshot, first match wins:
///
/// - no snapshot or no status: `Ignorable`
/// - `succeeded > 0`: `Terminal(Succeeded)`
/// - `failed > 0`: `Terminal(Failed)`
/// - otherwise: `Active(active)`
pub fn classify(job: Option<&Job>) -> Classification {
    let Some(status) = job.and_then(|job| job.status.as_ref()) else {
        return Classification::Ignorable;
    };
    let counts = StatusCounts::from(status);
    if counts.succeeded > 0 {
        Classification::Terminal(JobOutcome::Succeeded)
    } else if counts.failed > 0 {
        Classification::Terminal(JobOutcome::Failed)
    } else {
        Classification::Active(counts.active)
    }
}
