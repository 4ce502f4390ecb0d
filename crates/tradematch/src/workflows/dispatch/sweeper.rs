//! Unattended auto-approval of jobs that have waited past the age threshold.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{
    Job, JobId, Provider, ProviderId, RequestId, RequestStatus, AUTO_APPROVAL_ACTOR,
    AUTO_ASSIGNMENT_NOTE,
};
use super::eligibility::EligibilityCriteria;
use super::error::DispatchError;
use super::repository::{DispatchNotice, DispatchNotifier, DispatchRepository, RepositoryError};
use super::service::{DispatchService, WRITE_RETRIES};
use super::settings::SweepRunRecord;

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_run_id(started_at: DateTime<Utc>) -> String {
    let sequence = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("auto-{}-{sequence:04}", started_at.format("%Y%m%dT%H%M%SZ"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepOutcome {
    /// The master switch was off; no job or request was touched.
    Disabled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepAssignment {
    pub job_id: JobId,
    pub provider_id: ProviderId,
    pub provider_name: String,
    /// Workload before this assignment.
    pub active_workload: u32,
    pub auto_approved_request: Option<RequestId>,
    /// Set when the job was assigned but the winner's pending request could not be approved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approval_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSkip {
    pub job_id: JobId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub job_id: JobId,
    pub error: String,
}

/// Summary of one sweep, returned to the caller and logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub outcome: SweepOutcome,
    pub examined: usize,
    pub assigned: Vec<SweepAssignment>,
    pub skipped: Vec<SweepSkip>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn new(run_id: String, started_at: DateTime<Utc>, outcome: SweepOutcome) -> Self {
        Self {
            run_id,
            started_at,
            outcome,
            examined: 0,
            assigned: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Unassigned jobs at least `threshold` old, oldest first.
fn aged_open_jobs(jobs: &[Job], now: DateTime<Utc>, threshold: chrono::Duration) -> Vec<Job> {
    let mut aged: Vec<Job> = jobs
        .iter()
        .filter(|job| job.is_open() && now - job.created_at >= threshold)
        .cloned()
        .collect();
    aged.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    aged
}

impl<S, N> DispatchService<S, N>
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    /// One idempotent pass over aged unassigned jobs. Safe to call on any schedule.
    ///
    /// Per-job failures are logged and recorded in the report; only failing to read the
    /// initial snapshot or to record the run aborts the sweep.
    pub fn run_auto_approval_sweep(&self) -> Result<SweepReport, DispatchError> {
        let settings = self.settings()?;
        let started_at = self.clock.now();
        let run_id = next_run_id(started_at);

        if !settings.enabled {
            info!(run_id, "auto-approval disabled; sweep skipped");
            return Ok(SweepReport::new(run_id, started_at, SweepOutcome::Disabled));
        }

        let criteria = EligibilityCriteria::from(&settings);
        let providers = self.store.list_providers()?;
        let mut jobs = self.store.list_jobs()?;
        let candidates = aged_open_jobs(&jobs, started_at, settings.age_threshold());

        let mut report = SweepReport::new(run_id, started_at, SweepOutcome::Completed);
        report.examined = candidates.len();

        for job in candidates {
            let job_id = job.id.clone();
            match self.sweep_job(job, &providers, &jobs, &criteria, &report.run_id) {
                Ok((assigned_job, assignment)) => {
                    if let Some(slot) = jobs.iter_mut().find(|existing| existing.id == job_id) {
                        *slot = assigned_job;
                    }
                    report.assigned.push(assignment);
                }
                Err(DispatchError::NoEligibleProvider { .. }) => {
                    info!(job_id = %job_id, "no eligible provider; job left unassigned");
                    report.skipped.push(SweepSkip {
                        job_id,
                        reason: "no eligible provider".to_string(),
                    });
                }
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "auto-approval failed for job");
                    report.failures.push(SweepFailure {
                        job_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        self.record_sweep(&report)?;

        info!(
            run_id = %report.run_id,
            examined = report.examined,
            assigned = report.assigned.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "auto-approval sweep finished"
        );
        self.publish(
            DispatchNotice::new("auto_approval_sweep", None)
                .detail("run_id", &report.run_id)
                .detail("examined", report.examined)
                .detail("assigned", report.assigned.len())
                .detail("failed", report.failures.len()),
        );

        Ok(report)
    }

    fn sweep_job(
        &self,
        job: Job,
        providers: &[Provider],
        jobs: &[Job],
        criteria: &EligibilityCriteria,
        run_id: &str,
    ) -> Result<(Job, SweepAssignment), DispatchError> {
        let ranked = self.evaluator.rank(&job, providers, jobs, criteria);
        let top = ranked
            .into_iter()
            .next()
            .ok_or_else(|| DispatchError::NoEligibleProvider {
                job_id: job.id.clone(),
            })?;

        let assigned = self.assign_snapshot(
            job,
            &top.provider,
            AUTO_APPROVAL_ACTOR,
            Some(AUTO_ASSIGNMENT_NOTE.to_string()),
        )?;

        // The assignment is committed at this point; it is reported even if the request
        // bookkeeping below fails.
        let (auto_approved_request, auto_approval_error) =
            match self.auto_approve_pending(&assigned.id, &top.provider.id, run_id) {
                Ok(request_id) => (request_id, None),
                Err(err) => {
                    warn!(
                        job_id = %assigned.id,
                        provider_id = %top.provider.id,
                        error = %err,
                        "job assigned but pending request not auto-approved"
                    );
                    (None, Some(err.to_string()))
                }
            };

        Ok((
            assigned.clone(),
            SweepAssignment {
                job_id: assigned.id,
                provider_id: top.provider.id.clone(),
                provider_name: top.provider.display_name().to_string(),
                active_workload: top.active_workload,
                auto_approved_request,
                auto_approval_error,
            },
        ))
    }

    /// Auto-approve the winner's pending request for the job, if it raised one.
    fn auto_approve_pending(
        &self,
        job_id: &JobId,
        provider_id: &ProviderId,
        run_id: &str,
    ) -> Result<Option<RequestId>, DispatchError> {
        let pending = self
            .store
            .requests_for_job(job_id)?
            .into_iter()
            .find(|request| {
                &request.provider_id == provider_id && request.status == RequestStatus::Pending
            });

        let Some(mut request) = pending else {
            return Ok(None);
        };
        request.auto_approve(run_id, self.clock.now())?;
        let request = self.write_request(request)?;
        info!(request_id = %request.id, job_id = %job_id, run_id, "request auto-approved");
        Ok(Some(request.id))
    }

    /// Fold the run into the settings stats without clobbering concurrent operator edits.
    fn record_sweep(&self, report: &SweepReport) -> Result<(), DispatchError> {
        let record = SweepRunRecord {
            run_id: report.run_id.clone(),
            completed_at: self.clock.now(),
            assigned: report.assigned.len() as u32,
        };

        for _ in 0..WRITE_RETRIES {
            let mut current = self.settings()?;
            current.record_run(record.clone());
            match self.store.store_settings(current) {
                Ok(_) => return Ok(()),
                Err(RepositoryError::Conflict) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(RepositoryError::Conflict.into())
    }
}
