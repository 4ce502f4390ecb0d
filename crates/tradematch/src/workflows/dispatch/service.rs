use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::areas::{AreaMatcher, AreaTable, PostcodeAreaMatcher};
use super::assignment;
use super::clock::{Clock, SystemClock};
use super::domain::{Job, JobId, JobRequest, Provider, ProviderId, RequestId};
use super::eligibility::{
    EligibilityCriteria, EligibilityEvaluator, EligibleProvider, ProviderAssessment,
    WorkloadSnapshot,
};
use super::error::{DispatchError, EntityKind};
use super::repository::{DispatchNotice, DispatchNotifier, DispatchRepository, RepositoryError};
use super::requests::{self, ReviewDecision, DEFAULT_PENDING_REQUEST_CAP};
use super::settings::{AutoApprovalSettings, SettingsUpdate};

/// Attempts made for read-modify-write cycles that are safe to replay.
pub(crate) const WRITE_RETRIES: usize = 3;

/// Engine-level knobs fixed at deployment time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub pending_request_cap: usize,
    pub area_table: AreaTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_request_cap: DEFAULT_PENDING_REQUEST_CAP,
            area_table: AreaTable::default(),
        }
    }
}

/// An open job a provider could claim, annotated like [`EligibleProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleJob {
    pub job: Job,
    pub active_workload: u32,
    pub area_match: bool,
}

/// Service composing the state machines, the evaluator, and the document store.
pub struct DispatchService<S, N> {
    pub(super) store: Arc<S>,
    pub(super) notifier: Arc<N>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) evaluator: EligibilityEvaluator,
    pub(super) pending_request_cap: usize,
}

impl<S, N> DispatchService<S, N>
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: EngineConfig) -> Self {
        let matcher: Arc<dyn AreaMatcher> = Arc::new(PostcodeAreaMatcher::new(config.area_table));
        Self {
            store,
            notifier,
            clock: Arc::new(SystemClock),
            evaluator: EligibilityEvaluator::new(matcher),
            pending_request_cap: config.pending_request_cap,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_area_matcher(mut self, matcher: Arc<dyn AreaMatcher>) -> Self {
        self.evaluator = EligibilityEvaluator::new(matcher);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Assign (or reassign) a job on behalf of an operator.
    pub fn assign_job(
        &self,
        job_id: &JobId,
        provider_id: &ProviderId,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Job, DispatchError> {
        let job = self.job(job_id)?;
        let provider = self.provider(provider_id)?;
        self.assign_snapshot(job, &provider, actor, notes)
    }

    /// Apply the assign transition to `job` as read, so a concurrent writer makes this fail.
    pub(super) fn assign_snapshot(
        &self,
        mut job: Job,
        provider: &Provider,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Job, DispatchError> {
        if !provider.is_approved() {
            return Err(DispatchError::ProviderNotApproved {
                provider_id: provider.id.clone(),
                status: provider.status.label(),
            });
        }

        let now = self.clock.now();
        let change = assignment::assign(&mut job, provider, actor, notes, now)?;
        let stored = self.write_transition(job)?;
        let expired = self.expire_requests(&stored.id, now, |job_requests| {
            requests::superseded(job_requests, &change.provider_id)
                .map(|request| request.id.clone())
                .collect()
        })?;
        let stored = self.refresh_request_counters(&stored.id)?;

        info!(
            job_id = %stored.id,
            provider_id = %change.provider_id,
            reassigned = change.is_reassignment(),
            expired_requests = expired,
            actor,
            "job assigned"
        );

        let mut notice = DispatchNotice::new("job_assigned", Some(&stored.id))
            .detail("provider_id", &change.provider_id)
            .detail("provider_name", provider.display_name())
            .detail("assigned_by", actor);
        if let Some(previous) = &change.previous_provider {
            notice = notice.detail("previous_provider_id", previous);
        }
        self.publish(notice);

        Ok(stored)
    }

    /// Clear a job's assignment. Irreversible without re-matching, hence `confirm`.
    pub fn unassign_job(
        &self,
        job_id: &JobId,
        actor: &str,
        confirm: bool,
    ) -> Result<Job, DispatchError> {
        if !confirm {
            return Err(DispatchError::ConfirmationRequired {
                job_id: job_id.clone(),
            });
        }

        let mut job = self.job(job_id)?;
        let previous = assignment::unassign(&mut job)?;
        let stored = self.write_transition(job)?;

        info!(job_id = %stored.id, provider_id = %previous, actor, "job unassigned");
        self.publish(
            DispatchNotice::new("job_unassigned", Some(&stored.id))
                .detail("previous_provider_id", &previous)
                .detail("unassigned_by", actor),
        );

        Ok(stored)
    }

    pub fn complete_job(&self, job_id: &JobId, actor: &str) -> Result<Job, DispatchError> {
        let mut job = self.job(job_id)?;
        let now = self.clock.now();
        assignment::complete(&mut job, actor, now)?;
        let stored = self.write_transition(job)?;

        let assignee = stored.assigned_provider_id.clone();
        let expired = self.expire_requests(&stored.id, now, |job_requests| {
            requests::closed_by_completion(job_requests, assignee.as_ref())
                .map(|request| request.id.clone())
                .collect()
        })?;
        let stored = self.refresh_request_counters(&stored.id)?;

        info!(job_id = %stored.id, expired_requests = expired, actor, "job completed");
        let mut notice =
            DispatchNotice::new("job_completed", Some(&stored.id)).detail("completed_by", actor);
        if let Some(provider_id) = &assignee {
            notice = notice.detail("provider_id", provider_id);
        }
        self.publish(notice);

        Ok(stored)
    }

    /// Raise a provider's claim on an open job.
    pub fn create_request(
        &self,
        job_id: &JobId,
        provider_id: &ProviderId,
    ) -> Result<JobRequest, DispatchError> {
        let job = self.job(job_id)?;
        let provider = self.provider(provider_id)?;
        let job_requests = self.store.requests_for_job(job_id)?;
        let provider_requests = self.store.requests_for_provider(provider_id)?;

        requests::ensure_can_request(
            &job,
            &provider,
            &job_requests,
            &provider_requests,
            self.pending_request_cap,
        )?;

        let request = requests::open_request(
            requests::next_request_id(),
            &job,
            &provider,
            self.clock.now(),
        );
        let stored = match self.store.insert_request(request) {
            Ok(stored) => stored,
            Err(RepositoryError::Conflict) => {
                return Err(DispatchError::DuplicateActiveRequest {
                    job_id: job_id.clone(),
                    provider_id: provider_id.clone(),
                })
            }
            Err(other) => return Err(other.into()),
        };

        // An assignment that landed between the open check and the insert did not see this
        // request when it expired the job's claims, so withdraw it here.
        if !self.job(job_id)?.is_open() {
            let withdrawn = stored.id.clone();
            self.expire_requests(job_id, self.clock.now(), |_| vec![withdrawn.clone()])?;
            self.refresh_request_counters(job_id)?;
            info!(
                request_id = %stored.id,
                job_id = %job_id,
                "request withdrawn; job closed concurrently"
            );
            return Err(DispatchError::ConflictingWrite {
                job_id: job_id.clone(),
            });
        }
        self.refresh_request_counters(job_id)?;

        info!(
            request_id = %stored.id,
            job_id = %job_id,
            provider_id = %provider_id,
            "request created"
        );
        self.publish(
            DispatchNotice::new("request_created", Some(job_id))
                .detail("request_id", &stored.id)
                .detail("provider_id", provider_id),
        );

        Ok(stored)
    }

    /// Approve or reject a pending request. Approval is a review signal only.
    pub fn review_request(
        &self,
        request_id: &RequestId,
        actor: &str,
        decision: ReviewDecision,
    ) -> Result<JobRequest, DispatchError> {
        let mut request = self
            .store
            .fetch_request(request_id)?
            .ok_or_else(|| DispatchError::not_found(EntityKind::Request, request_id))?;

        request.review(&decision, actor, self.clock.now())?;
        let request = self.write_request(request)?;
        self.refresh_request_counters(&request.job_id)?;

        info!(
            request_id = %request.id,
            job_id = %request.job_id,
            status = request.status.label(),
            actor,
            "request reviewed"
        );
        let mut notice = DispatchNotice::new(
            match decision {
                ReviewDecision::Approve => "request_approved",
                ReviewDecision::Reject { .. } => "request_rejected",
            },
            Some(&request.job_id),
        )
        .detail("request_id", &request.id)
        .detail("provider_id", &request.provider_id)
        .detail("reviewed_by", actor);
        if let Some(reason) = &request.rejection_reason {
            notice = notice.detail("reason", reason);
        }
        self.publish(notice);

        Ok(request)
    }

    /// A provider's requests, newest first.
    pub fn list_my_requests(
        &self,
        provider_id: &ProviderId,
    ) -> Result<Vec<JobRequest>, DispatchError> {
        self.provider(provider_id)?;
        let mut mine = self.store.requests_for_provider(provider_id)?;
        mine.sort_by(|a, b| {
            b.requested_at
                .cmp(&a.requested_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(mine)
    }

    /// Every request raised against a job, oldest first, for the admin review queue.
    pub fn list_job_requests(&self, job_id: &JobId) -> Result<Vec<JobRequest>, DispatchError> {
        self.job(job_id)?;
        let mut requests = self.store.requests_for_job(job_id)?;
        requests.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(requests)
    }

    /// Open jobs this provider passes the evaluator for and has not already claimed.
    pub fn list_eligible_jobs(
        &self,
        provider_id: &ProviderId,
    ) -> Result<Vec<EligibleJob>, DispatchError> {
        let provider = self.provider(provider_id)?;
        let criteria = EligibilityCriteria::from(&self.settings()?);
        let jobs = self.store.list_jobs()?;
        let claimed: Vec<JobId> = self
            .store
            .requests_for_provider(provider_id)?
            .into_iter()
            .filter(JobRequest::is_active)
            .map(|request| request.job_id)
            .collect();
        let workloads = WorkloadSnapshot::from_jobs(&jobs);

        let mut eligible: Vec<EligibleJob> = jobs
            .iter()
            .filter(|job| job.is_open() && !claimed.contains(&job.id))
            .filter_map(|job| {
                self.evaluator
                    .assess(job, &provider, &workloads, &criteria)
                    .ok()
                    .map(|candidate| EligibleJob {
                        job: job.clone(),
                        active_workload: candidate.active_workload,
                        area_match: candidate.area_match,
                    })
            })
            .collect();
        eligible.sort_by(|a, b| {
            a.job
                .created_at
                .cmp(&b.job.created_at)
                .then_with(|| a.job.id.cmp(&b.job.id))
        });
        Ok(eligible)
    }

    /// Ranked providers for the admin assignment picker.
    pub fn eligible_providers(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<EligibleProvider>, DispatchError> {
        let job = self.job(job_id)?;
        let criteria = EligibilityCriteria::from(&self.settings()?);
        let providers = self.store.list_providers()?;
        let jobs = self.store.list_jobs()?;
        Ok(self.evaluator.rank(&job, &providers, &jobs, &criteria))
    }

    pub fn explain_eligibility(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<ProviderAssessment>, DispatchError> {
        let job = self.job(job_id)?;
        let criteria = EligibilityCriteria::from(&self.settings()?);
        let providers = self.store.list_providers()?;
        let jobs = self.store.list_jobs()?;
        Ok(self.evaluator.explain(&job, &providers, &jobs, &criteria))
    }

    /// Current settings; defaults are persisted on first read.
    pub fn settings(&self) -> Result<AutoApprovalSettings, DispatchError> {
        for _ in 0..WRITE_RETRIES {
            if let Some(settings) = self.store.load_settings()? {
                return Ok(settings);
            }
            match self.store.store_settings(AutoApprovalSettings::default()) {
                Ok(created) => {
                    info!("auto-approval settings initialised with defaults");
                    return Ok(created);
                }
                Err(RepositoryError::Conflict) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(RepositoryError::Conflict.into())
    }

    pub fn update_settings(
        &self,
        update: SettingsUpdate,
    ) -> Result<AutoApprovalSettings, DispatchError> {
        for _ in 0..WRITE_RETRIES {
            let next = self.settings()?.apply(&update)?;
            match self.store.store_settings(next) {
                Ok(stored) => {
                    info!(
                        enabled = stored.enabled,
                        age_threshold_hours = stored.age_threshold_hours,
                        max_open_jobs_limit = stored.max_open_jobs_limit,
                        "auto-approval settings updated"
                    );
                    return Ok(stored);
                }
                Err(RepositoryError::Conflict) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(RepositoryError::Conflict.into())
    }

    pub(super) fn job(&self, job_id: &JobId) -> Result<Job, DispatchError> {
        self.store
            .fetch_job(job_id)?
            .ok_or_else(|| DispatchError::not_found(EntityKind::Job, job_id))
    }

    pub(super) fn provider(&self, provider_id: &ProviderId) -> Result<Provider, DispatchError> {
        self.store
            .fetch_provider(provider_id)?
            .ok_or_else(|| DispatchError::not_found(EntityKind::Provider, provider_id))
    }

    /// Persist a state transition. Losing the compare-and-set is surfaced, never retried.
    fn write_transition(&self, job: Job) -> Result<Job, DispatchError> {
        let job_id = job.id.clone();
        self.store.update_job(job).map_err(|err| match err {
            RepositoryError::Conflict => DispatchError::ConflictingWrite { job_id },
            RepositoryError::NotFound => DispatchError::not_found(EntityKind::Job, &job_id),
            other => other.into(),
        })
    }

    /// Persist a request transition. A stale revision means another writer moved the
    /// request first; the caller's view is discarded rather than written over it.
    pub(super) fn write_request(&self, request: JobRequest) -> Result<JobRequest, DispatchError> {
        let request_id = request.id.clone();
        let job_id = request.job_id.clone();
        self.store.update_request(request).map_err(|err| match err {
            RepositoryError::Conflict => DispatchError::ConflictingWrite { job_id },
            RepositoryError::NotFound => {
                DispatchError::not_found(EntityKind::Request, &request_id)
            }
            other => other.into(),
        })
    }

    /// Expire the requests `select` picks from the job's current request set. Expiry is
    /// idempotent, so a pass that loses a request race is replayed from a fresh read.
    fn expire_requests<F>(
        &self,
        job_id: &JobId,
        at: DateTime<Utc>,
        select: F,
    ) -> Result<usize, DispatchError>
    where
        F: Fn(&[JobRequest]) -> Vec<RequestId>,
    {
        let mut expired = 0;
        for _ in 0..WRITE_RETRIES {
            let job_requests = self.store.requests_for_job(job_id)?;
            let targets = select(&job_requests);
            let mut lost_race = false;
            for mut request in job_requests
                .into_iter()
                .filter(|request| targets.contains(&request.id))
            {
                if !request.expire(at) {
                    continue;
                }
                match self.store.update_request(request) {
                    Ok(_) => expired += 1,
                    Err(RepositoryError::Conflict) => lost_race = true,
                    Err(other) => return Err(other.into()),
                }
            }
            if !lost_race {
                return Ok(expired);
            }
        }
        Err(DispatchError::ConflictingWrite {
            job_id: job_id.clone(),
        })
    }

    /// Recompute the job's denormalised request counters from the request collection.
    pub(super) fn refresh_request_counters(&self, job_id: &JobId) -> Result<Job, DispatchError> {
        for _ in 0..WRITE_RETRIES {
            let mut job = self.job(job_id)?;
            let active = requests::active_count(&self.store.requests_for_job(job_id)?);
            if job.request_count == active && job.has_active_requests == (active > 0) {
                return Ok(job);
            }
            job.request_count = active;
            job.has_active_requests = active > 0;
            match self.store.update_job(job) {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::Conflict) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(DispatchError::ConflictingWrite {
            job_id: job_id.clone(),
        })
    }

    /// Notifications follow a committed write, so a delivery failure is logged, not returned.
    pub(super) fn publish(&self, notice: DispatchNotice) {
        let template = notice.template.clone();
        if let Err(err) = self.notifier.notify(notice) {
            warn!(template = %template, error = %err, "dispatch notification failed");
        }
    }
}
