//! Provider job requests: `pending -> {approved, rejected, auto_approved, expired}`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Job, JobRequest, JobSnapshot, Provider, ProviderId, RequestId, RequestStatus,
    AUTO_APPROVAL_ACTOR,
};
use super::error::{DispatchError, EntityKind, InvalidTransition};

pub const DEFAULT_PENDING_REQUEST_CAP: usize = 5;

/// Operator decision on a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject {
        #[serde(default)]
        reason: Option<String>,
    },
}

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_request_id() -> RequestId {
    let id = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RequestId(format!("req-{id:06}"))
}

/// Check the creation rules against the job's and the provider's existing requests.
pub(crate) fn ensure_can_request(
    job: &Job,
    provider: &Provider,
    job_requests: &[JobRequest],
    provider_requests: &[JobRequest],
    pending_cap: usize,
) -> Result<(), DispatchError> {
    if !provider.is_approved() {
        return Err(DispatchError::ProviderNotApproved {
            provider_id: provider.id.clone(),
            status: provider.status.label(),
        });
    }

    if !job.is_open() {
        return Err(InvalidTransition {
            entity: EntityKind::Job,
            id: job.id.0.clone(),
            current: job.state().label(),
            required: "unassigned",
        }
        .into());
    }

    if job_requests
        .iter()
        .any(|request| request.belongs_to(&job.id, &provider.id) && request.is_active())
    {
        return Err(DispatchError::DuplicateActiveRequest {
            job_id: job.id.clone(),
            provider_id: provider.id.clone(),
        });
    }

    let pending = provider_requests
        .iter()
        .filter(|request| request.status == RequestStatus::Pending)
        .count();
    if pending >= pending_cap {
        return Err(DispatchError::ProviderRequestLimitExceeded {
            provider_id: provider.id.clone(),
            limit: pending_cap,
        });
    }

    Ok(())
}

pub(crate) fn open_request(
    id: RequestId,
    job: &Job,
    provider: &Provider,
    at: DateTime<Utc>,
) -> JobRequest {
    JobRequest {
        id,
        job_id: job.id.clone(),
        provider_id: provider.id.clone(),
        provider_name: provider.display_name().to_string(),
        job: JobSnapshot {
            customer_name: job.customer_name.clone(),
            location: job.location.clone(),
            job_created_at: job.created_at,
        },
        status: RequestStatus::Pending,
        requested_at: at,
        reviewed_by: None,
        reviewed_at: None,
        rejection_reason: None,
        expired_at: None,
        auto_approved: false,
        auto_approval_run: None,
        revision: 0,
    }
}

fn require_pending(request: &JobRequest) -> Result<(), InvalidTransition> {
    if request.status == RequestStatus::Pending {
        Ok(())
    } else {
        Err(InvalidTransition {
            entity: EntityKind::Request,
            id: request.id.0.clone(),
            current: request.status.label(),
            required: RequestStatus::Pending.label(),
        })
    }
}

impl JobRequest {
    /// Record the operator's decision. Approval does not assign the job.
    pub(crate) fn review(
        &mut self,
        decision: &ReviewDecision,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        require_pending(self)?;
        match decision {
            ReviewDecision::Approve => {
                self.status = RequestStatus::Approved;
            }
            ReviewDecision::Reject { reason } => {
                self.status = RequestStatus::Rejected;
                self.rejection_reason = reason.clone().filter(|value| !value.trim().is_empty());
            }
        }
        self.reviewed_by = Some(actor.to_string());
        self.reviewed_at = Some(at);
        Ok(())
    }

    pub(crate) fn auto_approve(
        &mut self,
        run_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        require_pending(self)?;
        self.status = RequestStatus::AutoApproved;
        self.reviewed_by = Some(AUTO_APPROVAL_ACTOR.to_string());
        self.reviewed_at = Some(at);
        self.auto_approved = true;
        self.auto_approval_run = Some(run_id.to_string());
        Ok(())
    }

    /// Returns false when the request was already closed.
    pub(crate) fn expire(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = RequestStatus::Expired;
        self.expired_at = Some(at);
        true
    }
}

/// Active requests for the job held by anyone other than `keep`.
pub(crate) fn superseded<'a>(
    job_requests: &'a [JobRequest],
    keep: &'a ProviderId,
) -> impl Iterator<Item = &'a JobRequest> {
    job_requests
        .iter()
        .filter(move |request| request.is_active() && &request.provider_id != keep)
}

/// Requests to expire when a job completes: everything still pending, plus approvals held
/// by providers other than the one who did the work.
pub(crate) fn closed_by_completion<'a>(
    job_requests: &'a [JobRequest],
    assignee: Option<&'a ProviderId>,
) -> impl Iterator<Item = &'a JobRequest> {
    job_requests.iter().filter(move |request| {
        request.status == RequestStatus::Pending
            || (request.is_active() && Some(&request.provider_id) != assignee)
    })
}

pub(crate) fn active_count(job_requests: &[JobRequest]) -> u32 {
    job_requests
        .iter()
        .filter(|request| request.is_active())
        .count() as u32
}
