//! Job assignment lifecycle: `unassigned -> assigned -> completed`.
//!
//! These functions mutate an in-memory [`Job`] only. Persisting the result with a
//! compare-and-set write, and expiring superseded requests, is the service's job.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{AssignmentStatus, CompletionStatus, Job, JobState, Provider, ProviderId};
use super::error::{EntityKind, InvalidTransition};

/// What an accepted assign call changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentChange {
    pub provider_id: ProviderId,
    pub previous_provider: Option<ProviderId>,
}

impl AssignmentChange {
    pub fn is_reassignment(&self) -> bool {
        self.previous_provider.is_some()
    }
}

fn invalid(job: &Job, required: &'static str) -> InvalidTransition {
    InvalidTransition {
        entity: EntityKind::Job,
        id: job.id.0.clone(),
        current: job.state().label(),
        required,
    }
}

/// Assign or reassign a job. The provider name cache is always taken from `provider`.
pub fn assign(
    job: &mut Job,
    provider: &Provider,
    actor: &str,
    notes: Option<String>,
    at: DateTime<Utc>,
) -> Result<AssignmentChange, InvalidTransition> {
    if job.state() == JobState::Completed {
        return Err(invalid(job, "unassigned or assigned"));
    }

    let previous_provider = job.assigned_provider_id.take();
    job.assigned_provider_id = Some(provider.id.clone());
    job.assigned_provider_name = Some(provider.display_name().to_string());
    job.assigned_by = Some(actor.to_string());
    job.assigned_at = Some(at);
    job.assignment_notes = notes.filter(|value| !value.trim().is_empty());
    job.assignment_status = AssignmentStatus::Assigned;

    Ok(AssignmentChange {
        provider_id: provider.id.clone(),
        previous_provider,
    })
}

/// Clear every assignment field. Returns the provider that lost the job.
pub fn unassign(job: &mut Job) -> Result<ProviderId, InvalidTransition> {
    if job.state() != JobState::Assigned {
        return Err(invalid(job, "assigned"));
    }

    let previous = job
        .assigned_provider_id
        .take()
        .ok_or_else(|| invalid(job, "assigned"))?;
    job.assigned_provider_name = None;
    job.assigned_by = None;
    job.assigned_at = None;
    job.assignment_notes = None;
    job.assignment_status = AssignmentStatus::Unassigned;
    Ok(previous)
}

/// Mark an assigned job completed. Assignment fields are kept as the record of who did the work.
pub fn complete(job: &mut Job, actor: &str, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
    if job.state() != JobState::Assigned {
        return Err(invalid(job, "assigned"));
    }

    job.completion_status = CompletionStatus::Completed;
    job.completed_at = Some(at);
    job.completed_by = Some(actor.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::dispatch::domain::{JobId, JobLocation, ProviderStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 2, 10, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    fn job() -> Job {
        Job::new(
            JobId("job-1".to_string()),
            "Ada Lovelace",
            "Replace boiler",
            JobLocation {
                address: "1 Castle Hill".to_string(),
                postcode: Some("LN1 3AA".to_string()),
            },
            now(),
        )
    }

    fn provider(id: &str, company: Option<&str>) -> Provider {
        Provider {
            id: ProviderId(id.to_string()),
            name: format!("{id} contact"),
            company: company.map(str::to_string),
            service_areas: vec!["Lincoln".to_string()],
            status: ProviderStatus::Approved,
        }
    }

    #[test]
    fn assign_sets_fields_and_caches_display_name() {
        let mut job = job();
        let change = assign(
            &mut job,
            &provider("prov-a", Some("Acme Heating")),
            "admin@example.com",
            Some("urgent".to_string()),
            now(),
        )
        .expect("assign from unassigned");

        assert!(!change.is_reassignment());
        assert_eq!(job.state(), JobState::Assigned);
        assert_eq!(job.assigned_provider_name.as_deref(), Some("Acme Heating"));
        assert_eq!(job.assigned_by.as_deref(), Some("admin@example.com"));
        assert_eq!(job.assigned_at, Some(now()));
        assert_eq!(job.assignment_notes.as_deref(), Some("urgent"));
        assert!(job.invariants_hold());
    }

    #[test]
    fn reassign_overwrites_previous_provider() {
        let mut job = job();
        assign(&mut job, &provider("prov-a", None), "admin", None, now()).expect("assign");
        let change = assign(&mut job, &provider("prov-b", None), "admin", None, now())
            .expect("reassign");

        assert_eq!(change.previous_provider, Some(ProviderId("prov-a".to_string())));
        assert_eq!(
            job.assigned_provider_id,
            Some(ProviderId("prov-b".to_string()))
        );
        assert_eq!(job.assigned_provider_name.as_deref(), Some("prov-b contact"));
    }

    #[test]
    fn unassign_requires_assigned_job() {
        let mut job = job();
        let err = unassign(&mut job).expect_err("unassigned job");
        assert_eq!(err.current, "unassigned");
        assert_eq!(err.required, "assigned");

        assign(&mut job, &provider("prov-a", None), "admin", None, now()).expect("assign");
        let previous = unassign(&mut job).expect("unassign");
        assert_eq!(previous, ProviderId("prov-a".to_string()));
        assert_eq!(job.state(), JobState::Unassigned);
        assert!(job.assigned_by.is_none());
        assert!(job.assigned_provider_name.is_none());
        assert!(job.invariants_hold());
    }

    #[test]
    fn completed_jobs_are_terminal() {
        let mut job = job();
        assert!(complete(&mut job, "admin", now()).is_err());

        assign(&mut job, &provider("prov-a", None), "admin", None, now()).expect("assign");
        complete(&mut job, "admin", now()).expect("complete");
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(
            job.assigned_provider_id,
            Some(ProviderId("prov-a".to_string()))
        );
        assert!(job.invariants_hold());

        let err = unassign(&mut job).expect_err("cannot unassign completed");
        assert_eq!(err.current, "completed");
        assert!(complete(&mut job, "admin", now()).is_err());
        assert!(assign(&mut job, &provider("prov-b", None), "admin", None, now()).is_err());
    }
}
