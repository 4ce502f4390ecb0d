use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Actor recorded on every mutation performed by the unattended sweeper.
pub const AUTO_APPROVAL_ACTOR: &str = "auto-approval-system";

/// Assignment note written when the sweeper assigns a job.
pub const AUTO_ASSIGNMENT_NOTE: &str = "Automatically assigned by the auto-approval sweep";

/// Identifier wrapper for submitted jobs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

/// Identifier wrapper for registered providers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

/// Identifier wrapper for provider job requests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the work takes place. The postcode drives service-area matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLocation {
    pub address: String,
    #[serde(default)]
    pub postcode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Unassigned,
    Assigned,
}

impl AssignmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AssignmentStatus::Unassigned => "unassigned",
            AssignmentStatus::Assigned => "assigned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Pending,
    Completed,
}

impl CompletionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            CompletionStatus::Pending => "pending",
            CompletionStatus::Completed => "completed",
        }
    }
}

/// Combined view of the two status fields, used when reporting transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Unassigned,
    Assigned,
    Completed,
}

impl JobState {
    pub const fn label(self) -> &'static str {
        match self {
            JobState::Unassigned => "unassigned",
            JobState::Assigned => "assigned",
            JobState::Completed => "completed",
        }
    }
}

/// A submitted work request awaiting or under provider assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub customer_name: String,
    pub description: String,
    pub location: JobLocation,
    pub created_at: DateTime<Utc>,
    pub assigned_provider_id: Option<ProviderId>,
    pub assigned_provider_name: Option<String>,
    pub assigned_by: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub assignment_notes: Option<String>,
    pub assignment_status: AssignmentStatus,
    pub completion_status: CompletionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub request_count: u32,
    pub has_active_requests: bool,
    /// Store-managed version used for compare-and-set writes.
    #[serde(default)]
    pub revision: u64,
}

impl Job {
    pub fn new(
        id: JobId,
        customer_name: impl Into<String>,
        description: impl Into<String>,
        location: JobLocation,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_name: customer_name.into(),
            description: description.into(),
            location,
            created_at,
            assigned_provider_id: None,
            assigned_provider_name: None,
            assigned_by: None,
            assigned_at: None,
            assignment_notes: None,
            assignment_status: AssignmentStatus::Unassigned,
            completion_status: CompletionStatus::Pending,
            completed_at: None,
            completed_by: None,
            request_count: 0,
            has_active_requests: false,
            revision: 0,
        }
    }

    pub fn state(&self) -> JobState {
        match (self.assignment_status, self.completion_status) {
            (_, CompletionStatus::Completed) => JobState::Completed,
            (AssignmentStatus::Assigned, CompletionStatus::Pending) => JobState::Assigned,
            (AssignmentStatus::Unassigned, CompletionStatus::Pending) => JobState::Unassigned,
        }
    }

    /// Unassigned and not completed; the only state providers may request.
    pub fn is_open(&self) -> bool {
        self.state() == JobState::Unassigned
    }

    pub fn postcode(&self) -> Option<&str> {
        self.location.postcode.as_deref()
    }

    /// True when this job counts towards the provider's active workload.
    pub fn occupies(&self, provider_id: &ProviderId) -> bool {
        self.completion_status != CompletionStatus::Completed
            && self.assigned_provider_id.as_ref() == Some(provider_id)
    }

    pub fn invariants_hold(&self) -> bool {
        let assigned = self.assignment_status == AssignmentStatus::Assigned;
        let provider_matches = self.assigned_provider_id.is_some() == assigned;
        let completion_matches =
            self.completion_status != CompletionStatus::Completed || assigned;
        let counters_match = self.has_active_requests == (self.request_count > 0);
        provider_matches && completion_matches && counters_match
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Approved,
    Rejected,
    Inactive,
}

impl ProviderStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ProviderStatus::Pending => "pending",
            ProviderStatus::Approved => "approved",
            ProviderStatus::Rejected => "rejected",
            ProviderStatus::Inactive => "inactive",
        }
    }
}

/// A registered tradesperson or company that can be assigned jobs once approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    pub service_areas: Vec<String>,
    pub status: ProviderStatus,
}

impl Provider {
    pub fn display_name(&self) -> &str {
        match self.company.as_deref() {
            Some(company) if !company.trim().is_empty() => company,
            _ => &self.name,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ProviderStatus::Approved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    AutoApproved,
    Expired,
}

impl RequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::AutoApproved => "auto_approved",
            RequestStatus::Expired => "expired",
        }
    }

    /// Pending or approved (by an operator or the sweeper).
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            RequestStatus::Pending | RequestStatus::Approved | RequestStatus::AutoApproved
        )
    }
}

/// Job details cached on a request at the moment it was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub customer_name: String,
    pub location: JobLocation,
    pub job_created_at: DateTime<Utc>,
}

/// A provider's claim on a job, independent of admin-initiated assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: RequestId,
    pub job_id: JobId,
    pub provider_id: ProviderId,
    pub provider_name: String,
    pub job: JobSnapshot,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_approved: bool,
    #[serde(default)]
    pub auto_approval_run: Option<String>,
    /// Store-managed version used for compare-and-set writes.
    #[serde(default)]
    pub revision: u64,
}

impl JobRequest {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn belongs_to(&self, job_id: &JobId, provider_id: &ProviderId) -> bool {
        &self.job_id == job_id && &self.provider_id == provider_id
    }
}
