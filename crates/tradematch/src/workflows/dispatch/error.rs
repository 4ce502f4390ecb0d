use std::fmt;

use serde::Serialize;

use super::domain::{JobId, ProviderId};
use super::repository::RepositoryError;
use super::settings::SettingsError;

/// Entity referenced by a dispatch error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Provider,
    Request,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Job => "job",
            EntityKind::Provider => "provider",
            EntityKind::Request => "request",
        };
        f.write_str(label)
    }
}

/// A state machine precondition was not met.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{entity} {id} is {current}; operation requires {required}")]
pub struct InvalidTransition {
    pub entity: EntityKind,
    pub id: String,
    pub current: &'static str,
    pub required: &'static str,
}

/// Error raised by the dispatch service and its state machines.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("provider {provider_id} already holds an active request for job {job_id}")]
    DuplicateActiveRequest {
        job_id: JobId,
        provider_id: ProviderId,
    },
    #[error("provider {provider_id} already has {limit} pending requests")]
    ProviderRequestLimitExceeded {
        provider_id: ProviderId,
        limit: usize,
    },
    #[error("no eligible provider for job {job_id}")]
    NoEligibleProvider { job_id: JobId },
    #[error("job {job_id} was modified concurrently; re-fetch and retry")]
    ConflictingWrite { job_id: JobId },
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: String },
    #[error("provider {provider_id} is {status} and cannot take work")]
    ProviderNotApproved {
        provider_id: ProviderId,
        status: &'static str,
    },
    #[error("unassigning job {job_id} requires explicit confirmation")]
    ConfirmationRequired { job_id: JobId },
    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl DispatchError {
    pub(crate) fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidTransition(_) => "invalid_transition",
            DispatchError::DuplicateActiveRequest { .. } => "duplicate_active_request",
            DispatchError::ProviderRequestLimitExceeded { .. } => {
                "provider_request_limit_exceeded"
            }
            DispatchError::NoEligibleProvider { .. } => "no_eligible_provider",
            DispatchError::ConflictingWrite { .. } => "conflicting_write",
            DispatchError::NotFound { .. } => "not_found",
            DispatchError::ProviderNotApproved { .. } => "provider_not_approved",
            DispatchError::ConfirmationRequired { .. } => "confirmation_required",
            DispatchError::InvalidSettings(_) => "invalid_settings",
            DispatchError::Repository(_) => "repository_unavailable",
        }
    }
}
