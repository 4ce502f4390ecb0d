use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{Job, JobId, JobRequest, Provider, ProviderId, RequestId};
use super::settings::AutoApprovalSettings;

/// Job documents. `update_job` is a compare-and-set keyed on [`Job::revision`].
pub trait JobRepository: Send + Sync {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError>;
    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError>;
    fn list_jobs(&self) -> Result<Vec<Job>, RepositoryError>;
    /// Persist `job` if the stored revision still equals `job.revision`, returning the stored
    /// document with its revision bumped. A moved revision yields [`RepositoryError::Conflict`].
    fn update_job(&self, job: Job) -> Result<Job, RepositoryError>;
}

/// Provider roster. `list_providers` preserves registration order.
pub trait ProviderRepository: Send + Sync {
    fn insert_provider(&self, provider: Provider) -> Result<Provider, RepositoryError>;
    fn fetch_provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError>;
    fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError>;
}

/// Provider job requests. `update_request` is a compare-and-set keyed on
/// [`JobRequest::revision`].
pub trait RequestRepository: Send + Sync {
    /// Fails with [`RepositoryError::Conflict`] when the id exists or the (job, provider)
    /// pair already has an active request.
    fn insert_request(&self, request: JobRequest) -> Result<JobRequest, RepositoryError>;
    fn fetch_request(&self, id: &RequestId) -> Result<Option<JobRequest>, RepositoryError>;
    /// Persist `request` if the stored revision still equals `request.revision`, returning
    /// the stored document with its revision bumped.
    fn update_request(&self, request: JobRequest) -> Result<JobRequest, RepositoryError>;
    fn requests_for_job(&self, job_id: &JobId) -> Result<Vec<JobRequest>, RepositoryError>;
    fn requests_for_provider(
        &self,
        provider_id: &ProviderId,
    ) -> Result<Vec<JobRequest>, RepositoryError>;
}

/// Singleton auto-approval settings document.
pub trait SettingsRepository: Send + Sync {
    fn load_settings(&self) -> Result<Option<AutoApprovalSettings>, RepositoryError>;
    /// Compare-and-set on [`AutoApprovalSettings::revision`]; revision 0 creates the document.
    fn store_settings(
        &self,
        settings: AutoApprovalSettings,
    ) -> Result<AutoApprovalSettings, RepositoryError>;
}

/// Everything the dispatch service needs from the document store.
pub trait DispatchRepository:
    JobRepository + ProviderRepository + RequestRepository + SettingsRepository
{
}

impl<T> DispatchRepository for T where
    T: JobRepository + ProviderRepository + RequestRepository + SettingsRepository
{
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists or was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification hook (e-mail or chat adapters). Delivery is at-least-once.
pub trait DispatchNotifier: Send + Sync {
    fn notify(&self, notice: DispatchNotice) -> Result<(), NotifyError>;
}

/// Notification payload so adapters and tests can assert integration boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchNotice {
    pub template: String,
    pub job_id: Option<JobId>,
    pub details: BTreeMap<String, String>,
}

impl DispatchNotice {
    pub fn new(template: &str, job_id: Option<&JobId>) -> Self {
        Self {
            template: template.to_string(),
            job_id: job_id.cloned(),
            details: BTreeMap::new(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Notification dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
