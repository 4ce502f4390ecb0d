//! In-process document store and notifier used by the CLI, the HTTP service, and tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{Job, JobId, JobRequest, Provider, ProviderId, RequestId};
use super::repository::{
    DispatchNotice, DispatchNotifier, JobRepository, NotifyError, ProviderRepository,
    RepositoryError, RequestRepository, SettingsRepository,
};
use super::settings::AutoApprovalSettings;

#[derive(Default)]
struct Documents {
    jobs: BTreeMap<JobId, Job>,
    providers: Vec<Provider>,
    requests: BTreeMap<RequestId, JobRequest>,
    settings: Option<AutoApprovalSettings>,
}

/// Mutex-guarded collections. Each trait call holds the lock for one document operation.
#[derive(Default, Clone)]
pub struct InMemoryDispatchStore {
    documents: Arc<Mutex<Documents>>,
}

impl InMemoryDispatchStore {
    fn lock(&self) -> Result<MutexGuard<'_, Documents>, RepositoryError> {
        self.documents
            .lock()
            .map_err(|_| RepositoryError::Unavailable("dispatch store lock poisoned".to_string()))
    }
}

impl JobRepository for InMemoryDispatchStore {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.jobs.contains_key(&job.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.lock()?.jobs.get(id).cloned())
    }

    fn list_jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        Ok(self.lock()?.jobs.values().cloned().collect())
    }

    fn update_job(&self, mut job: Job) -> Result<Job, RepositoryError> {
        let mut guard = self.lock()?;
        let stored = guard.jobs.get(&job.id).ok_or(RepositoryError::NotFound)?;
        if stored.revision != job.revision {
            return Err(RepositoryError::Conflict);
        }
        job.revision += 1;
        guard.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }
}

impl ProviderRepository for InMemoryDispatchStore {
    fn insert_provider(&self, provider: Provider) -> Result<Provider, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.providers.iter().any(|existing| existing.id == provider.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.providers.push(provider.clone());
        Ok(provider)
    }

    fn fetch_provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        Ok(self
            .lock()?
            .providers
            .iter()
            .find(|provider| &provider.id == id)
            .cloned())
    }

    fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError> {
        Ok(self.lock()?.providers.clone())
    }
}

impl RequestRepository for InMemoryDispatchStore {
    fn insert_request(&self, request: JobRequest) -> Result<JobRequest, RepositoryError> {
        let mut guard = self.lock()?;
        let duplicate_pair = request.is_active()
            && guard.requests.values().any(|existing| {
                existing.is_active() && existing.belongs_to(&request.job_id, &request.provider_id)
            });
        if duplicate_pair || guard.requests.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<JobRequest>, RepositoryError> {
        Ok(self.lock()?.requests.get(id).cloned())
    }

    fn update_request(&self, mut request: JobRequest) -> Result<JobRequest, RepositoryError> {
        let mut guard = self.lock()?;
        let slot = guard
            .requests
            .get_mut(&request.id)
            .ok_or(RepositoryError::NotFound)?;
        if slot.revision != request.revision {
            return Err(RepositoryError::Conflict);
        }
        request.revision += 1;
        *slot = request.clone();
        Ok(request)
    }

    fn requests_for_job(&self, job_id: &JobId) -> Result<Vec<JobRequest>, RepositoryError> {
        Ok(self
            .lock()?
            .requests
            .values()
            .filter(|request| &request.job_id == job_id)
            .cloned()
            .collect())
    }

    fn requests_for_provider(
        &self,
        provider_id: &ProviderId,
    ) -> Result<Vec<JobRequest>, RepositoryError> {
        Ok(self
            .lock()?
            .requests
            .values()
            .filter(|request| &request.provider_id == provider_id)
            .cloned()
            .collect())
    }
}

impl SettingsRepository for InMemoryDispatchStore {
    fn load_settings(&self) -> Result<Option<AutoApprovalSettings>, RepositoryError> {
        Ok(self.lock()?.settings.clone())
    }

    fn store_settings(
        &self,
        mut settings: AutoApprovalSettings,
    ) -> Result<AutoApprovalSettings, RepositoryError> {
        let mut guard = self.lock()?;
        let current_revision = guard.settings.as_ref().map_or(0, |stored| stored.revision);
        if current_revision != settings.revision {
            return Err(RepositoryError::Conflict);
        }
        settings.revision += 1;
        guard.settings = Some(settings.clone());
        Ok(settings)
    }
}

/// Notifier that keeps every notice in memory.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<DispatchNotice>>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<DispatchNotice> {
        self.notices
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn templates(&self) -> Vec<String> {
        self.notices()
            .into_iter()
            .map(|notice| notice.template)
            .collect()
    }
}

impl DispatchNotifier for RecordingNotifier {
    fn notify(&self, notice: DispatchNotice) -> Result<(), NotifyError> {
        self.notices
            .lock()
            .map_err(|_| NotifyError::Transport("notice buffer lock poisoned".to_string()))?
            .push(notice);
        Ok(())
    }
}
