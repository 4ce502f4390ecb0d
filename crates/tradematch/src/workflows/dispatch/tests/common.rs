use std::sync::Arc;

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::dispatch::{
    AutoApprovalSettings, Clock, DispatchNotice, DispatchNotifier, DispatchService,
    EngineConfig, InMemoryDispatchStore, Job, JobId, JobLocation, JobRepository, JobRequest,
    ManualClock, NotifyError, Provider, ProviderId, ProviderRepository, ProviderStatus,
    RecordingNotifier, RepositoryError, RequestId, RequestRepository, SettingsRepository,
    SettingsUpdate,
};

pub(super) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 10, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn provider(id: &str, areas: &[&str]) -> Provider {
    Provider {
        id: ProviderId(id.to_string()),
        name: format!("{id} Trades"),
        company: None,
        service_areas: areas.iter().map(|area| area.to_string()).collect(),
        status: ProviderStatus::Approved,
    }
}

pub(super) fn provider_with_status(id: &str, status: ProviderStatus) -> Provider {
    Provider {
        status,
        ..provider(id, &["Other"])
    }
}

pub(super) fn job(id: &str, postcode: Option<&str>, created_at: DateTime<Utc>) -> Job {
    Job::new(
        JobId(id.to_string()),
        "Mrs Hargreaves",
        "Replace cracked roof tiles",
        JobLocation {
            address: "14 Steep Hill".to_string(),
            postcode: postcode.map(str::to_string),
        },
        created_at,
    )
}

pub(super) fn job_id(id: &str) -> JobId {
    JobId(id.to_string())
}

pub(super) fn provider_id(id: &str) -> ProviderId {
    ProviderId(id.to_string())
}

pub(super) type MemoryService = DispatchService<InMemoryDispatchStore, RecordingNotifier>;

pub(super) struct Harness {
    pub(super) service: MemoryService,
    pub(super) store: Arc<InMemoryDispatchStore>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) clock: Arc<ManualClock>,
}

impl Harness {
    pub(super) fn new() -> Self {
        let store = Arc::new(InMemoryDispatchStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let service =
            DispatchService::new(store.clone(), notifier.clone(), EngineConfig::default())
                .with_clock(clock.clone());
        Self {
            service,
            store,
            notifier,
            clock,
        }
    }

    pub(super) fn add_provider(&self, provider: Provider) -> ProviderId {
        self.store
            .insert_provider(provider)
            .expect("provider inserted")
            .id
    }

    /// Seed an open job created `hours_old` hours before the harness clock.
    pub(super) fn add_job(&self, id: &str, postcode: Option<&str>, hours_old: i64) -> JobId {
        let created_at = self.clock.now() - Duration::hours(hours_old);
        self.store
            .insert_job(job(id, postcode, created_at))
            .expect("job inserted")
            .id
    }

    /// Give `provider` `count` assigned, uncompleted jobs.
    pub(super) fn load_provider(&self, provider: &ProviderId, count: usize) {
        for index in 0..count {
            let id = format!("busy-{}-{index}", provider.0);
            let seeded = self.add_job(&id, None, 1);
            self.service
                .assign_job(&seeded, provider, "ops@tradematch", None)
                .expect("workload job assigned");
        }
    }

    pub(super) fn enable_auto_approval(&self, update: SettingsUpdate) -> AutoApprovalSettings {
        self.service
            .update_settings(SettingsUpdate {
                enabled: Some(true),
                ..update
            })
            .expect("settings updated")
    }

    pub(super) fn job(&self, id: &JobId) -> Job {
        self.store
            .fetch_job(id)
            .expect("store readable")
            .expect("job exists")
    }

    pub(super) fn request(&self, id: &RequestId) -> JobRequest {
        self.store
            .fetch_request(id)
            .expect("store readable")
            .expect("request exists")
    }

    pub(super) fn templates(&self) -> Vec<String> {
        self.notifier.templates()
    }
}

/// In-memory store with injectable write faults.
#[derive(Default)]
pub(super) struct FaultyStore {
    pub(super) inner: InMemoryDispatchStore,
    job_writes_conflict: bool,
    request_writes_offline: bool,
}

impl FaultyStore {
    /// Every job write loses the compare-and-set.
    pub(super) fn conflicting_jobs() -> Self {
        Self {
            job_writes_conflict: true,
            ..Self::default()
        }
    }

    /// Request writes fail as if the request collection were unreachable.
    pub(super) fn offline_request_writes() -> Self {
        Self {
            request_writes_offline: true,
            ..Self::default()
        }
    }
}

impl JobRepository for FaultyStore {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        self.inner.insert_job(job)
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        self.inner.fetch_job(id)
    }

    fn list_jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        self.inner.list_jobs()
    }

    fn update_job(&self, job: Job) -> Result<Job, RepositoryError> {
        if self.job_writes_conflict {
            return Err(RepositoryError::Conflict);
        }
        self.inner.update_job(job)
    }
}

impl ProviderRepository for FaultyStore {
    fn insert_provider(&self, provider: Provider) -> Result<Provider, RepositoryError> {
        self.inner.insert_provider(provider)
    }

    fn fetch_provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        self.inner.fetch_provider(id)
    }

    fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError> {
        self.inner.list_providers()
    }
}

impl RequestRepository for FaultyStore {
    fn insert_request(&self, request: JobRequest) -> Result<JobRequest, RepositoryError> {
        self.inner.insert_request(request)
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<JobRequest>, RepositoryError> {
        self.inner.fetch_request(id)
    }

    fn update_request(&self, request: JobRequest) -> Result<JobRequest, RepositoryError> {
        if self.request_writes_offline {
            return offline();
        }
        self.inner.update_request(request)
    }

    fn requests_for_job(&self, job_id: &JobId) -> Result<Vec<JobRequest>, RepositoryError> {
        self.inner.requests_for_job(job_id)
    }

    fn requests_for_provider(
        &self,
        provider_id: &ProviderId,
    ) -> Result<Vec<JobRequest>, RepositoryError> {
        self.inner.requests_for_provider(provider_id)
    }
}

impl SettingsRepository for FaultyStore {
    fn load_settings(&self) -> Result<Option<AutoApprovalSettings>, RepositoryError> {
        self.inner.load_settings()
    }

    fn store_settings(
        &self,
        settings: AutoApprovalSettings,
    ) -> Result<AutoApprovalSettings, RepositoryError> {
        self.inner.store_settings(settings)
    }
}

/// Store that is never reachable.
pub(super) struct UnavailableStore;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("store offline".to_string()))
}

impl JobRepository for UnavailableStore {
    fn insert_job(&self, _job: Job) -> Result<Job, RepositoryError> {
        offline()
    }

    fn fetch_job(&self, _id: &JobId) -> Result<Option<Job>, RepositoryError> {
        offline()
    }

    fn list_jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        offline()
    }

    fn update_job(&self, _job: Job) -> Result<Job, RepositoryError> {
        offline()
    }
}

impl ProviderRepository for UnavailableStore {
    fn insert_provider(&self, _provider: Provider) -> Result<Provider, RepositoryError> {
        offline()
    }

    fn fetch_provider(&self, _id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        offline()
    }

    fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError> {
        offline()
    }
}

impl RequestRepository for UnavailableStore {
    fn insert_request(&self, _request: JobRequest) -> Result<JobRequest, RepositoryError> {
        offline()
    }

    fn fetch_request(&self, _id: &RequestId) -> Result<Option<JobRequest>, RepositoryError> {
        offline()
    }

    fn update_request(&self, _request: JobRequest) -> Result<JobRequest, RepositoryError> {
        offline()
    }

    fn requests_for_job(&self, _job_id: &JobId) -> Result<Vec<JobRequest>, RepositoryError> {
        offline()
    }

    fn requests_for_provider(
        &self,
        _provider_id: &ProviderId,
    ) -> Result<Vec<JobRequest>, RepositoryError> {
        offline()
    }
}

impl SettingsRepository for UnavailableStore {
    fn load_settings(&self) -> Result<Option<AutoApprovalSettings>, RepositoryError> {
        offline()
    }

    fn store_settings(
        &self,
        _settings: AutoApprovalSettings,
    ) -> Result<AutoApprovalSettings, RepositoryError> {
        offline()
    }
}

/// Notifier whose transport is always down.
#[derive(Default)]
pub(super) struct BrokenNotifier;

impl DispatchNotifier for BrokenNotifier {
    fn notify(&self, _notice: DispatchNotice) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp relay refused connection".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
