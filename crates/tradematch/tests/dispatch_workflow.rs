use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use tradematch::workflows::dispatch::{
    AutoApprovalSettings, DispatchError, DispatchService, EngineConfig, InMemoryDispatchStore,
    Job, JobId, JobLocation, JobRepository, JobRequest, ManualClock, Provider, ProviderId,
    ProviderRepository, ProviderStatus, RecordingNotifier, RepositoryError, RequestId,
    RequestRepository, RequestStatus, ReviewDecision, SettingsRepository, SettingsUpdate,
    SweepOutcome,
};

fn provider(id: &str, company: Option<&str>, areas: &[&str]) -> Provider {
    Provider {
        id: ProviderId(id.to_string()),
        name: format!("{id} owner"),
        company: company.map(str::to_string),
        service_areas: areas.iter().map(|area| area.to_string()).collect(),
        status: ProviderStatus::Approved,
    }
}

fn job(id: &str, postcode: &str, created_at: chrono::DateTime<Utc>) -> Job {
    Job::new(
        JobId(id.to_string()),
        "Mr Patel",
        "Boiler not firing",
        JobLocation {
            address: "3 Minster Yard".to_string(),
            postcode: Some(postcode.to_string()),
        },
        created_at,
    )
}

#[test]
fn provider_request_to_sweep_lifecycle() {
    let start = Utc
        .with_ymd_and_hms(2025, 3, 3, 8, 0, 0)
        .single()
        .expect("valid timestamp");
    let store = Arc::new(InMemoryDispatchStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(start));
    let service = DispatchService::new(store.clone(), notifier.clone(), EngineConfig::default())
        .with_clock(clock.clone());

    let lincoln = store
        .insert_provider(provider("prov-lincoln", Some("Cathedral Plumbing"), &["Lincoln"]))
        .expect("provider seeded")
        .id;
    let grimsby = store
        .insert_provider(provider("prov-grimsby", None, &["Grimsby"]))
        .expect("provider seeded")
        .id;
    let manual = store
        .insert_job(job("job-manual", "LN2 1PB", start))
        .expect("job seeded")
        .id;
    let stale = store
        .insert_job(job("job-stale", "LN1 3AA", start))
        .expect("job seeded")
        .id;

    let request = service
        .create_request(&manual, &lincoln)
        .expect("request raised");
    assert_eq!(request.provider_name, "Cathedral Plumbing");
    service
        .review_request(&request.id, "ops", ReviewDecision::Approve)
        .expect("request approved");
    let assigned = service
        .assign_job(&manual, &lincoln, "ops", None)
        .expect("assigned");
    assert_eq!(assigned.assigned_provider_name.as_deref(), Some("Cathedral Plumbing"));
    service.complete_job(&manual, "ops").expect("completed");

    let grimsby_request = service
        .create_request(&stale, &grimsby)
        .expect("out-of-area providers may still ask");

    service
        .update_settings(SettingsUpdate {
            enabled: Some(true),
            ..SettingsUpdate::default()
        })
        .expect("auto-approval enabled");
    clock.advance(Duration::hours(48));

    let report = service.run_auto_approval_sweep().expect("sweep runs");
    assert_eq!(report.outcome, SweepOutcome::Completed);
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].job_id, stale);
    assert_eq!(report.assigned[0].provider_id, lincoln);
    assert_eq!(report.assigned[0].active_workload, 0);

    let swept = store
        .fetch_request(&grimsby_request.id)
        .expect("store readable")
        .expect("request exists");
    assert_eq!(swept.status, RequestStatus::Expired);

    for job in store.list_jobs().expect("store readable") {
        assert!(job.invariants_hold(), "{} broke an invariant", job.id);
    }
    assert_eq!(
        notifier.templates(),
        vec![
            "request_created",
            "request_approved",
            "job_assigned",
            "job_completed",
            "request_created",
            "job_assigned",
            "auto_approval_sweep",
        ]
    );
}

/// Holds the first `parties` job reads until all of them have read, so every writer starts
/// from the same revision.
struct LockstepStore {
    inner: InMemoryDispatchStore,
    barrier: Barrier,
    parties: usize,
    reads: AtomicUsize,
}

impl LockstepStore {
    fn new(parties: usize) -> Self {
        Self {
            inner: InMemoryDispatchStore::default(),
            barrier: Barrier::new(parties),
            parties,
            reads: AtomicUsize::new(0),
        }
    }
}

impl JobRepository for LockstepStore {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        self.inner.insert_job(job)
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        let fetched = self.inner.fetch_job(id);
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.parties {
            self.barrier.wait();
        }
        fetched
    }

    fn list_jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        self.inner.list_jobs()
    }

    fn update_job(&self, job: Job) -> Result<Job, RepositoryError> {
        self.inner.update_job(job)
    }
}

impl ProviderRepository for LockstepStore {
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

impl RequestRepository for LockstepStore {
    fn insert_request(&self, request: JobRequest) -> Result<JobRequest, RepositoryError> {
        self.inner.insert_request(request)
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<JobRequest>, RepositoryError> {
        self.inner.fetch_request(id)
    }

    fn update_request(&self, request: JobRequest) -> Result<JobRequest, RepositoryError> {
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

impl SettingsRepository for LockstepStore {
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

#[test]
fn concurrent_assigns_on_one_job_have_a_single_winner() {
    const WRITERS: usize = 4;
    let store = Arc::new(LockstepStore::new(WRITERS));
    let providers: Vec<ProviderId> = (0..WRITERS)
        .map(|index| {
            store
                .insert_provider(provider(&format!("prov-{index}"), None, &["Other"]))
                .expect("provider seeded")
                .id
        })
        .collect();
    let target = store
        .insert_job(job("job-race", "LN1 3AA", Utc::now()))
        .expect("job seeded")
        .id;
    let service = Arc::new(DispatchService::new(
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        EngineConfig::default(),
    ));

    let outcomes: Vec<Result<Job, DispatchError>> = thread::scope(|scope| {
        let handles: Vec<_> = providers
            .iter()
            .map(|provider_id| {
                let service = Arc::clone(&service);
                let target = target.clone();
                scope.spawn(move || service.assign_job(&target, provider_id, "ops", None))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("writer thread finished"))
            .collect()
    });

    let winners: Vec<&Job> = outcomes.iter().filter_map(|outcome| outcome.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(
                    err,
                    DispatchError::ConflictingWrite { .. } | DispatchError::InvalidTransition(_)
                ),
                "unexpected loser error: {err}"
            );
        }
    }

    let stored = store
        .fetch_job(&target)
        .expect("store readable")
        .expect("job exists");
    assert_eq!(stored.assigned_provider_id, winners[0].assigned_provider_id);
    assert!(stored.invariants_hold());
}

type Interleaved = Box<dyn FnOnce() + Send>;

/// Runs a one-shot action immediately before the next request insert or request write
/// reaches the shared documents, so a second operator can act mid-operation.
#[derive(Default)]
struct InterleavingStore {
    inner: InMemoryDispatchStore,
    before_insert: Mutex<Option<Interleaved>>,
    before_update: Mutex<Option<Interleaved>>,
}

impl InterleavingStore {
    fn fire(slot: &Mutex<Option<Interleaved>>) {
        let action = slot.lock().ok().and_then(|mut pending| pending.take());
        if let Some(action) = action {
            action();
        }
    }
}

impl JobRepository for InterleavingStore {
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
        self.inner.update_job(job)
    }
}

impl ProviderRepository for InterleavingStore {
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

impl RequestRepository for InterleavingStore {
    fn insert_request(&self, request: JobRequest) -> Result<JobRequest, RepositoryError> {
        Self::fire(&self.before_insert);
        self.inner.insert_request(request)
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<JobRequest>, RepositoryError> {
        self.inner.fetch_request(id)
    }

    fn update_request(&self, request: JobRequest) -> Result<JobRequest, RepositoryError> {
        Self::fire(&self.before_update);
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

impl SettingsRepository for InterleavingStore {
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

struct RaceFixture {
    store: Arc<InterleavingStore>,
    service: DispatchService<InterleavingStore, RecordingNotifier>,
    target: JobId,
    first: ProviderId,
    second: ProviderId,
}

impl RaceFixture {
    fn new() -> Self {
        let store = Arc::new(InterleavingStore::default());
        let first = store
            .insert_provider(provider("prov-a", None, &["Lincoln"]))
            .expect("provider seeded")
            .id;
        let second = store
            .insert_provider(provider("prov-b", None, &["Lincoln"]))
            .expect("provider seeded")
            .id;
        let target = store
            .insert_job(job("job-1", "LN1 3AA", Utc::now()))
            .expect("job seeded")
            .id;
        let service = DispatchService::new(
            store.clone(),
            Arc::new(RecordingNotifier::default()),
            EngineConfig::default(),
        );
        Self {
            store,
            service,
            target,
            first,
            second,
        }
    }

    /// An operator working directly against the shared documents assigns the job to the
    /// second provider.
    fn rival_assignment(&self) -> Interleaved {
        let rival = DispatchService::new(
            Arc::new(self.store.inner.clone()),
            Arc::new(RecordingNotifier::default()),
            EngineConfig::default(),
        );
        let target = self.target.clone();
        let assignee = self.second.clone();
        Box::new(move || {
            rival
                .assign_job(&target, &assignee, "ops-2", None)
                .expect("rival assignment lands");
        })
    }

    fn job(&self) -> Job {
        self.store
            .fetch_job(&self.target)
            .expect("store readable")
            .expect("job exists")
    }
}

#[test]
fn review_that_loses_to_a_reassignment_cannot_revive_the_request() {
    let fixture = RaceFixture::new();
    let request = fixture
        .service
        .create_request(&fixture.target, &fixture.first)
        .expect("request raised");
    *fixture
        .store
        .before_update
        .lock()
        .expect("hook slot") = Some(fixture.rival_assignment());

    let outcome = fixture
        .service
        .review_request(&request.id, "ops-1", ReviewDecision::Approve);

    assert!(
        matches!(outcome, Err(DispatchError::ConflictingWrite { .. })),
        "stale review must not be written: {outcome:?}"
    );
    let stored = fixture
        .store
        .fetch_request(&request.id)
        .expect("store readable")
        .expect("request exists");
    assert_eq!(stored.status, RequestStatus::Expired);

    let job = fixture.job();
    assert_eq!(job.assigned_provider_id, Some(fixture.second.clone()));
    assert_eq!(job.request_count, 0);
    assert!(!job.has_active_requests);
    assert!(job.invariants_hold());
}

#[test]
fn request_raised_while_the_job_is_assigned_is_withdrawn() {
    let fixture = RaceFixture::new();
    *fixture
        .store
        .before_insert
        .lock()
        .expect("hook slot") = Some(fixture.rival_assignment());

    let outcome = fixture
        .service
        .create_request(&fixture.target, &fixture.first);

    assert!(
        matches!(outcome, Err(DispatchError::ConflictingWrite { .. })),
        "request on a closed job must be refused: {outcome:?}"
    );
    let requests = fixture
        .store
        .requests_for_job(&fixture.target)
        .expect("store readable");
    assert_eq!(requests.len(), 1);
    assert!(requests.iter().all(|request| !request.is_active()));

    let job = fixture.job();
    assert_eq!(job.assigned_provider_id, Some(fixture.second.clone()));
    assert_eq!(job.request_count, 0);
    assert!(job.invariants_hold());
}
