use chrono::{DateTime, Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;
use tradematch::config::DispatchConfig;
use tradematch::workflows::dispatch::{
    DispatchError, DispatchNotice, DispatchNotifier, DispatchService, InMemoryDispatchStore, Job,
    JobId, JobLocation, JobRepository, NotifyError, Provider, ProviderId, ProviderRepository,
    ProviderStatus,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Notifier that writes every notice to the log. Mail and chat adapters plug in here.
#[derive(Debug, Default, Clone)]
pub(crate) struct TracingNotifier;

impl DispatchNotifier for TracingNotifier {
    fn notify(&self, notice: DispatchNotice) -> Result<(), NotifyError> {
        info!(
            template = %notice.template,
            job_id = ?notice.job_id.as_ref().map(|id| id.0.as_str()),
            details = ?notice.details,
            "dispatch notice"
        );
        Ok(())
    }
}

pub(crate) type ApiService = DispatchService<InMemoryDispatchStore, TracingNotifier>;

pub(crate) fn build_service(
    config: &DispatchConfig,
) -> (Arc<ApiService>, Arc<InMemoryDispatchStore>) {
    let store = Arc::new(InMemoryDispatchStore::default());
    let service = DispatchService::new(store.clone(), Arc::new(TracingNotifier), config.engine());
    (Arc::new(service), store)
}

fn roster_provider(id: &str, name: &str, company: Option<&str>, areas: &[&str]) -> Provider {
    Provider {
        id: ProviderId(id.to_string()),
        name: name.to_string(),
        company: company.map(str::to_string),
        service_areas: areas.iter().map(|area| area.to_string()).collect(),
        status: ProviderStatus::Approved,
    }
}

/// (id, customer, work, address, postcode, hours waiting)
const DEMO_JOBS: [(&str, &str, &str, &str, &str, i64); 5] = [
    ("job-1001", "Mrs Hargreaves", "Boiler not firing", "14 Steep Hill, Lincoln", "LN1 3AA", 72),
    ("job-1002", "Mr Okafor", "Leaking flat roof", "8 Victoria St, Grimsby", "DN31 1HU", 50),
    ("job-1003", "Ms Turner", "Rewire garage", "2 Market Pl, Boston", "PE21 6NJ", 30),
    ("job-1004", "Mr Evans", "Replace kitchen tap", "5 Eastgate, Sleaford", "NG34 7DJ", 60),
    ("job-1005", "Mrs Li", "Outside light fitting", "Unit 3, Holme Rd", "ZZ1 1ZZ", 96),
];

/// Small Lincolnshire roster used by `sweep`, `demo` and `serve --seed-demo`.
pub(crate) fn seed_demo_roster(
    store: &InMemoryDispatchStore,
    now: DateTime<Utc>,
) -> Result<(), DispatchError> {
    let providers = [
        roster_provider(
            "prov-ashby",
            "Tom Ashby",
            Some("Ashby Plumbing & Heating"),
            &["Lincoln", "Sleaford"],
        ),
        roster_provider("prov-cole", "Priya Cole", None, &["Lincoln"]),
        roster_provider(
            "prov-humber",
            "Dan Marsh",
            Some("Humber Roofing"),
            &["Grimsby", "Cleethorpes"],
        ),
        roster_provider(
            "prov-fens",
            "Amy Reed",
            Some("Fenland Electrical"),
            &["Boston", "Spalding"],
        ),
    ];
    for provider in providers {
        store.insert_provider(provider)?;
    }
    let mut pending = roster_provider("prov-new", "Sam Hill", None, &["Other"]);
    pending.status = ProviderStatus::Pending;
    store.insert_provider(pending)?;

    for (id, customer, work, address, postcode, hours) in DEMO_JOBS {
        store.insert_job(Job::new(
            JobId(id.to_string()),
            customer,
            work,
            JobLocation {
                address: address.to_string(),
                postcode: Some(postcode.to_string()),
            },
            now - Duration::hours(hours),
        ))?;
    }
    Ok(())
}
