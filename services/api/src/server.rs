use crate::cli::ServeArgs;
use crate::infra::{build_service, seed_demo_roster, ApiService, AppState};
use crate::routes::with_dispatch_routes;
use crate::scheduler::SweepScheduler;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tradematch::config::{AppConfig, DispatchConfig};
use tradematch::error::AppError;
use tradematch::telemetry;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(interval) = args.sweep_interval_secs.take() {
        config.dispatch.sweep_interval_secs = interval;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let dispatch_service = serving_service(&config.dispatch, args.seed_demo)?;

    let scheduler = match config.dispatch.sweep_interval_secs {
        0 => {
            info!("auto-approval scheduler disabled");
            None
        }
        secs => {
            let scheduler =
                SweepScheduler::new(dispatch_service.clone(), Duration::from_secs(secs));
            let handle = scheduler.start();
            Some((scheduler, handle))
        }
    };

    let app = with_dispatch_routes(dispatch_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        pending_request_cap = config.dispatch.pending_request_cap,
        sweep_interval_secs = config.dispatch.sweep_interval_secs,
        "dispatch service ready"
    );

    let served = axum::serve(listener, app).await;

    if let Some((scheduler, handle)) = scheduler {
        scheduler.stop();
        let _ = handle.await;
    }
    served?;
    Ok(())
}

/// Service behind the `serve` command. Job intake and provider registration live outside
/// this process, so without `--seed-demo` the store starts empty.
pub(crate) fn serving_service(
    config: &DispatchConfig,
    seed_demo: bool,
) -> Result<Arc<ApiService>, AppError> {
    let (service, store) = build_service(config);
    if seed_demo {
        seed_demo_roster(&store, service.now())?;
        info!("demo roster loaded into the dispatch store");
    } else {
        warn!("dispatch store starts empty; pass --seed-demo to load the demo roster");
    }
    Ok(service)
}
