use crate::infra::{seed_demo_roster, TracingNotifier};
use chrono::{Duration, Utc};
use clap::Args;
use std::sync::Arc;
use tradematch::config::AppConfig;
use tradematch::error::AppError;
use tradematch::workflows::dispatch::{
    DispatchService, InMemoryDispatchStore, JobId, ManualClock, ProviderId, ReviewDecision,
    SettingsUpdate, SweepReport,
};

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Minimum job age in hours before the sweep picks it up
    #[arg(long)]
    pub(crate) age_threshold_hours: Option<u32>,
    /// Maximum open jobs a provider may hold
    #[arg(long)]
    pub(crate) max_open_jobs: Option<u32>,
    /// Match providers regardless of postcode
    #[arg(long)]
    pub(crate) ignore_service_area: bool,
    /// Print the report as JSON instead of a summary
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Hours to fast-forward before the closing sweep
    #[arg(long, default_value_t = 0)]
    pub(crate) advance_hours: i64,
}

type DemoService = DispatchService<InMemoryDispatchStore, TracingNotifier>;

fn demo_service() -> Result<(DemoService, Arc<ManualClock>), AppError> {
    let config = AppConfig::load()?;
    let store = Arc::new(InMemoryDispatchStore::default());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    seed_demo_roster(&store, Utc::now())?;
    let service = DispatchService::new(store, Arc::new(TracingNotifier), config.dispatch.engine())
        .with_clock(clock.clone());
    Ok((service, clock))
}

pub(crate) fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let (service, _clock) = demo_service()?;
    service.update_settings(SettingsUpdate {
        enabled: Some(true),
        age_threshold_hours: args.age_threshold_hours,
        max_open_jobs_limit: args.max_open_jobs,
        consider_service_area: args.ignore_service_area.then_some(false),
        ..SettingsUpdate::default()
    })?;

    let report = service.run_auto_approval_sweep()?;
    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("failed to render report: {err}"),
        }
    } else {
        render_sweep_report(&report);
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let (service, clock) = demo_service()?;
    let boiler = JobId("job-1001".to_string());
    let roof = JobId("job-1002".to_string());
    let cole = ProviderId("prov-cole".to_string());
    let ashby = ProviderId("prov-ashby".to_string());
    let humber = ProviderId("prov-humber".to_string());

    println!("Dispatch walkthrough");

    println!("\n1. Providers raise requests for {boiler}");
    let cole_request = service.create_request(&boiler, &cole)?;
    let ashby_request = service.create_request(&boiler, &ashby)?;
    for request in [&cole_request, &ashby_request] {
        println!("- {} ({}) -> {}", request.id, request.provider_name, request.status.label());
    }

    println!("\n2. Eligible providers for {boiler}");
    for candidate in service.eligible_providers(&boiler)? {
        println!(
            "- {} | workload {} | area match {}",
            candidate.provider.display_name(),
            candidate.active_workload,
            candidate.area_match
        );
    }

    println!("\n3. Operator reviews Priya Cole's request");
    let approved =
        service.review_request(&cole_request.id, "ops@tradematch", ReviewDecision::Approve)?;
    println!("- {} -> {}", approved.id, approved.status.label());

    println!("\n4. Operator assigns {boiler}");
    let assigned = service.assign_job(
        &boiler,
        &cole,
        "ops@tradematch",
        Some("Customer home after 2pm".to_string()),
    )?;
    println!(
        "- assigned to {} | active requests {}",
        assigned.assigned_provider_name.as_deref().unwrap_or("-"),
        assigned.request_count
    );
    for request in service.list_job_requests(&boiler)? {
        println!("  - {} ({}) -> {}", request.id, request.provider_name, request.status.label());
    }

    println!("\n5. Work finished");
    let completed = service.complete_job(&boiler, "ops@tradematch")?;
    println!("- {} is {}", completed.id, completed.state().label());

    println!("\n6. Humber Roofing asks for {roof}, then the sweep runs");
    service.create_request(&roof, &humber)?;
    service.update_settings(SettingsUpdate {
        enabled: Some(true),
        ..SettingsUpdate::default()
    })?;
    if args.advance_hours > 0 {
        clock.advance(Duration::hours(args.advance_hours));
        println!("- clock advanced {} hours", args.advance_hours);
    }
    let report = service.run_auto_approval_sweep()?;
    render_sweep_report(&report);

    let settings = service.settings()?;
    println!(
        "\nAuto-approval stats: {} total | {} in 30 days | {} in 7 days",
        settings.stats.total, settings.stats.last_30_days, settings.stats.last_7_days
    );
    Ok(())
}

fn render_sweep_report(report: &SweepReport) {
    println!(
        "Sweep {} ({:?}) examined {} job(s)",
        report.run_id, report.outcome, report.examined
    );
    for assignment in &report.assigned {
        let request = assignment
            .auto_approved_request
            .as_ref()
            .map(|id| format!(" | auto-approved {id}"))
            .unwrap_or_default();
        println!(
            "- {} -> {} (workload {}){}",
            assignment.job_id, assignment.provider_name, assignment.active_workload, request
        );
    }
    for skip in &report.skipped {
        println!("- {} skipped: {}", skip.job_id, skip.reason);
    }
    for failure in &report.failures {
        println!("- {} failed: {}", failure.job_id, failure.error);
    }
}
