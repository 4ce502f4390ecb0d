use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::domain::{JobId, ProviderId, RequestId};
use super::error::DispatchError;
use super::repository::{DispatchNotifier, DispatchRepository, RepositoryError};
use super::requests::ReviewDecision;
use super::service::DispatchService;
use super::settings::SettingsUpdate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignJobBody {
    pub provider_id: ProviderId,
    pub actor: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnassignJobBody {
    pub actor: String,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteJobBody {
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequestBody {
    pub job_id: JobId,
    pub provider_id: ProviderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequestBody {
    pub actor: String,
    #[serde(flatten)]
    pub decision: ReviewDecision,
}

type SharedService<S, N> = State<Arc<DispatchService<S, N>>>;

/// Router exposing the admin, provider, and operations verbs under `/api/v1/dispatch`.
pub fn dispatch_router<S, N>(service: Arc<DispatchService<S, N>>) -> Router
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    Router::new()
        .route(
            "/api/v1/dispatch/jobs/:job_id/assignment",
            post(assign_handler::<S, N>).delete(unassign_handler::<S, N>),
        )
        .route(
            "/api/v1/dispatch/jobs/:job_id/completion",
            post(complete_handler::<S, N>),
        )
        .route(
            "/api/v1/dispatch/jobs/:job_id/eligible-providers",
            get(eligible_providers_handler::<S, N>),
        )
        .route(
            "/api/v1/dispatch/jobs/:job_id/requests",
            get(job_requests_handler::<S, N>),
        )
        .route("/api/v1/dispatch/requests", post(create_request_handler::<S, N>))
        .route(
            "/api/v1/dispatch/requests/:request_id/review",
            post(review_handler::<S, N>),
        )
        .route(
            "/api/v1/dispatch/providers/:provider_id/requests",
            get(provider_requests_handler::<S, N>),
        )
        .route(
            "/api/v1/dispatch/providers/:provider_id/eligible-jobs",
            get(eligible_jobs_handler::<S, N>),
        )
        .route(
            "/api/v1/dispatch/auto-approval/sweep",
            post(sweep_handler::<S, N>),
        )
        .route(
            "/api/v1/dispatch/auto-approval/settings",
            get(settings_handler::<S, N>).put(update_settings_handler::<S, N>),
        )
        .with_state(service)
}

pub(crate) async fn assign_handler<S, N>(
    State(service): SharedService<S, N>,
    Path(job_id): Path<String>,
    axum::Json(body): axum::Json<AssignJobBody>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, move |service| {
        service.assign_job(&JobId(job_id), &body.provider_id, &body.actor, body.notes)
    })
    .await
}

pub(crate) async fn unassign_handler<S, N>(
    State(service): SharedService<S, N>,
    Path(job_id): Path<String>,
    axum::Json(body): axum::Json<UnassignJobBody>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, move |service| {
        service.unassign_job(&JobId(job_id), &body.actor, body.confirm)
    })
    .await
}

pub(crate) async fn complete_handler<S, N>(
    State(service): SharedService<S, N>,
    Path(job_id): Path<String>,
    axum::Json(body): axum::Json<CompleteJobBody>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, move |service| {
        service.complete_job(&JobId(job_id), &body.actor)
    })
    .await
}

pub(crate) async fn eligible_providers_handler<S, N>(
    State(service): SharedService<S, N>,
    Path(job_id): Path<String>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, move |service| {
        let job_id = JobId(job_id);
        let ranked = service.eligible_providers(&job_id)?;
        if ranked.is_empty() {
            return Err(DispatchError::NoEligibleProvider { job_id });
        }
        Ok(ranked)
    })
    .await
}

pub(crate) async fn job_requests_handler<S, N>(
    State(service): SharedService<S, N>,
    Path(job_id): Path<String>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, move |service| {
        service.list_job_requests(&JobId(job_id))
    })
    .await
}

pub(crate) async fn create_request_handler<S, N>(
    State(service): SharedService<S, N>,
    axum::Json(body): axum::Json<CreateRequestBody>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::CREATED, move |service| {
        service.create_request(&body.job_id, &body.provider_id)
    })
    .await
}

pub(crate) async fn review_handler<S, N>(
    State(service): SharedService<S, N>,
    Path(request_id): Path<String>,
    axum::Json(body): axum::Json<ReviewRequestBody>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, move |service| {
        service.review_request(&RequestId(request_id), &body.actor, body.decision)
    })
    .await
}

pub(crate) async fn provider_requests_handler<S, N>(
    State(service): SharedService<S, N>,
    Path(provider_id): Path<String>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, move |service| {
        service.list_my_requests(&ProviderId(provider_id))
    })
    .await
}

pub(crate) async fn eligible_jobs_handler<S, N>(
    State(service): SharedService<S, N>,
    Path(provider_id): Path<String>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, move |service| {
        service.list_eligible_jobs(&ProviderId(provider_id))
    })
    .await
}

pub(crate) async fn sweep_handler<S, N>(State(service): SharedService<S, N>) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, |service| service.run_auto_approval_sweep()).await
}

pub(crate) async fn settings_handler<S, N>(State(service): SharedService<S, N>) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, |service| service.settings()).await
}

pub(crate) async fn update_settings_handler<S, N>(
    State(service): SharedService<S, N>,
    axum::Json(update): axum::Json<SettingsUpdate>,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
{
    blocking(service, StatusCode::OK, move |service| {
        service.update_settings(update)
    })
    .await
}

/// Service calls take std mutexes in the store and may walk every job, so they run on the
/// blocking pool rather than a runtime worker.
async fn blocking<S, N, T, F>(
    service: Arc<DispatchService<S, N>>,
    status: StatusCode,
    call: F,
) -> Response
where
    S: DispatchRepository + 'static,
    N: DispatchNotifier + 'static,
    T: Serialize + Send + 'static,
    F: FnOnce(&DispatchService<S, N>) -> Result<T, DispatchError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || call(&service)).await {
        Ok(result) => respond(status, result),
        Err(err) => {
            error!(error = %err, "dispatch call did not complete");
            let payload = json!({
                "error": "dispatch call did not complete",
                "code": "internal",
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, DispatchError>) -> Response {
    match result {
        Ok(value) => (status, axum::Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) fn status_for(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::NotFound { .. }
        | DispatchError::NoEligibleProvider { .. }
        | DispatchError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        DispatchError::InvalidTransition(_)
        | DispatchError::DuplicateActiveRequest { .. }
        | DispatchError::ConflictingWrite { .. }
        | DispatchError::ConfirmationRequired { .. }
        | DispatchError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        DispatchError::ProviderRequestLimitExceeded { .. }
        | DispatchError::ProviderNotApproved { .. }
        | DispatchError::InvalidSettings(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DispatchError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub(crate) fn error_response(error: DispatchError) -> Response {
    let status = status_for(&error);
    let mut payload = json!({
        "error": error.to_string(),
        "code": error.code(),
    });
    if let DispatchError::InvalidTransition(transition) = &error {
        payload["transition"] = json!(transition);
    }
    if let DispatchError::NoEligibleProvider { job_id } = &error {
        payload["job_id"] = json!(job_id);
        payload["providers"] = json!([]);
    }
    (status, axum::Json(payload)).into_response()
}
