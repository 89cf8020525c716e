mod acl;
pub mod auth;
pub mod config;
mod dto;

use crate::engine::model::DefinitionInput;
use crate::engine::{Engine, WorkflowError};
use crate::server::auth::AuthCtx;
use crate::storage::Store;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{get, post, put},
};
use bcrypt::verify;
pub use config::{AppConfig, ConfigError, RelationshipConfig, UserConfig};
use kidpoints_shared::api;
use kidpoints_shared::auth::Role;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

const DEFAULT_HISTORY_PER_PAGE: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub engine: Engine<Store>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        let engine = Engine::new(store.clone(), config.invitation_policy());
        Self {
            config,
            store,
            engine,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Children read their own data, admins read anyone's, parents read the
    /// children they are related to.
    async fn authorize_child_read(&self, auth: &AuthCtx, child_id: i32) -> Result<(), AppError> {
        let allowed = match auth.role {
            Role::Admin => true,
            Role::Child => auth.user_id == child_id,
            Role::Parent => {
                self.engine
                    .relationships
                    .is_parent_of(auth.user_id, child_id)
                    .await?
            }
        };
        if allowed {
            Ok(())
        } else {
            tracing::warn!(user_id = auth.user_id, child_id, "read of unrelated child denied");
            Err(AppError::forbidden())
        }
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/tasks", post(api_create_task))
        .route("/tasks/{id}", put(api_update_task).delete(api_delete_task))
        .route("/tasks/{id}/assign", post(api_assign_task))
        .route("/user-tasks/{id}/submit", post(api_submit_task))
        .route("/user-tasks/{id}/verify", post(api_verify_task))
        .route("/rewards", post(api_create_reward))
        .route(
            "/rewards/{id}",
            put(api_update_reward).delete(api_delete_reward),
        )
        .route("/rewards/{id}/claim", post(api_claim_reward))
        .route("/claims/{id}/review", post(api_review_claim))
        .route("/children/{id}/balance", get(api_child_balance))
        .route("/children/{id}/transactions", get(api_child_transactions))
        .route("/children/{id}/points", post(api_adjust_points))
        .route("/children/{id}/tasks", get(api_child_tasks))
        .route("/children/{id}/claims", get(api_child_claims))
        .route("/children/{id}/invitations", post(api_issue_invitation))
        .route("/invitations/redeem", post(api_redeem_invitation))
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let api_v1 = Router::new()
        .route("/auth/login", post(api_auth_login))
        .merge(private);

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            user_id = tracing::field::Empty,
            username = tracing::field::Empty,
            role = tracing::field::Empty,
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .nest(api::API_V1_PREFIX, api_v1)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    // Balances and histories must never come from a cache
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
    );
    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("user_id", auth.user_id);
        span.record("username", auth.username.as_str());
        span.record("role", tracing::field::display(&auth.role));
    }
    Ok(next.run(req).await)
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let creds = state
        .store
        .find_credentials(&body.username)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| {
            tracing::warn!(username=%body.username, "login: unknown username");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &creds.password_hash).map_err(|e| {
        tracing::error!(username=%body.username, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(username=%body.username, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let token = auth::issue_jwt_for_user(&state, &creds.user)?;
    tracing::info!(user_id = creds.user.id, role = %creds.user.role, "login: token issued");
    Ok(Json(api::AuthResp {
        token,
        user_id: creds.user.id,
        role: creds.user.role,
    }))
}

// Task definitions and assignments

async fn api_create_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::TaskDefinitionReq>,
) -> Result<(StatusCode, Json<api::TaskDefinitionDto>), AppError> {
    let input = DefinitionInput::new(body.name, body.description, body.point_value);
    let task = state
        .engine
        .tasks
        .create_definition(auth.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(task.into())))
}

async fn api_update_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    Json(body): Json<api::TaskDefinitionReq>,
) -> Result<Json<api::TaskDefinitionDto>, AppError> {
    let input = DefinitionInput::new(body.name, body.description, body.point_value);
    let task = state
        .engine
        .tasks
        .update_definition(auth.user_id, id, input)
        .await?;
    Ok(Json(task.into()))
}

async fn api_delete_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.engine.tasks.delete_definition(auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_assign_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(task_id): Path<i32>,
    Json(body): Json<api::AssignReq>,
) -> Result<(StatusCode, Json<api::UserTaskDto>), AppError> {
    let user_task = state
        .engine
        .tasks
        .assign(body.child_id, task_id, auth.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(user_task.into())))
}

async fn api_submit_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<api::UserTaskDto>, AppError> {
    let user_task = state.engine.tasks.submit(id, auth.user_id).await?;
    Ok(Json(user_task.into()))
}

async fn api_verify_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    Json(body): Json<api::DecisionReq>,
) -> Result<Json<api::UserTaskDto>, AppError> {
    let verification = state
        .engine
        .tasks
        .verify(id, auth.user_id, body.decision)
        .await?;
    Ok(Json(verification.user_task.into()))
}

// Reward definitions and claims

async fn api_create_reward(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::RewardDefinitionReq>,
) -> Result<(StatusCode, Json<api::RewardDefinitionDto>), AppError> {
    let input = DefinitionInput::new(body.name, body.description, body.point_cost);
    let reward = state
        .engine
        .rewards
        .create_definition(auth.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(reward.into())))
}

async fn api_update_reward(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    Json(body): Json<api::RewardDefinitionReq>,
) -> Result<Json<api::RewardDefinitionDto>, AppError> {
    let input = DefinitionInput::new(body.name, body.description, body.point_cost);
    let reward = state
        .engine
        .rewards
        .update_definition(auth.user_id, id, input)
        .await?;
    Ok(Json(reward.into()))
}

async fn api_delete_reward(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .rewards
        .delete_definition(auth.user_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_claim_reward(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(reward_id): Path<i32>,
) -> Result<(StatusCode, Json<api::ClaimDto>), AppError> {
    let claim = state.engine.rewards.claim(auth.user_id, reward_id).await?;
    Ok((StatusCode::CREATED, Json(claim.into())))
}

async fn api_review_claim(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    Json(body): Json<api::DecisionReq>,
) -> Result<Json<api::ClaimDto>, AppError> {
    let review = state
        .engine
        .rewards
        .review(id, auth.user_id, body.decision)
        .await?;
    Ok(Json(review.claim.into()))
}

// Points

async fn api_child_balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(child_id): Path<i32>,
) -> Result<Json<api::BalanceDto>, AppError> {
    state.authorize_child_read(&auth, child_id).await?;
    let balance = state.engine.ledger.balance(child_id).await?;
    Ok(Json(api::BalanceDto { child_id, balance }))
}

#[derive(Deserialize)]
struct PageOpts {
    page: Option<usize>,
    per_page: Option<usize>,
}

async fn api_child_transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(child_id): Path<i32>,
    Query(opts): Query<PageOpts>,
) -> Result<Json<Vec<api::LedgerEntryDto>>, AppError> {
    state.authorize_child_read(&auth, child_id).await?;
    let page = opts.page.unwrap_or(1);
    let per_page = opts.per_page.unwrap_or(DEFAULT_HISTORY_PER_PAGE);
    let rows = state
        .engine
        .ledger
        .history(child_id, page, per_page)
        .await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

async fn api_adjust_points(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(child_id): Path<i32>,
    Json(body): Json<api::AdjustPointsReq>,
) -> Result<Json<api::BalanceDto>, AppError> {
    let adjustment = state
        .engine
        .ledger
        .adjust(auth.user_id, child_id, body.delta, body.notes)
        .await?;
    Ok(Json(api::BalanceDto {
        child_id,
        balance: adjustment.balance,
    }))
}

async fn api_child_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(child_id): Path<i32>,
) -> Result<Json<Vec<api::UserTaskDto>>, AppError> {
    state.authorize_child_read(&auth, child_id).await?;
    let rows = state.engine.tasks.list_for_child(child_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

async fn api_child_claims(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(child_id): Path<i32>,
) -> Result<Json<Vec<api::ClaimDto>>, AppError> {
    state.authorize_child_read(&auth, child_id).await?;
    let rows = state.engine.rewards.list_for_child(child_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

// Invitations

async fn api_issue_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(child_id): Path<i32>,
) -> Result<(StatusCode, Json<api::InvitationDto>), AppError> {
    let invitation = state
        .engine
        .invitations
        .issue(auth.user_id, child_id)
        .await?;
    Ok((StatusCode::CREATED, Json(invitation.into())))
}

async fn api_redeem_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::RedeemReq>,
) -> Result<Json<api::RelationshipDto>, AppError> {
    let relationship = state
        .engine
        .invitations
        .redeem(auth.user_id, &body.code)
        .await?;
    Ok(Json(relationship.into()))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    Forbidden,
    Workflow(WorkflowError),
    Internal(String),
}

impl AppError {
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::Internal(m) => AppError::Internal(m),
            other => AppError::Workflow(other),
        }
    }
}

fn workflow_status(e: &WorkflowError) -> StatusCode {
    match e {
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::Forbidden(_) | WorkflowError::NotParentRole => StatusCode::FORBIDDEN,
        WorkflowError::InvalidState { .. }
        | WorkflowError::Conflict(_)
        | WorkflowError::AlreadyRelated => StatusCode::CONFLICT,
        WorkflowError::InsufficientPoints { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::InvalidCode | WorkflowError::Invalid(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> AxumResponse {
        let (status, msg, kind) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".to_string(),
                "unauthorized",
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden"),
            AppError::Workflow(e) => (workflow_status(&e), e.to_string(), e.kind()),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(detail) => {
                tracing::error!(detail = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".into(),
                    "internal",
                )
            }
        };
        if status.is_client_error() {
            tracing::warn!(status = %status, kind, message = %msg, "request rejected");
        }
        (status, Json(ErrorBody { error: msg, kind })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_errors_map_to_distinct_statuses() {
        let cases = [
            (WorkflowError::NotFound("task"), StatusCode::NOT_FOUND),
            (WorkflowError::Forbidden("x"), StatusCode::FORBIDDEN),
            (WorkflowError::NotParentRole, StatusCode::FORBIDDEN),
            (
                WorkflowError::InvalidState {
                    entity: "claim",
                    current: "approved".into(),
                    expected: "pending",
                },
                StatusCode::CONFLICT,
            ),
            (WorkflowError::Conflict("dup".into()), StatusCode::CONFLICT),
            (WorkflowError::AlreadyRelated, StatusCode::CONFLICT),
            (
                WorkflowError::InsufficientPoints {
                    balance: 10,
                    required: 50,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (WorkflowError::InvalidCode, StatusCode::BAD_REQUEST),
            (WorkflowError::invalid("empty"), StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(workflow_status(&err), expected, "{err:?}");
        }
    }

    #[test]
    fn internal_details_are_not_returned() {
        let resp = AppError::from(WorkflowError::internal("disk on fire")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
