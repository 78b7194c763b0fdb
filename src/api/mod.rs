//! REST API: shared state, error mapping, authentication middleware and the
//! route table.

mod auth;
mod reports;
mod tasks;
mod time_entries;
mod timer;
mod users;
mod whatsapp;

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{FromRequest, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::de::DeserializeOwned;
use tracing::error;

use crate::auth::{AuthUser, Credentials, JwtManager};
use crate::errors::Error;
use crate::store::StoreHandle;
use crate::timer::Clock;
use crate::whatsapp::MessageSender;

// ── Shared application state ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// When false, requests without credentials are served anonymously.
    pub required: bool,
    pub reset_token_ttl_secs: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            required: true,
            reset_token_ttl_secs: 3600,
        }
    }
}

pub struct AppState {
    pub store: StoreHandle,
    pub clock: Arc<dyn Clock>,
    pub jwt: JwtManager,
    pub sender: Arc<dyn MessageSender>,
    pub auth: AuthSettings,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Validation { field: String, message: String },
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({"error": msg})),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg}))
            }
            ApiError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": format!("Invalid {}: {}", field, message), "field": field}),
            ),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, serde_json::json!({"error": msg}))
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, serde_json::json!({"error": msg})),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": msg}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { .. } => ApiError::NotFound(err.to_string()),
            Error::Conflict(msg) => ApiError::BadRequest(msg),
            Error::Validation { field, message } => ApiError::Validation { field, message },
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::Forbidden(msg) => ApiError::Forbidden(msg),
            other => {
                error!(error = %other, "Internal error");
                ApiError::Internal("Internal server error".into())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// `Json` body extractor whose rejections use the API error shape.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(body_rejection(&rejection)),
        }
    }
}

fn body_rejection(rejection: &JsonRejection) -> ApiError {
    let detail = rejection.body_text();
    let field = match rejection {
        JsonRejection::JsonDataError(_) => rejected_field(&detail),
        _ => None,
    };
    ApiError::Validation {
        field: field.unwrap_or_else(|| "body".to_string()),
        message: detail,
    }
}

/// Field named by a serde data error: "missing field `x`" or a `path: ...`
/// prefix after the target-type preamble.
fn rejected_field(detail: &str) -> Option<String> {
    if let Some((_, rest)) = detail.split_once("missing field `") {
        return rest.split('`').next().map(str::to_string);
    }
    let (_, tail) = detail.split_once("target type: ")?;
    let (path, _) = tail.split_once(": ")?;
    (!path.is_empty() && !path.contains(char::is_whitespace) && path != ".")
        .then(|| path.to_string())
}

// ── Authentication ────────────────────────────────────────────────────

/// Resolve request credentials to a user, if any were presented.
async fn resolve_user(
    state: &AppState,
    headers: &axum::http::HeaderMap,
) -> ApiResult<Option<AuthUser>> {
    let Some(credentials) = Credentials::from_headers(headers) else {
        return Ok(None);
    };
    let claims = match &credentials {
        Credentials::Bearer(token) => Some(
            state
                .jwt
                .validate(token)
                .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?,
        ),
        _ => None,
    };
    let user = state
        .store
        .call(move |s| crate::auth::authenticate(s, &credentials, claims.as_ref()))
        .await?;
    Ok(Some(AuthUser::from(&user)))
}

async fn require_auth(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let user = resolve_user(&state, req.headers()).await?;
    match user {
        Some(user) => {
            req.extensions_mut().insert(user);
        }
        None if state.auth.required => {
            return Err(ApiError::Unauthorized("Authentication required".into()));
        }
        None => {}
    }
    Ok(next.run(req).await)
}

/// The caller, for routes that always need one.
pub(crate) fn caller(user: Option<Extension<AuthUser>>) -> ApiResult<AuthUser> {
    user.map(|Extension(u)| u)
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".into()))
}

pub(crate) fn admin(user: Option<Extension<AuthUser>>) -> ApiResult<AuthUser> {
    let user = caller(user)?;
    if !user.is_admin() {
        return Err(ApiError::Forbidden("Admin access required".into()));
    }
    Ok(user)
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Accept RFC 3339 instants or plain `YYYY-MM-DD` dates (UTC midnight).
pub(crate) fn parse_instant(field: &str, value: &str) -> ApiResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| ApiError::Validation {
            field: field.to_string(),
            message: format!("'{}' is not a date or RFC 3339 timestamp", value),
        })
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router(state: SharedState) -> Router {
    let public = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/status", get(auth::status))
        .route("/api/auth/setup", post(auth::setup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route(
            "/api/whatsapp/webhook/{instance}",
            post(whatsapp::webhook),
        );

    let protected = Router::new()
        // Tasks
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/api/tasks/{id}",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/api/tasks/{id}/complete", post(tasks::complete_task))
        .route("/api/tasks/{id}/reopen", post(tasks::reopen_task))
        .route(
            "/api/tasks/{id}/items",
            get(tasks::list_items).post(tasks::create_item),
        )
        .route(
            "/api/tasks/{id}/items/complete-all",
            post(tasks::complete_all_items),
        )
        .route(
            "/api/task-items/{id}",
            put(tasks::update_item).delete(tasks::delete_item),
        )
        // Time entries
        .route(
            "/api/time-entries",
            get(time_entries::list_entries).post(time_entries::create_entry),
        )
        .route("/api/time-entries/running", get(time_entries::running_entries))
        .route(
            "/api/time-entries/bulk-delete",
            post(time_entries::bulk_delete),
        )
        .route(
            "/api/time-entries/{id}",
            put(time_entries::update_entry).delete(time_entries::delete_entry),
        )
        // Timer
        .route("/api/start-timer", post(timer::start_timer))
        .route("/api/stop-timer", post(timer::stop_timer))
        .route("/api/pause-timer", post(timer::pause_timer))
        .route("/api/resume-timer", post(timer::resume_timer))
        .route("/api/finish-timer", post(timer::finish_timer))
        .route("/api/finish-and-complete", post(timer::finish_and_complete))
        // Analytics
        .route("/api/dashboard/stats", get(reports::dashboard_stats))
        .route("/api/reports/time-by-task", get(reports::time_by_task))
        .route("/api/reports/daily", get(reports::daily_totals))
        // Account
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/change-password", post(auth::change_password))
        .route("/api/auth/api-key", post(auth::regenerate_api_key))
        // Users
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/users/{id}",
            put(users::update_user).delete(users::delete_user),
        )
        // WhatsApp
        .route(
            "/api/whatsapp/config",
            get(whatsapp::get_config).put(whatsapp::put_config),
        )
        .route("/api/whatsapp/logs", get(whatsapp::list_logs))
        .route("/api/whatsapp/test-message", post(whatsapp::test_message))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public.merge(protected).with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
