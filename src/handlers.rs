use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::middleware::client_ip;
use crate::rate_limiter::{BackendState, RateLimitPolicy, RateLimiter};
use crate::response::{ClientLogResponse, HealthResponse, MessageResponse};

/// Email-driven endpoints allow a few attempts per hour per address.
const EMAIL_MAX_REQUESTS: u64 = 3;
const EMAIL_WINDOW_SECONDS: u64 = 3600;

/// Client log ingestion allows a burst of entries per minute per address.
const CLIENT_LOG_MAX_REQUESTS: u64 = 100;
const CLIENT_LOG_WINDOW_SECONDS: u64 = 60;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub limiter: RateLimiter,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
    pub redirect_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClientLogRequest {
    pub level: Option<String>,
    pub context: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Request a password reset email.
///
/// Throttled per address; always reports success on the allowed path so the
/// endpoint cannot be used to probe which accounts exist.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = body.email.as_deref().unwrap_or_default().trim().to_string();
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }

    let redirect_to = body.redirect_to.as_deref().unwrap_or_default().trim().to_string();
    if redirect_to.is_empty() {
        return Err(AppError::Validation("Redirect URL is required".to_string()));
    }

    let policy = RateLimitPolicy::new(
        EMAIL_MAX_REQUESTS,
        EMAIL_WINDOW_SECONDS,
        format!("forgot-password:{}", email.to_lowercase()),
    );
    let result = state.limiter.check(&policy).await;
    if !result.allowed {
        return Err(AppError::rate_limited(&result));
    }

    // Delivery is delegated to the upstream mail service.
    info!(
        target: "floodgate::email",
        email = %email,
        redirect_to = %redirect_to,
        "Password reset email dispatched"
    );

    Ok(Json(MessageResponse::ok("Password reset email sent")))
}

/// Resend the account verification email, throttled per address.
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(body): Json<ResendVerificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = body.email.as_deref().unwrap_or_default().trim().to_string();
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }

    let policy = RateLimitPolicy::new(
        EMAIL_MAX_REQUESTS,
        EMAIL_WINDOW_SECONDS,
        format!("resend-verification:{}", email.to_lowercase()),
    );
    let result = state.limiter.check(&policy).await;
    if !result.allowed {
        return Err(AppError::rate_limited(&result));
    }

    info!(
        target: "floodgate::email",
        email = %email,
        "Verification email dispatched"
    );

    Ok(Json(MessageResponse::ok("Verification email sent")))
}

/// Ingest a log entry from the client side, throttled per client address.
pub async fn client_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ClientLogRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);

    let policy = RateLimitPolicy::new(
        CLIENT_LOG_MAX_REQUESTS,
        CLIENT_LOG_WINDOW_SECONDS,
        format!("client-log:{ip}"),
    );
    let result = state.limiter.check(&policy).await;
    if !result.allowed {
        warn!(target: "floodgate::client", client_ip = %ip, "Client log rate limit exceeded");
        return Err(AppError::rate_limited(&result));
    }

    let level = body.level.as_deref().unwrap_or_default();
    let context = body.context.as_deref().unwrap_or_default();
    let message = body.message.as_deref().unwrap_or_default();
    if level.is_empty() || context.is_empty() || message.is_empty() {
        return Err(AppError::Validation(
            "Missing required fields: level, context, message".to_string(),
        ));
    }

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    match level {
        "error" => error!(
            target: "floodgate::client",
            context = %context,
            client_ip = %ip,
            user_agent = %user_agent,
            data = ?body.data,
            user_id = ?body.user_id,
            session_id = ?body.session_id,
            "{message}"
        ),
        "warn" => warn!(
            target: "floodgate::client",
            context = %context,
            client_ip = %ip,
            user_agent = %user_agent,
            data = ?body.data,
            user_id = ?body.user_id,
            session_id = ?body.session_id,
            "{message}"
        ),
        "info" => info!(
            target: "floodgate::client",
            context = %context,
            client_ip = %ip,
            user_agent = %user_agent,
            data = ?body.data,
            user_id = ?body.user_id,
            session_id = ?body.session_id,
            "{message}"
        ),
        "debug" => debug!(
            target: "floodgate::client",
            context = %context,
            client_ip = %ip,
            user_agent = %user_agent,
            data = ?body.data,
            user_id = ?body.user_id,
            session_id = ?body.session_id,
            "{message}"
        ),
        _ => {
            return Err(AppError::Validation(
                "Invalid level. Must be one of: error, warn, info, debug".to_string(),
            ))
        }
    }

    Ok(Json(ClientLogResponse {
        success: true,
        logged: true,
    }))
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse::from_state(state.limiter.state()))
}

/// Readiness check endpoint
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.limiter.state() {
        BackendState::SharedActive => Json(serde_json::json!({
            "status": "ready",
            "redis": "connected"
        })),
        BackendState::SharedDegraded => Json(serde_json::json!({
            "status": "ready",
            "redis": "disconnected",
            "note": "Running in local-only mode"
        })),
    }
}
