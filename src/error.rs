use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::rate_limiter::{epoch_ms, RateLimitResult};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    RateLimited {
        message: String,
        limit: u64,
        remaining: u64,
        reset_at: u64,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Build the 429 condition for a denied decision, with a human retry
    /// estimate in minutes (rounded up).
    pub fn rate_limited(result: &RateLimitResult) -> Self {
        let minutes = result
            .reset_at
            .saturating_mul(1000)
            .saturating_sub(epoch_ms())
            .div_ceil(60_000);

        AppError::RateLimited {
            message: format!(
                "Rate limit exceeded. Please try again in {} minute{}.",
                minutes,
                if minutes == 1 { "" } else { "s" }
            ),
            limit: result.limit,
            remaining: result.remaining,
            reset_at: result.reset_at,
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Redis(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }
}

#[derive(Debug, Serialize)]
struct RateLimitErrorResponse {
    error: String,
    message: String,
    code: u16,
    limit: u64,
    remaining: u64,
    reset_at: u64,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::RateLimited {
                message,
                limit,
                remaining,
                reset_at,
            } => {
                let retry_after = reset_at.saturating_sub(epoch_ms() / 1000);
                let body = RateLimitErrorResponse {
                    error: "rate_limit_exceeded".to_string(),
                    message,
                    code: 429,
                    limit,
                    remaining,
                    reset_at,
                };

                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                let headers = response.headers_mut();
                headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
                headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
                headers.insert("retry-after", HeaderValue::from(retry_after));
                response
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("bad_request", &msg, 400)),
            )
                .into_response(),
            AppError::Redis(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("service_unavailable", &msg, 503)),
            )
                .into_response(),
            AppError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("configuration_error", &msg, 500)),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_singular_minute() {
        let result = RateLimitResult {
            allowed: false,
            remaining: 0,
            reset_at: epoch_ms() / 1000 + 60,
            limit: 3,
        };

        let err = AppError::rate_limited(&result);
        match &err {
            AppError::RateLimited {
                message,
                limit,
                remaining,
                ..
            } => {
                assert!(message.contains("1 minute."), "got: {message}");
                assert!(!message.contains("minutes"), "got: {message}");
                assert_eq!(*limit, 3);
                assert_eq!(*remaining, 0);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_rate_limited_plural_minutes() {
        let result = RateLimitResult {
            allowed: false,
            remaining: 0,
            reset_at: epoch_ms() / 1000 + 600,
            limit: 100,
        };

        let err = AppError::rate_limited(&result);
        match &err {
            AppError::RateLimited { message, .. } => {
                assert!(message.contains("10 minutes."), "got: {message}");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_rate_limited_response_status_and_headers() {
        let result = RateLimitResult {
            allowed: false,
            remaining: 0,
            reset_at: epoch_ms() / 1000 + 60,
            limit: 3,
        };

        let response = AppError::rate_limited(&result).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert!(response.headers().contains_key("retry-after"));
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = AppError::Validation("Email is required".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
