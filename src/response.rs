use serde::Serialize;

use crate::rate_limiter::BackendState;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClientLogResponse {
    pub success: bool,
    pub logged: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub version: String,
}

impl HealthResponse {
    pub fn from_state(state: BackendState) -> Self {
        // Running without Redis is degraded, not unhealthy.
        let (status, backend) = match state {
            BackendState::SharedActive => ("healthy", "shared"),
            BackendState::SharedDegraded => ("degraded", "local"),
        };

        Self {
            status: status.to_string(),
            backend: backend.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse::from_state(BackendState::SharedDegraded);
        assert_eq!(response.status, "degraded");
        assert_eq!(response.backend, "local");

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("degraded"));
        assert!(json.contains("local"));
    }
}
