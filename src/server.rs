use std::time::Duration;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers::{
    client_log, forgot_password, health, ready, resend_verification, AppState,
};
use crate::middleware::logging_middleware;
use crate::rate_limiter::RateLimiter;

/// Build the application router around a limiter.
pub fn create_app(limiter: RateLimiter) -> Router {
    Router::new()
        .route("/api/auth/forgot-password", post(forgot_password))
        .route("/api/auth/resend-verification", post(resend_verification))
        .route("/api/log", post(client_log))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(AppState { limiter })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    config: Config,
}

impl Server {
    /// Wire up the limiter, its background tasks, and the router.
    pub async fn new(config: Config) -> Self {
        let limiter = RateLimiter::new(&config);
        limiter.connect().await;
        limiter.spawn_sweeper(Duration::from_secs(config.cleanup_interval_secs));
        limiter.spawn_reconnect_probe();

        let app = create_app(limiter);

        Self { app, config }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!("Floodgate server listening on {}", self.config.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        // Run server with graceful shutdown
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
