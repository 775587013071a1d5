// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP gateway — routing, port-contention fallback, graceful shutdown.
//!
//! # Port fallback
//!
//! ```text
//! TRYING(8843) → BOUND
//!             → PORT_BUSY → TRYING(8844) → … up to port + port_scan
//!                                        → EXHAUSTED (fatal, exit non-zero)
//! ```
//!
//! Another agent instance (or any other service) holding the default port
//! is routine on operator machines, so the agent scans upward instead of
//! failing; the bound port is logged and shown in the browser URL.
//!
//! # Cross-origin headers
//!
//! The console is a web page on a different origin than this service, so
//! every response — including 4xx/5xx — carries CORS headers reflecting the
//! request's `Origin` plus explicit no-cache directives. Both are applied
//! as tower layers so no handler can forget them.
//!
//! # Isolation
//!
//! hyper serves each connection on its own tokio task; a peer reset or
//! broken pipe mid-response is confined to that connection. Handler panics
//! are converted to a 500 JSON response by `CatchPanicLayer`.

pub mod handlers;
pub mod page;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    set_header::SetResponseHeaderLayer,
};
use tracing::{info, warn};

use crate::{
    command::CommandExecutor, config::HttpConfig, crypto::device_key::DeviceIdentity,
    error::AgentError,
};

/// Read-only state shared by every request handler.
///
/// The token is captured once at startup and never mutated afterwards, so
/// sharing is a plain `Arc` — no lock.
#[derive(Clone)]
pub struct AppState(Arc<Inner>);

struct Inner {
    token: String,
    executor: CommandExecutor,
    identity: DeviceIdentity,
}

impl AppState {
    pub fn new(token: String, identity: DeviceIdentity, executor: CommandExecutor) -> Self {
        AppState(Arc::new(Inner {
            token,
            executor,
            identity,
        }))
    }

    pub fn token(&self) -> &str {
        &self.0.token
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.0.executor
    }

    pub fn hostname(&self) -> &str {
        &self.0.identity.hostname
    }
}

/// Build the agent's router with all middleware layers applied.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    // Per-route fallbacks so a wrong method on a known path gets the same
    // structured 404 as an unknown path, not a bare 405.
    Router::new()
        .route("/", get(handlers::index).fallback(handlers::fallback))
        .route("/ping", get(handlers::ping).fallback(handlers::fallback))
        .route(
            "/api/command",
            post(handlers::api_command).fallback(handlers::fallback),
        )
        .fallback(handlers::fallback)
        .with_state(state)
        .layer(CatchPanicLayer::custom(handlers::panic_response))
        .layer(cors_layer())
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

/// Reflect the request origin; the console runs on a different origin and
/// sends credentialed requests, so a wildcard is not an option.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::CONTENT_LENGTH,
            HeaderName::from_static("x-requested-with"),
            header::CACHE_CONTROL,
            header::PRAGMA,
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86_400))
}

/// Bind the configured port, scanning upward on contention.
///
/// Returns the bound listener so the caller can log the real port before
/// serving. Exhausting the scan range is fatal.
pub async fn bind_with_fallback(config: &HttpConfig) -> Result<TcpListener, AgentError> {
    let start = config.port;
    let end = start.saturating_add(config.port_scan);

    for port in start..=end {
        match TcpListener::bind((config.host.as_str(), port)).await {
            Ok(listener) => {
                if port != start {
                    info!(port, "default port busy, bound fallback port");
                }
                return Ok(listener);
            }
            Err(e) => {
                warn!(port, "port unavailable: {e}");
            }
        }
    }

    Err(AgentError::PortsExhausted { start, end })
}

/// Serve until a shutdown signal arrives; in-flight requests finish.
pub async fn serve(listener: TcpListener, app: Router) -> Result<(), AgentError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("could not install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("could not install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}

// ── Unit tests ────────────────────────────────────────────────────────────────
