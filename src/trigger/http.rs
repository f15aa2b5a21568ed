//! HTTP transport for the cron trigger.
//!
//! | Route | Behavior |
//! |-------|----------|
//! | `GET /cron/{cadence}` | Runs the rotation; requires the cron header |
//! | anything else | `404` |
//!
//! Requests without the cron header set to `true`, and unknown cadences, get
//! the same `404` as unknown routes so the endpoint does not reveal itself.

use super::CronTrigger;
use crate::config::HttpSettings;
use crate::observability::{RunContext, enter_run_context};
use crate::provider::ProviderClient;
use crate::{Error, Result};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

struct AppState<P: ProviderClient> {
    trigger: Arc<CronTrigger<P>>,
    cron_header: HeaderName,
}

impl<P: ProviderClient> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            trigger: Arc::clone(&self.trigger),
            cron_header: self.cron_header.clone(),
        }
    }
}

/// Builds the trigger router.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `cron_header` is not a valid header name.
pub fn router<P: ProviderClient + 'static>(
    trigger: Arc<CronTrigger<P>>,
    cron_header: &str,
) -> Result<Router> {
    let cron_header = HeaderName::from_bytes(cron_header.as_bytes())
        .map_err(|e| Error::InvalidInput(format!("invalid cron header '{cron_header}': {e}")))?;
    let state = AppState {
        trigger,
        cron_header,
    };

    Ok(Router::new()
        .route("/cron/{cadence}", get(handle_cron::<P>))
        .fallback(not_found)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Serves the trigger on `settings.port` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the runtime cannot start, the port cannot be bound,
/// or the server fails.
pub fn serve<P: ProviderClient + 'static>(
    trigger: Arc<CronTrigger<P>>,
    settings: &HttpSettings,
) -> Result<()> {
    let app = router(trigger, &settings.cron_header)?;

    let rt = tokio::runtime::Runtime::new().map_err(|e| Error::OperationFailed {
        operation: "create_runtime".to_string(),
        cause: e.to_string(),
    })?;

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!(port = settings.port, "Listening for cron triggers");

    rt.block_on(async {
        let listener =
            tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| Error::OperationFailed {
                    operation: "bind".to_string(),
                    cause: format!("{addr}: {e}"),
                })?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "serve".to_string(),
                cause: e.to_string(),
            })
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down HTTP trigger");
}

async fn handle_cron<P: ProviderClient + 'static>(
    State(state): State<AppState<P>>,
    Path(cadence): Path<String>,
    headers: HeaderMap,
) -> Response {
    let authorized = headers
        .get(&state.cron_header)
        .is_some_and(|value| value == "true");
    if !authorized {
        tracing::warn!(cadence = %cadence, "Rejected cron request without cron header");
        return not_found().await;
    }
    if state.trigger.policy(&cadence).is_err() {
        tracing::warn!(cadence = %cadence, "Cron request for unknown cadence");
        return not_found().await;
    }

    let context = RunContext::new();
    let trigger = Arc::clone(&state.trigger);
    let run = tokio::task::spawn_blocking(move || {
        let _context = enter_run_context(context);
        trigger.fire(&cadence)
    })
    .await;

    match run {
        Ok(Ok(report)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            report.summary(),
        )
            .into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Rotation run failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        },
        Err(e) => {
            tracing::error!(error = %e, "Rotation task aborted");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}
