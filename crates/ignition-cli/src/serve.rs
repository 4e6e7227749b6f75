//! `/healthz` endpoint adapter: an `axum` `Router`/`IntoResponse` handler
//! over the coordinator's current result.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use ignition_core::Coordinator;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::report;

#[derive(Serialize)]
struct HealthzResponse {
    overall_status: String,
    degraded: bool,
    signals: Vec<HealthzSignal>,
}

#[derive(Serialize)]
struct HealthzSignal {
    name: String,
    status: String,
}

pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(coordinator)
}

async fn healthz(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    let result = coordinator.get_result();
    let status = StatusCode::from_u16(report::http_status(&result)).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    let body = HealthzResponse {
        overall_status: format!("{:?}", result.overall_status).to_lowercase(),
        degraded: report::is_degraded(&result),
        signals: result
            .per_signal_results
            .iter()
            .map(|r| HealthzSignal {
                name: r.name.clone(),
                status: r.status.to_string(),
            })
            .collect(),
    };
    (status, Json(body))
}

/// Runs the coordinator once in the background, then serves its frozen
/// final result on `/healthz` forever — this never re-probes a dependency
/// once `wait_all` has returned.
pub async fn run_serve(coordinator: Arc<Coordinator>, bind: &str, port: u16) -> anyhow::Result<()> {
    let run_handle = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let _ = coordinator.wait_all(ignition_core::CancellationToken::new()).await;
        })
    };

    let app = build_router(coordinator);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("ignition serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("ignition serve shut down");
    run_handle.abort();
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}
