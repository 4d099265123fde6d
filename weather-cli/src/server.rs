use axum::{Router, extract::State, routing::get};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex};

use meteo_sync_core::{Config, RunPlan, SUCCESS_MESSAGE, sync};

#[derive(Debug)]
struct AppState {
    config: Config,
    /// Held for the duration of a run so triggers never overlap.
    run_lock: Mutex<()>,
}

pub fn router(config: Config) -> Router {
    let state = Arc::new(AppState { config, run_lock: Mutex::new(()) });

    Router::new().route("/", get(trigger).post(trigger)).with_state(state)
}

pub async fn serve(config: Config, bind: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(address = %listener.local_addr()?, "waiting for import triggers");
    serve_on(listener, config).await
}

pub async fn serve_on(listener: TcpListener, config: Config) -> anyhow::Result<()> {
    axum::serve(listener, router(config)).await?;
    Ok(())
}

/// Runs one import. A fatal error is logged and answered with an empty body;
/// the caller never sees the error itself.
async fn trigger(State(state): State<Arc<AppState>>) -> String {
    let _guard = state.run_lock.lock().await;
    let plan = RunPlan::from_config(&state.config);

    match sync::import(&state.config, &plan).await {
        Ok(report) => {
            tracing::info!(
                complete = report.is_complete(),
                failed_steps = report.failed_steps(),
                "triggered import finished"
            );
            SUCCESS_MESSAGE.to_string()
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "triggered import aborted");
            String::new()
        }
    }
}
