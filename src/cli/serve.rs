use tracing::info;

use super::commands::ServeArgs;
use crate::api::{build_router, create_app_state, AppState};
use crate::errors::ScanError;

pub async fn handle_serve(args: ServeArgs) -> Result<(), ScanError> {
    let state = create_app_state(&args.db, args.questions.as_deref()).await?;
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!(bind = %args.bind, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown(state))
        .await
        .map_err(|e| ScanError::Internal(format!("server error: {}", e)))?;
    Ok(())
}

/// On ctrl-c, stop every active scan before the server exits.
async fn shutdown(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down; stopping active scans");
    let handles: Vec<_> = state
        .active_scans
        .iter()
        .map(|entry| entry.value().orchestrator.clone())
        .collect();
    for orchestrator in handles {
        orchestrator.stop().await;
    }
}
