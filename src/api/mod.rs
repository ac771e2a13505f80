pub mod auth;
pub mod models;
pub mod routes;
pub mod socket;

use std::sync::Arc;
use axum::Router;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ScanConfig;
use crate::db::Database;
use crate::errors::ScanError;
use crate::events::{EventBus, ScanEvent};
use crate::orchestrator::{ScanOrchestrator, ScanOutcome};
use crate::persist::ResultPersistenceAdapter;
use crate::questions::{QuestionBank, QuestionSource};

/// A live scan: the orchestrator plus its event bus, so the transport can
/// attach a mirror channel.
pub struct ScanHandle {
    pub orchestrator: Arc<ScanOrchestrator>,
    pub bus: Arc<EventBus>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub active_scans: Arc<DashMap<String, Arc<ScanHandle>>>,
    pub questions: Arc<QuestionBank>,
}

pub async fn create_app_state(db_path: &str, questions_dir: Option<&str>) -> Result<AppState, ScanError> {
    let db = Database::new(db_path)?;
    let questions = match questions_dir {
        Some(dir) => QuestionBank::load(std::path::Path::new(dir))?,
        None => QuestionBank::builtin(),
    };
    Ok(AppState {
        db,
        active_scans: Arc::new(DashMap::new()),
        questions: Arc::new(questions),
    })
}

/// Boots the orchestrator task for one scan and registers its handle. The
/// task drives the persistence adapter through the scan's terminal estado
/// and deregisters itself when done.
pub fn spawn_scan(
    state: &AppState,
    scan_id: &str,
    config: ScanConfig,
    event_sink: Option<mpsc::UnboundedSender<ScanEvent>>,
) -> Arc<ScanHandle> {
    let bus = Arc::new(EventBus::new());
    if let Some(sink) = event_sink {
        bus.set_sink(sink);
    }
    let questions: Arc<dyn QuestionSource> = state.questions.clone();
    let orchestrator = Arc::new(ScanOrchestrator::new(
        scan_id,
        config,
        bus.clone(),
        questions,
    ));
    let handle = Arc::new(ScanHandle {
        orchestrator: orchestrator.clone(),
        bus,
    });
    state
        .active_scans
        .insert(scan_id.to_string(), handle.clone());

    let adapter = ResultPersistenceAdapter::new(state.db.clone());
    let active_scans = state.active_scans.clone();
    let scan_id = scan_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = adapter.scan_started(&scan_id) {
            error!(scan_id = %scan_id, error = %e, "Failed to mark scan en_progreso");
        }
        let persisted = match orchestrator.run().await {
            Ok(ScanOutcome::Completed(report)) => adapter.scan_completed(&report),
            Ok(ScanOutcome::Stopped) => adapter.scan_stopped(&scan_id),
            Err(_) => adapter.scan_errored(&scan_id),
        };
        if let Err(e) = persisted {
            error!(scan_id = %scan_id, error = %e, "Failed to persist scan outcome");
        }
        active_scans.remove(&scan_id);
        info!(scan_id = %scan_id, "Scan task finished");
    });

    handle
}

pub fn build_router(state: AppState) -> Router {
    // The socket authenticates on its own handshake (token query parameter);
    // every REST route goes through the bearer middleware.
    let rest = Router::new()
        .route("/api/health", axum::routing::get(routes::health::health_check))
        .route(
            "/api/scans",
            axum::routing::post(routes::scans::create_scan).get(routes::scans::list_scans),
        )
        .route("/api/scans/:id", axum::routing::get(routes::scans::get_scan))
        .route("/api/scans/:id/status", axum::routing::get(routes::status::get_status))
        .route("/api/scans/:id/stop", axum::routing::post(routes::scans::stop_scan))
        .layer(axum::middleware::from_fn(auth::api_auth_middleware));

    Router::new()
        .route("/api/scans/ws", axum::routing::get(socket::upgrade))
        .merge(rest)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
