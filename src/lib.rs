pub mod config;
pub mod db;
pub mod logging;
pub mod mastery;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

use std::sync::Arc;

use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::db::MasteryStore;
use crate::mastery::{Clock, SystemClock};
use crate::services::event_source::EventSourceClient;
use crate::services::recompute::RecomputeOrchestrator;
use crate::state::AppState;

/// Wires the store, upstream client and clock into shared state.
pub fn build_state(store: MasteryStore, source: EventSourceClient, clock: Arc<dyn Clock>, config: &Config) -> AppState {
    let recompute = RecomputeOrchestrator::new(
        store.clone(),
        source,
        Arc::clone(&clock),
        config.recompute_mode,
    );
    AppState::new(store, clock, recompute)
}

pub fn create_app(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to open mastery store: {0}")]
    Store(#[from] db::StoreError),
    #[error("failed to build event source http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Production wiring: SQLite store at `DATABASE_URL`, HTTP event source, system clock.
pub async fn state_from_config(config: &Config) -> Result<AppState, InitError> {
    let source = EventSourceClient::http(config.events_service_url.clone(), config.retry.clone())?;
    let store = MasteryStore::connect(&config.database_url).await?;
    Ok(build_state(store, source, Arc::new(SystemClock), config))
}
