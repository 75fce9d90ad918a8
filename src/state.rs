use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::db::MasteryStore;
use crate::mastery::Clock;
use crate::services::recompute::RecomputeOrchestrator;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    store: MasteryStore,
    clock: Arc<dyn Clock>,
    recompute: Arc<RecomputeOrchestrator>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: MasteryStore, clock: Arc<dyn Clock>, recompute: RecomputeOrchestrator) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            store,
            clock,
            recompute: Arc::new(recompute),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn store(&self) -> &MasteryStore {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn recompute(&self) -> Arc<RecomputeOrchestrator> {
        Arc::clone(&self.recompute)
    }

    /// Cancelled when the process starts shutting down; long-running
    /// operations derive child tokens from it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
