use std::sync::Arc;

use relay_core::RelayEngine;

use crate::AppState;
use crate::config::RelayConfig;
use crate::metrics::ServerMetrics;
use crate::training::TrainingCatalog;

/// Build an `AppState` with an empty engine and default tunables.
pub fn test_app_state() -> AppState {
    AppState {
        engine: Arc::new(RelayEngine::new()),
        relay_config: Arc::new(RelayConfig::default()),
        metrics: Arc::new(ServerMetrics::new()),
        catalog: Arc::new(TrainingCatalog::default()),
    }
}
