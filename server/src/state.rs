//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It is
//! built once in `main` and lives as long as the server: one hub, one config.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::hub::Hub;

/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { hub: Hub::new(), config: Arc::new(config) }
    }
}
