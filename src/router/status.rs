//! Public server status and Prometheus scraping.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::config::Configuration;
use crate::error::{Result, ServerError};

/// Structured configuration.
#[derive(Debug, Serialize, Deserialize)]
pub struct Status {
    pub name: String,
    pub version: String,
}

/// Public server status (configuration).
pub async fn status(State(config): State<Arc<Configuration>>) -> Json<Status> {
    Json(Status {
        name: if config.name.is_empty() {
            env!("CARGO_CRATE_NAME").into()
        } else {
            config.name.clone()
        },
        version: config.version().to_owned(),
    })
}

/// Render metrics in the Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> Result<String> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(ServerError::NotFound)
}
