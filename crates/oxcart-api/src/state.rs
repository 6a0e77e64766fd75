//! Shared application state threaded through the HTTP handlers.

use std::sync::Arc;

use oxcart_core::ArchiveEngine;
use oxcart_telemetry::Metrics;

pub(crate) struct ApiState {
    pub(crate) engine: Arc<ArchiveEngine>,
    pub(crate) telemetry: Metrics,
}

impl ApiState {
    pub(crate) const fn new(engine: Arc<ArchiveEngine>, telemetry: Metrics) -> Self {
        Self { engine, telemetry }
    }
}
