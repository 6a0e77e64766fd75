//! Prometheus-backed metrics registry shared across services.

use std::sync::Arc;

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    core::Collector,
};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Shared metrics handle registered against a single Prometheus registry.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    transfers_total: IntCounterVec,
    transfer_bytes_total: IntCounter,
    instances_started_total: IntCounter,
    active_instances: IntGauge,
    walk_subtrees_skipped_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Orchestration instances currently in the Running state.
    pub active_instances: i64,
    /// Total orchestration instances accepted since boot.
    pub instances_started_total: u64,
    /// Transfer tasks that reached the Succeeded state.
    pub transfers_succeeded_total: u64,
    /// Transfer tasks that reached the Failed state.
    pub transfers_failed_total: u64,
    /// Bytes confirmed uploaded by the storage collaborator.
    pub transfer_bytes_total: u64,
    /// Subtrees skipped during traversal due to access errors.
    pub walk_subtrees_skipped_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "http_requests_total",
            source,
        })?;
        let transfers_total = IntCounterVec::new(
            Opts::new(
                "transfers_total",
                "Transfer tasks reaching a terminal state, by status",
            ),
            &["status"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "transfers_total",
            source,
        })?;
        let transfer_bytes_total = IntCounter::with_opts(Opts::new(
            "transfer_bytes_total",
            "Bytes confirmed uploaded to the object store",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "transfer_bytes_total",
            source,
        })?;
        let instances_started_total = IntCounter::with_opts(Opts::new(
            "instances_started_total",
            "Orchestration instances accepted since boot",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "instances_started_total",
            source,
        })?;
        let active_instances = IntGauge::with_opts(Opts::new(
            "active_instances",
            "Orchestration instances currently running",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "active_instances",
            source,
        })?;
        let walk_subtrees_skipped_total = IntCounter::with_opts(Opts::new(
            "walk_subtrees_skipped_total",
            "Subtrees skipped during traversal due to access errors",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "walk_subtrees_skipped_total",
            source,
        })?;

        register(&registry, "http_requests_total", http_requests_total.clone())?;
        register(&registry, "transfers_total", transfers_total.clone())?;
        register(
            &registry,
            "transfer_bytes_total",
            transfer_bytes_total.clone(),
        )?;
        register(
            &registry,
            "instances_started_total",
            instances_started_total.clone(),
        )?;
        register(&registry, "active_instances", active_instances.clone())?;
        register(
            &registry,
            "walk_subtrees_skipped_total",
            walk_subtrees_skipped_total.clone(),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                transfers_total,
                transfer_bytes_total,
                instances_started_total,
                active_instances,
                walk_subtrees_skipped_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Record a transfer task reaching a terminal state.
    pub fn inc_transfer(&self, status: &str, bytes: u64) {
        self.inner
            .transfers_total
            .with_label_values(&[status])
            .inc();
        self.inner.transfer_bytes_total.inc_by(bytes);
    }

    /// Record the acceptance of a new orchestration instance.
    pub fn inc_instance_started(&self) {
        self.inner.instances_started_total.inc();
        self.inner.active_instances.inc();
    }

    /// Record a previously accepted instance re-entering the Running state
    /// after a restart, without counting it as newly started.
    pub fn inc_active_instances(&self) {
        self.inner.active_instances.inc();
    }

    /// Record an orchestration instance leaving the Running state.
    pub fn dec_active_instances(&self) {
        self.inner.active_instances.dec();
    }

    /// Record subtrees skipped by the tree walker.
    pub fn inc_walk_subtrees_skipped(&self, count: u64) {
        self.inner.walk_subtrees_skipped_total.inc_by(count);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_instances: self.inner.active_instances.get(),
            instances_started_total: self.inner.instances_started_total.get(),
            transfers_succeeded_total: self
                .inner
                .transfers_total
                .with_label_values(&["succeeded"])
                .get(),
            transfers_failed_total: self
                .inner
                .transfers_total
                .with_label_values(&["failed"])
                .get(),
            transfer_bytes_total: self.inner.transfer_bytes_total.get(),
            walk_subtrees_skipped_total: self.inner.walk_subtrees_skipped_total.get(),
        }
    }
}

fn register<C>(registry: &Registry, name: &'static str, collector: C) -> TelemetryResult<()>
where
    C: Collector + 'static,
{
    registry
        .register(Box::new(collector))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
