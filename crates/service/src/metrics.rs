use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use core_types::config::MetricsConfig;
use ipc::MetricsSnapshot;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Request kinds tracked by the service; `invalid` counts undecodable frames.
pub const REQUEST_KINDS: [&str; 6] = [
    "neighbours",
    "distance",
    "vectors",
    "status",
    "metrics",
    "invalid",
];

/// Prometheus counters and latency histograms on a private registry.
pub struct ServiceMetrics {
    registry: Registry,
    requests: IntCounterVec,
    errors: IntCounterVec,
    latency: HistogramVec,
}

impl std::fmt::Debug for ServiceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMetrics").finish_non_exhaustive()
    }
}

impl ServiceMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new("kgsearch_requests_total", "Requests handled, by kind"),
            &["kind"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "kgsearch_request_errors_total",
                "Requests answered with an error, by kind",
            ),
            &["kind"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "kgsearch_request_latency_seconds",
                "Request handling latency, by kind",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
            ]),
            &["kind"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        Ok(Self {
            registry,
            requests,
            errors,
            latency,
        })
    }

    pub fn record_request(&self, kind: &str, elapsed: Duration, ok: bool) {
        self.requests.with_label_values(&[kind]).inc();
        if !ok {
            self.errors.with_label_values(&[kind]).inc();
        }
        self.latency
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn scrape(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .context("encode metrics")?;
        String::from_utf8(buf).context("metrics text is not utf-8")
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snap = MetricsSnapshot::default();
        let mut latency_sum = 0.0;
        let mut latency_count = 0u64;
        for kind in REQUEST_KINDS {
            snap.requests_total += self.requests.with_label_values(&[kind]).get();
            snap.errors_total += self.errors.with_label_values(&[kind]).get();
            let hist = self.latency.with_label_values(&[kind]);
            latency_sum += hist.get_sample_sum();
            latency_count += hist.get_sample_count();
        }
        if latency_count > 0 {
            snap.mean_latency_ms = Some(latency_sum * 1000.0 / latency_count as f64);
        }
        snap
    }
}

/// Build metrics when enabled in config.
pub fn init_metrics_from_config(cfg: &MetricsConfig) -> Result<Option<Arc<ServiceMetrics>>> {
    if !cfg.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(ServiceMetrics::new()?)))
}
