use crate::error::ProxyError;
use log::info;
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

/// Request outcome counters shared by every connection handler.
pub trait MetricsSink: Send + Sync {
    fn incr_total(&self);
    fn incr_success(&self);
    fn incr_failure(&self);
    fn snapshot(&self) -> MetricsSnapshot;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failure: u64,
}

/// Prometheus-backed counters in a registry owned by this instance.
pub struct ProxyMetrics {
    requests_total: IntCounter,
    requests_success: IntCounter,
    requests_failure: IntCounter,
    registry: Registry,
}

impl ProxyMetrics {
    pub fn new() -> Result<Self, ProxyError> {
        let requests_total = counter("requests_total", "Requests forwarded to the upstream")?;
        let requests_success = counter(
            "requests_success_total",
            "Forwarded requests answered with status 200",
        )?;
        let requests_failure = counter(
            "requests_failure_total",
            "Forwarded requests that failed or were answered with a status other than 200",
        )?;

        let registry = Registry::new();
        for c in [&requests_total, &requests_success, &requests_failure] {
            registry
                .register(Box::new(c.clone()))
                .map_err(|e| ProxyError::Config(format!("Failed to register metric: {}", e)))?;
        }

        Ok(Self {
            requests_total,
            requests_success,
            requests_failure,
            registry,
        })
    }

    /// Prometheus text exposition of all counters.
    pub fn encode(&self) -> Result<String, ProxyError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ProxyError::Config(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| ProxyError::Config(format!("Metrics output is not UTF-8: {}", e)))
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounter, ProxyError> {
    IntCounter::with_opts(Opts::new(name, help).namespace("proximity"))
        .map_err(|e| ProxyError::Config(format!("Failed to create counter {}: {}", name, e)))
}

impl MetricsSink for ProxyMetrics {
    fn incr_total(&self) {
        self.requests_total.inc();
    }

    fn incr_success(&self) {
        self.requests_success.inc();
    }

    fn incr_failure(&self) {
        self.requests_failure.inc();
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.get(),
            requests_success: self.requests_success.get(),
            requests_failure: self.requests_failure.get(),
        }
    }
}

/// Logs a counter snapshot on a fixed interval.
pub struct MetricsReporter {
    metrics: Arc<dyn MetricsSink>,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<dyn MetricsSink>, interval: Duration) -> Self {
        Self { metrics, interval }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        loop {
            ticker.tick().await;
            report(&self.metrics.snapshot());
        }
    }
}

pub fn report(snapshot: &MetricsSnapshot) {
    info!("counter requests_total count: {}", snapshot.requests_total);
    info!("counter requests_success count: {}", snapshot.requests_success);
    info!("counter requests_failure count: {}", snapshot.requests_failure);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = ProxyMetrics::new().unwrap();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_increments() {
        let metrics = ProxyMetrics::new().unwrap();
        metrics.incr_total();
        metrics.incr_total();
        metrics.incr_success();
        metrics.incr_failure();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot { requests_total: 2, requests_success: 1, requests_failure: 1 }
        );
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let a = ProxyMetrics::new().unwrap();
        let b = ProxyMetrics::new().unwrap();
        a.incr_total();
        assert_eq!(b.snapshot().requests_total, 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(ProxyMetrics::new().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.incr_total();
                        metrics.incr_failure();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 8000);
        assert_eq!(snapshot.requests_failure, 8000);
    }

    #[test]
    fn test_prometheus_exposition() {
        let metrics = ProxyMetrics::new().unwrap();
        metrics.incr_total();
        let text = metrics.encode().unwrap();
        assert!(text.contains("proximity_requests_total 1"));
        assert!(text.contains("proximity_requests_success_total 0"));
        assert!(text.contains("proximity_requests_failure_total 0"));
    }

    #[tokio::test]
    async fn test_reporter_keeps_running() {
        let metrics: Arc<dyn MetricsSink> = Arc::new(ProxyMetrics::new().unwrap());
        let handle = MetricsReporter::new(metrics, Duration::from_millis(10)).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
