pub mod exporter;

pub use exporter::MetricsExporter;

use crate::Result;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

/// Outcome label values for proxied connections.
pub mod outcome {
    pub const FORWARDED: &str = "forwarded";
    pub const NO_ENDPOINTS: &str = "no_endpoints";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
}

/// Controller and router metrics backed by a private registry.
#[derive(Clone)]
pub struct ClusterMetrics {
    registry: Registry,
    pods_created: IntCounterVec,
    pods_terminated: IntCounterVec,
    reconcile_passes: IntCounterVec,
    live_pods: IntGaugeVec,
    table_version: IntGauge,
    connections: IntCounterVec,
}

impl ClusterMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let pods_created = IntCounterVec::new(
            Opts::new("tinykube_pods_created_total", "Pods created by deployment controllers"),
            &["deployment"],
        )?;
        let pods_terminated = IntCounterVec::new(
            Opts::new(
                "tinykube_pods_terminated_total",
                "Pods terminated by deployment controllers",
            ),
            &["deployment"],
        )?;
        let reconcile_passes = IntCounterVec::new(
            Opts::new("tinykube_reconcile_passes_total", "Reconciliation passes run"),
            &["deployment"],
        )?;
        let live_pods = IntGaugeVec::new(
            Opts::new("tinykube_deployment_live_pods", "Pending or Running pods per deployment"),
            &["deployment"],
        )?;
        let table_version = IntGauge::new(
            "tinykube_router_table_version",
            "Version of the active forwarding table",
        )?;
        let connections = IntCounterVec::new(
            Opts::new("tinykube_router_connections_total", "Connections accepted by service listeners"),
            &["service", "outcome"],
        )?;

        registry.register(Box::new(pods_created.clone()))?;
        registry.register(Box::new(pods_terminated.clone()))?;
        registry.register(Box::new(reconcile_passes.clone()))?;
        registry.register(Box::new(live_pods.clone()))?;
        registry.register(Box::new(table_version.clone()))?;
        registry.register(Box::new(connections.clone()))?;

        Ok(Self {
            registry,
            pods_created,
            pods_terminated,
            reconcile_passes,
            live_pods,
            table_version,
            connections,
        })
    }

    pub fn pod_created(&self, deployment: &str) {
        self.pods_created.with_label_values(&[deployment]).inc();
    }

    pub fn pods_created(&self, deployment: &str) -> u64 {
        self.pods_created.with_label_values(&[deployment]).get()
    }

    pub fn pod_terminated(&self, deployment: &str) {
        self.pods_terminated.with_label_values(&[deployment]).inc();
    }

    pub fn reconcile_pass(&self, deployment: &str) {
        self.reconcile_passes.with_label_values(&[deployment]).inc();
    }

    pub fn set_live_pods(&self, deployment: &str, count: i64) {
        self.live_pods.with_label_values(&[deployment]).set(count);
    }

    pub fn remove_deployment(&self, deployment: &str) {
        let _ = self.live_pods.remove_label_values(&[deployment]);
    }

    pub fn set_table_version(&self, version: u64) {
        self.table_version.set(i64::try_from(version).unwrap_or(i64::MAX));
    }

    pub fn connection(&self, service: &str, outcome: &str) {
        self.connections.with_label_values(&[service, outcome]).inc();
    }

    /// Prometheus text exposition of every metric.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::TinykubeError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_values() {
        let metrics = ClusterMetrics::new().unwrap();
        metrics.pod_created("demo");
        metrics.pod_created("demo");
        metrics.set_live_pods("demo", 2);
        metrics.set_table_version(7);
        metrics.connection("demo", outcome::FORWARDED);

        let text = metrics.render().unwrap();
        assert!(text.contains("tinykube_pods_created_total{deployment=\"demo\"} 2"));
        assert!(text.contains("tinykube_deployment_live_pods{deployment=\"demo\"} 2"));
        assert!(text.contains("tinykube_router_table_version 7"));
        let line = text
            .lines()
            .find(|l| l.starts_with("tinykube_router_connections_total{"))
            .expect("connections sample");
        assert!(line.contains("outcome=\"forwarded\""));
        assert!(line.contains("service=\"demo\""));
        assert!(line.ends_with(" 1"));
    }

    #[test]
    fn test_removed_deployment_gauge_disappears() {
        let metrics = ClusterMetrics::new().unwrap();
        metrics.set_live_pods("gone", 1);
        metrics.remove_deployment("gone");

        let text = metrics.render().unwrap();
        assert!(!text.contains("tinykube_deployment_live_pods{deployment=\"gone\"}"));
    }
}
