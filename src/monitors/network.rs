//! Network monitor: interface byte deltas plus a TCP connect probe.
//!
//! The probe target is resolved through a `TtlCell` so DNS is consulted at
//! most once per `probe_resolve_ttl_secs`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::Networks;
use tokio::net::TcpStream;
use tokio::time::Instant;
use url::Url;

use crate::config::{ConnectionConfig, MonitorsConfig};
use crate::monitors::{Reading, ResourceMonitor, SampleError, NETWORK_LATENCY};
use crate::observability::metrics::{self, MetricsRegistry};
use crate::ttl::TtlCell;

/// `host:port` to probe: the explicit setting, else the upstream url's host.
pub fn probe_target(monitors: &MonitorsConfig, connection: &ConnectionConfig) -> Option<String> {
    if let Some(address) = &monitors.probe_address {
        return Some(address.clone());
    }
    let url = Url::parse(&connection.url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

pub struct NetworkMonitor {
    networks: Networks,
    target: Option<String>,
    resolved: TtlCell<SocketAddr>,
    interval: Duration,
    probe_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl NetworkMonitor {
    pub fn new(
        config: &MonitorsConfig,
        target: Option<String>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            target,
            resolved: TtlCell::new(Duration::from_secs(config.probe_resolve_ttl_secs)),
            interval: Duration::from_secs(config.network_interval_secs),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            metrics,
        }
    }

    /// Resolved probe address, refreshed when stale. A failed refresh falls
    /// back to the previous address.
    async fn probe_address(&mut self, target: &str) -> Result<SocketAddr, SampleError> {
        let now = Instant::now();
        if !self.resolved.is_stale(now) {
            if let Some(addr) = self.resolved.get() {
                return Ok(*addr);
            }
        }

        let lookup = tokio::net::lookup_host(target)
            .await
            .map_err(|e| e.to_string())
            .and_then(|mut addrs| addrs.next().ok_or_else(|| "no addresses".to_string()));
        match lookup {
            Ok(addr) => {
                self.resolved.refresh(addr, now);
                Ok(addr)
            }
            Err(reason) => match self.resolved.get() {
                Some(addr) => {
                    tracing::debug!(target, reason = %reason, "Re-resolve failed, using cached address");
                    Ok(*addr)
                }
                None => Err(SampleError::Resolve {
                    address: target.to_string(),
                    reason,
                }),
            },
        }
    }

    async fn probe_latency_ms(&mut self, target: &str) -> Result<f64, SampleError> {
        let addr = self.probe_address(target).await?;
        let started = Instant::now();
        match tokio::time::timeout(self.probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(started.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(e)) => Err(SampleError::Probe {
                address: addr.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(SampleError::Probe {
                address: addr.to_string(),
                reason: format!("timed out after {:?}", self.probe_timeout),
            }),
        }
    }
}

#[async_trait]
impl ResourceMonitor for NetworkMonitor {
    fn name(&self) -> &'static str {
        "network"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn sample(&mut self) -> Result<Vec<Reading>, SampleError> {
        self.networks.refresh();
        let (rx, tx) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.received(), tx + data.transmitted())
            });
        self.metrics.counter(metrics::NETWORK_RX_BYTES, &[]).increment(rx);
        self.metrics.counter(metrics::NETWORK_TX_BYTES, &[]).increment(tx);

        let Some(target) = self.target.clone() else {
            return Ok(Vec::new());
        };
        let latency = self.probe_latency_ms(&target).await?;
        self.metrics
            .set_gauge(metrics::NETWORK_LATENCY_MS, &[], latency);
        tracing::debug!(target = %target, latency_ms = latency, rx_bytes = rx, tx_bytes = tx, "Network sampled");

        Ok(vec![Reading::new(NETWORK_LATENCY, latency)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_target_from_url() {
        let monitors = MonitorsConfig::default();
        let connection = ConnectionConfig {
            url: "wss://stream.example.com/v1".into(),
            ..Default::default()
        };
        assert_eq!(probe_target(&monitors, &connection).as_deref(), Some("stream.example.com:443"));

        let explicit = MonitorsConfig {
            probe_address: Some("10.0.0.1:9000".into()),
            ..Default::default()
        };
        assert_eq!(probe_target(&explicit, &connection).as_deref(), Some("10.0.0.1:9000"));
    }

    #[tokio::test]
    async fn test_connect_latency_to_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let registry = Arc::new(MetricsRegistry::new());
        let mut monitor = NetworkMonitor::new(&MonitorsConfig::default(), Some(target), registry.clone());

        let readings = monitor.sample().await.unwrap();
        assert_eq!(readings[0].metric, NETWORK_LATENCY);
        assert!(readings[0].value >= 0.0);
        assert!(monitor.resolved.get().is_some());
        assert!(registry.value(metrics::NETWORK_LATENCY_MS).is_some());
    }

    #[tokio::test]
    async fn test_unresolvable_target_is_sample_error() {
        let mut monitor = NetworkMonitor::new(
            &MonitorsConfig::default(),
            Some("not-a-host.invalid:80".into()),
            Arc::new(MetricsRegistry::new()),
        );
        assert!(matches!(monitor.sample().await, Err(SampleError::Resolve { .. })));
    }
}
