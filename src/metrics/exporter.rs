use crate::metrics::ClusterMetrics;
use crate::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tinykube_responder::http;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Serves the Prometheus text exposition to any request.
pub struct MetricsExporter {
    metrics: ClusterMetrics,
    listener: TcpListener,
}

impl MetricsExporter {
    pub async fn bind(metrics: ClusterMetrics, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Starting Prometheus exporter on {}", listener.local_addr()?);
        Ok(Self { metrics, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self, shutdown: CancellationToken) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Metrics accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                },
            };

            let body = match self.metrics.render() {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to render metrics: {}", e);
                    continue;
                }
            };
            let response = http::encode_response(CONTENT_TYPE, body.as_bytes());
            tokio::spawn(async move {
                if let Err(e) = http::respond(stream, response).await {
                    debug!("Metrics request from {} failed: {}", peer, e);
                }
            });
        }
    }
}
