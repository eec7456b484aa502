//! Fixed-response network responder
//!
//! Every accepted connection receives the same `200 OK` response carrying
//! the configured greeting, whatever the method, path or headers. This is
//! the workload tinykube pods run.

pub mod http;

use anyhow::{Context, Result};
use bytes::Bytes;
use log::{debug, info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_GREETING: &str = "Hello, World!\n";

/// Listener settings for a responder.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub greeting: String,
}

impl ResponderConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

/// A bound responder. Binding is the only fallible step.
pub struct Responder {
    listener: TcpListener,
    response: Bytes,
}

impl Responder {
    /// Bind the configured address. Fails if the port is already in use.
    pub async fn bind(config: &ResponderConfig) -> Result<Self> {
        let addr = config.addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind responder to {}", addr))?;

        let local = listener
            .local_addr()
            .context("Failed to read responder listen address")?;
        info!("Responder listening on {}", local);

        Ok(Self {
            listener,
            response: http::encode_response(http::TEXT_PLAIN, config.greeting.as_bytes()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read responder listen address")
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Each connection runs on its own task with a clone of the immutable
    /// response bytes.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let local = self.local_addr()?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Responder on {} shutting down", local);
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let response = self.response.clone();
                        tokio::spawn(async move {
                            if let Err(e) = http::respond(stream, response).await {
                                debug!("Connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Accept on {} failed: {}", local, e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }

        Ok(())
    }
}
