//! tinykube-responder - the fixed-response workload
//!
//! Answers every request with `200 OK` and the configured greeting. Exits
//! with status 1 if the port cannot be bound.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::net::IpAddr;
use tinykube_responder::{Responder, ResponderConfig, DEFAULT_GREETING, DEFAULT_PORT};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "tinykube-responder")]
#[command(about = "Answer every HTTP request with a fixed greeting", long_about = None)]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Response body
    #[arg(short, long, env = "GREETING", default_value = DEFAULT_GREETING)]
    greeting: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ResponderConfig {
        bind: args.bind,
        port: args.port,
        greeting: args.greeting,
    };

    let responder = Responder::bind(&config).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            trigger.cancel();
        }
    });

    responder.serve(shutdown).await?;

    info!("tinykube-responder stopped");
    Ok(())
}
