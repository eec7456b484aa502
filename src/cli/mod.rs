pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use tinykube_responder::DEFAULT_GREETING;

#[derive(Parser)]
#[command(name = "tinykube")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Single-node replica controller and service router", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply manifests and run the cluster until interrupted")]
    Run(RunArgs),
    #[command(about = "Load and validate manifests without running them")]
    Validate {
        #[arg(short = 'f', long = "filename", required = true, help = "Manifest file (repeatable)")]
        files: Vec<PathBuf>,

        #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Yaml, help = "Output format")]
        format: OutputFormat,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    #[arg(short = 'f', long = "filename", required = true, help = "Manifest file (repeatable)")]
    pub files: Vec<PathBuf>,

    #[arg(long = "image", help = "Additional image reference available to pods (repeatable)")]
    pub images: Vec<String>,

    #[arg(long, default_value = DEFAULT_GREETING, help = "Body served by every available image")]
    pub greeting: String,

    #[arg(long, default_value = "127.0.0.1", help = "Address NodePort listeners bind to")]
    pub node_address: IpAddr,

    #[arg(long, default_value = "0.0.0.0", help = "Address LoadBalancer ports bind to")]
    pub external_address: IpAddr,

    #[arg(long, default_value_t = 2000, help = "Reconciliation resync interval in milliseconds")]
    pub resync_interval_ms: u64,

    #[arg(long, default_value_t = 1000, help = "Initial pod creation backoff in milliseconds")]
    pub backoff_base_ms: u64,

    #[arg(long, default_value_t = 30000, help = "Maximum pod creation backoff in milliseconds")]
    pub backoff_max_ms: u64,

    #[arg(long, help = "Serve Prometheus metrics on this port")]
    pub metrics_port: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}
