use crate::cli::{Commands, OutputFormat, RunArgs};
use crate::controller::ControllerConfig;
use crate::manifest::Manifest;
use crate::metrics::MetricsExporter;
use crate::model::{ImageRef, NodePortRange, Service};
use crate::runtime::ImageCatalog;
use crate::{Cluster, ClusterConfig, Result, RESPONDER_IMAGE, VERSION};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => handle_run(args).await,
        Commands::Validate { files, format } => handle_validate(files, format),
    }
}

pub fn cluster_config(args: &RunArgs) -> ClusterConfig {
    ClusterConfig {
        node_address: args.node_address,
        external_address: args.external_address,
        controller: ControllerConfig {
            resync_interval: Duration::from_millis(args.resync_interval_ms.max(1)),
            backoff_base: Duration::from_millis(args.backoff_base_ms),
            backoff_max: Duration::from_millis(args.backoff_max_ms.max(args.backoff_base_ms)),
        },
        ..ClusterConfig::default()
    }
}

/// The bundled responder image plus every `--image`, all serving the
/// configured greeting.
pub fn image_catalog(args: &RunArgs) -> Result<ImageCatalog> {
    let mut catalog = ImageCatalog::new();
    catalog.register(&ImageRef::new(RESPONDER_IMAGE, VERSION), &args.greeting);
    for reference in &args.images {
        catalog.register(&ImageRef::parse(reference)?, &args.greeting);
    }
    Ok(catalog)
}

async fn handle_run(args: RunArgs) -> Result<()> {
    let config = cluster_config(&args);
    let catalog = image_catalog(&args)?;
    let manifest = Manifest::load_all(&args.files, config.node_port_range)?;
    info!(
        "Loaded {} deployment(s) and {} service(s); {} image(s) available",
        manifest.deployments.len(),
        manifest.services.len(),
        catalog.len()
    );

    let cluster = Cluster::new(config, catalog)?;

    let exporter_shutdown = CancellationToken::new();
    if let Some(port) = args.metrics_port {
        let addr = SocketAddr::new(args.node_address, port);
        let exporter = MetricsExporter::bind(cluster.metrics().clone(), addr).await?;
        tokio::spawn(exporter.serve(exporter_shutdown.clone()));
    }

    let services = match cluster.apply_manifest(manifest).await {
        Ok(services) => services,
        Err(e) => {
            error!("Failed to apply manifests: {}", e);
            exporter_shutdown.cancel();
            cluster.shutdown().await;
            return Err(e);
        }
    };
    for service in &services {
        print_service(&cluster, service);
    }

    info!("tinykube running. Press Ctrl+C to exit.");
    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    exporter_shutdown.cancel();
    cluster.shutdown().await;
    info!("tinykube stopped");
    Ok(())
}

fn print_service(cluster: &Cluster, service: &Service) {
    for mapping in &service.ports {
        match mapping.node_port {
            Some(node_port) => println!(
                "service/{} {}/{} -> targetPort {} (node {})",
                service.name,
                mapping.protocol,
                mapping.port,
                mapping.target_port,
                cluster.node_endpoint(node_port)
            ),
            None => println!(
                "service/{} {}/{} -> targetPort {} (cluster internal)",
                service.name, mapping.protocol, mapping.port, mapping.target_port
            ),
        }
    }
}

fn handle_validate(files: Vec<PathBuf>, format: OutputFormat) -> Result<()> {
    let manifest = Manifest::load_all(&files, NodePortRange::default())?;
    info!(
        "Validated {} deployment(s) and {} service(s)",
        manifest.deployments.len(),
        manifest.services.len()
    );

    let rendered = match format {
        OutputFormat::Yaml => serde_yaml::to_string(&manifest)?,
        OutputFormat::Json => serde_json::to_string_pretty(&manifest)?,
    };
    println!("{}", rendered);
    Ok(())
}
