//! Lattice Topology - ClusterClass managed-topology controller

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tracing::{error, info};

use lattice_topology::client::KubeTopologyClient;
use lattice_topology::config::{ControllerConfig, OsEnv};
use lattice_topology::controller::{build_topology_controller, Context};
use lattice_topology::crd::{Cluster, ClusterClass};
use lattice_topology::runtime::HttpExtensionTransport;
use lattice_topology::telemetry::init_logging;
use lattice_topology::webhook::{webhook_router, ClusterClassValidator, WebhookState};

/// Lattice Topology - reconciles Clusters bound to a ClusterClass
#[derive(Parser, Debug)]
#[command(name = "lattice-topology", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,
}

/// Controller arguments
///
/// The controller watches Clusters and ClusterClasses and, when TLS material
/// is given, serves the ClusterClass admission webhooks.
#[derive(clap::Args, Debug)]
struct ControllerArgs {
    /// Controller configuration file (YAML)
    #[arg(short = 'c', long = "config", env = "LATTICE_TOPOLOGY_CONFIG")]
    config_file: Option<PathBuf>,

    /// Address the admission webhooks listen on
    #[arg(long, env = "LATTICE_TOPOLOGY_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// Webhook serving certificate (PEM)
    #[arg(long, env = "LATTICE_TOPOLOGY_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Webhook serving key (PEM)
    #[arg(long, env = "LATTICE_TOPOLOGY_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Extra CA (PEM) trusted when calling runtime extensions
    #[arg(long, env = "LATTICE_TOPOLOGY_EXTENSION_CA")]
    extension_ca: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        for crd in [Cluster::crd(), ClusterClass::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    run_controller(cli.controller).await
}

/// Run the controller and, when configured, the admission webhooks
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let config = match &args.config_file {
        Some(path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    }
    .apply_env(&OsEnv);

    init_logging(&config.logging)?;
    info!(
        field_manager = %config.field_manager,
        extensions = config.extensions.len(),
        "Starting topology controller"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let transport = match &args.extension_ca {
        Some(path) => {
            let pem = tokio::fs::read(path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read extension CA {:?}: {}", path, e))?;
            HttpExtensionTransport::with_ca(&pem)?
        }
        None => HttpExtensionTransport::new()?,
    };

    let field_manager = config.field_manager.clone();
    let ctx = Arc::new(Context::from_kube(client.clone(), config, Arc::new(transport))?);

    if let (Some(cert), Some(key)) = (args.tls_cert, args.tls_key) {
        let addr = args.webhook_addr;
        let validator = ClusterClassValidator::new(Arc::new(KubeTopologyClient::new(
            client.clone(),
            field_manager,
        )));
        let router = webhook_router(Arc::new(WebhookState::new(validator)));
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load webhook TLS material: {}", e))?;

        info!(addr = %addr, "Starting admission webhook server");
        tokio::spawn(async move {
            if let Err(e) = axum_server::bind_rustls(addr, tls_config)
                .serve(router.into_make_service())
                .await
            {
                error!(error = %e, "Webhook server error");
            }
        });
    }

    build_topology_controller(client, ctx).await;
    info!("Topology controller stopped");
    Ok(())
}
