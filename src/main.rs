//! Cluster import controller - stages and delivers klusterlet agents to managed clusters

mod controller_runner;

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use kube::{Api, Client, CustomResourceExt};

use cluster_import::config::ControllerConfig;
use cluster_import::controller::Context;
use cluster_import::crd::{ManagedCluster, ManifestWork};
use cluster_import::telemetry::{init_logging, LogFormat};

/// Cluster import controller
#[derive(Parser, Debug)]
#[command(name = "cluster-import", version, about, long_about = None)]
struct Cli {
    /// Print the ManagedCluster and ManifestWork CRDs and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Json
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches ManagedClusters, their ManifestWorks and import secrets,
    /// staging import packages and supervising klusterlet teardown.
    Controller(ControllerConfig),

    /// Render a cluster's import package to stdout
    ///
    /// Reads the ManagedCluster and its bootstrap token from the hub and
    /// prints the CRD documents followed by the install documents, in the
    /// order a spoke applies them.
    Render(RenderArgs),
}

/// Render mode arguments
#[derive(Parser, Debug)]
struct RenderArgs {
    /// Name of the ManagedCluster to render
    #[arg(long)]
    cluster: String,

    #[command(flatten)]
    config: ControllerConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [ManagedCluster::crd(), ManifestWork::crd()] {
            let yaml = serde_yaml::to_string(&crd).context("failed to serialize CRD")?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_logging(cli.log_format)?;

    match cli.command {
        Some(Commands::Render(args)) => run_render(args).await,
        Some(Commands::Controller(config)) => run_controller(config).await,
        None => run_controller(ControllerConfig::from_env()?).await,
    }
}

/// Build the controller context from configuration
fn build_context(client: Client, config: &ControllerConfig) -> anyhow::Result<Context> {
    let hub_ca = config
        .load_hub_ca()
        .with_context(|| format!("failed to read hub CA file {:?}", config.hub_ca_file))?;

    Context::builder(client)
        .hub_api_server(config.hub_api_server.clone())
        .hub_ca(hub_ca)
        .images(config.image_resolver())
        .build()
        .context("failed to build controller context")
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    tracing::info!("cluster import controller starting");

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let ctx = Arc::new(build_context(client.clone(), &config)?);

    controller_runner::run_cluster_controller(client, ctx).await;

    tracing::info!("cluster import controller shutting down");
    Ok(())
}

async fn run_render(args: RenderArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let ctx = build_context(client.clone(), &args.config)?;

    let clusters: Api<ManagedCluster> = Api::all(client);
    let cluster = clusters
        .get(&args.cluster)
        .await
        .with_context(|| format!("failed to read ManagedCluster {}", args.cluster))?;

    let package = ctx.assembler.build_import_package(&cluster).await?;
    print!("{}{}", package.crds_yaml, package.import_yaml);
    Ok(())
}
