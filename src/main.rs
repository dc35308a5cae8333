use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowforge_k8s::config::DriverOptions;
use flowforge_k8s::controller::{
    CredentialIssuer, DesiredResourceSet, Driver, HttpControlPlane, KubePlatform,
    LocalCredentialIssuer, MemoryInstanceStore,
};
use flowforge_k8s::model::Instance;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the driver
    Run(RunArgs),
    /// Print the resources an instance would be provisioned with
    Render(RenderArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Driver options (YAML)
    #[arg(long, env = "FLOWFORGE_DRIVER_CONFIG")]
    config: Option<PathBuf>,

    /// Instances and broker credentials to manage (YAML)
    #[arg(long, env = "FLOWFORGE_INVENTORY")]
    inventory: Option<PathBuf>,

    /// Address for the REST API
    #[arg(long, env = "FLOWFORGE_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Broker URL handed to instances by the local credential issuer
    #[arg(long, env = "FLOWFORGE_BROKER_URL")]
    broker_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Driver options (YAML)
    #[arg(long, env = "FLOWFORGE_DRIVER_CONFIG")]
    config: Option<PathBuf>,

    /// Instance record (YAML)
    #[arg(long)]
    instance: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("flowforge-k8s v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Render(render_args) => render(render_args).await,
        Commands::Run(run_args) => run_driver(run_args).await,
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let otel_layer = flowforge_k8s::telemetry::init_telemetry(&registry);
    let otel_enabled = otel_layer.is_some();
    registry.with(otel_layer).init();

    if otel_enabled {
        info!("OpenTelemetry tracing initialized");
    } else {
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }
}

async fn render(args: RenderArgs) -> anyhow::Result<()> {
    let options = DriverOptions::load(args.config.as_deref())?;
    let raw = std::fs::read_to_string(&args.instance)
        .with_context(|| format!("failed to read {}", args.instance.display()))?;
    let instance: Instance = serde_yaml::from_str(&raw)
        .with_context(|| format!("invalid instance record in {}", args.instance.display()))?;

    let tokens = LocalCredentialIssuer::new()
        .refresh_instance_tokens(&instance)
        .await?;
    let desired = DesiredResourceSet::build(&instance, &options, &tokens)?;
    print!("{}", desired.to_yaml()?);
    Ok(())
}

async fn run_driver(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(args.log_json);

    info!("Starting flowforge-k8s v{}", env!("CARGO_PKG_VERSION"));

    let options = DriverOptions::load(args.config.as_deref())?;

    let store = match &args.inventory {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            MemoryInstanceStore::from_yaml(&raw)?
        }
        None => MemoryInstanceStore::new(),
    };
    let issuer = match args.broker_url {
        Some(url) => LocalCredentialIssuer::with_broker(url),
        None => LocalCredentialIssuer::new(),
    };

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let control_plane = HttpControlPlane::new(options.launcher_timeout(), options.logs_timeout())?;
    let driver = Arc::new(Driver::new(
        Arc::new(KubePlatform::new(client)),
        Arc::new(store),
        Arc::new(issuer),
        Arc::new(control_plane),
        options,
    ));

    driver.init().await?;
    info!(
        "Driver initialized for namespace {}",
        driver.namespace()
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };

    #[cfg(feature = "rest-api")]
    let result = flowforge_k8s::rest_api::run_server(driver.clone(), args.listen, shutdown)
        .await
        .map_err(anyhow::Error::from);

    #[cfg(not(feature = "rest-api"))]
    let result = {
        let _ = args.listen;
        shutdown.await;
        Ok(())
    };

    driver.shutdown().await;

    // Flush any remaining traces
    flowforge_k8s::telemetry::shutdown_telemetry();

    result
}
