//! # Function Gateway - Main Entry Point
//!
//! Runs functions declared in a service manifest behind a local HTTP API
//! gateway. Each function executes inside a sandbox container built from its
//! runtime image.
//!
//! ## Startup Sequence
//!
//! 1. Parse the command line and load gateway settings
//! 2. Load the env file and manifest fragments, build the route table
//! 3. Verify the container engine and runtime images
//! 4. Bind, log the route banner and serve until SIGINT/SIGTERM
//!
//! Any startup failure exits with status 1.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use function_gateway::core::config::{GatewayConfig, DEFAULT_STAGE};
use function_gateway::core::dependencies::{check_dependencies, required_images};
use function_gateway::core::manifest::{default_manifest_path, read_env_file, ServiceManifest};
use function_gateway::gateway::server::{route_banner, GatewayContext, GatewayServer};
use function_gateway::invocation::engine::{ContainerEngine, DockerEngine};
use function_gateway::invocation::runtime::RuntimeRegistry;
use function_gateway::invocation::sandbox::SandboxPool;
use function_gateway::observability::init_tracing;
use function_gateway::routing::router::RouteTable;
use function_gateway::{GatewayError, GatewayResult};

/// Local HTTP API gateway for containerized functions
#[derive(Debug, Parser)]
#[command(name = "function-gateway", version, about)]
struct Cli {
    /// Directory holding one code directory per function
    #[arg(short, long, default_value = "./functions")]
    functions: PathBuf,

    /// Service manifest fragment (repeatable)
    #[arg(short, long = "config")]
    config: Vec<PathBuf>,

    /// Gateway settings file (YAML)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Environment file (KEY=VALUE lines) injected into every function
    #[arg(short, long)]
    env: Option<PathBuf>,

    /// Directory mounted at /opt as the function layer
    #[arg(short, long)]
    layer: Option<PathBuf>,

    /// Container network sandboxes join
    #[arg(short, long)]
    network: Option<String>,

    /// Stage token reported to functions
    #[arg(long)]
    stage: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match load_settings(&cli).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&settings.logging, cli.verbose);
    info!("Starting function gateway v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli, settings).await {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Function gateway stopped");
}

/// Settings file (optional) plus environment overrides plus command line flags
async fn load_settings(cli: &Cli) -> GatewayResult<GatewayConfig> {
    let mut settings = match &cli.settings {
        Some(path) => GatewayConfig::load_from_file(path).await?,
        None => {
            let mut settings = GatewayConfig::default();
            settings.apply_env_overrides()?;
            settings
        }
    };

    if let Some(host) = &cli.host {
        settings.server.bind_address = host.clone();
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(stage) = &cli.stage {
        settings.server.stage = stage.clone();
    }
    if let Some(layer) = &cli.layer {
        settings.engine.layer_dir = Some(canonical_dir(layer, "layer")?);
    }
    if let Some(network) = &cli.network {
        settings.engine.network = Some(network.clone());
    }

    settings.validate()?;
    Ok(settings)
}

fn canonical_dir(path: &Path, what: &str) -> GatewayResult<PathBuf> {
    let dir = path.canonicalize().map_err(|e| {
        GatewayError::config(format!("Invalid {} directory: \"{}\": {}", what, path.display(), e))
    })?;
    if !dir.is_dir() {
        return Err(GatewayError::config(format!(
            "Invalid {} directory: \"{}\"",
            what,
            path.display()
        )));
    }
    Ok(dir)
}

async fn run(cli: Cli, mut settings: GatewayConfig) -> GatewayResult<()> {
    let functions_dir = canonical_dir(&cli.functions, "functions")?;

    let overrides = match &cli.env {
        Some(path) => read_env_file(path)?,
        None => Default::default(),
    };

    let fragment_paths = if cli.config.is_empty() {
        vec![default_manifest_path()]
    } else {
        cli.config.clone()
    };
    let mut fragments = Vec::with_capacity(fragment_paths.len());
    for path in &fragment_paths {
        fragments.push(ServiceManifest::load_fragment(path).await?);
    }
    let manifest = ServiceManifest::merge(fragments)?;

    if cli.stage.is_none() && settings.server.stage == DEFAULT_STAGE {
        if let Some(stage) = &manifest.provider.stage {
            settings.server.stage = stage.clone();
        }
    }

    let descriptors =
        manifest.into_descriptors(&functions_dir, &overrides, settings.invocation.default_timeout)?;

    let runtimes = RuntimeRegistry::with_overrides(&settings.runtimes)?;
    let routes = Arc::new(RouteTable::load(descriptors, &runtimes)?);
    if routes.is_empty() {
        return Err(GatewayError::config("No HTTP API endpoints were found"));
    }

    let engine: Arc<dyn ContainerEngine> = Arc::new(DockerEngine::from_config(&settings.engine));
    check_dependencies(
        engine.as_ref(),
        &required_images(&routes, &runtimes),
        settings.engine.pull_missing_images,
    )
    .await?;

    let pools = Arc::new(SandboxPool::new(
        engine,
        routes.functions(),
        &runtimes,
        &settings.engine,
        &settings.pool,
    )?);

    let context = GatewayContext::new(Arc::clone(&routes), Arc::clone(&pools), &settings.server);
    let server = match GatewayServer::bind(
        context,
        settings.bind_addr()?,
        &settings.server,
        settings.pool.reap_interval,
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            pools.shutdown().await;
            return Err(e);
        }
    };

    let addr = server.local_addr()?;
    info!(stage = %settings.server.stage, "Function gateway listening on http://{}", addr);
    for line in route_banner(&routes, addr) {
        info!("{}", line);
    }

    server.serve(shutdown_signal()).await
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
