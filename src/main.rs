use std::{future::IntoFuture, net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use rpcgate::{
    GatewayService, GracefulShutdown, HttpHandler,
    adapters::{FileMetadataCollector, FileNameRegistry, HttpRpcInvoker, StaticNameRegistry},
    config::{GatewayConfig, GatewayConfigValidator, load_config, loader::starter_config},
    metrics,
    ports::{
        metadata_collector::{MetadataCollector, MetadataConnection},
        name_registry::NameRegistry,
        rpc_invoker::RpcInvoker,
    },
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        eprintln!("aws-lc-rs crypto provider not installed (already set?): {e:?}");
    }

    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    GatewayConfigValidator::validate(&config)
        .map_err(|e| eyre!("Invalid configuration in {config_path}:\n{e}"))?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    let config = Arc::new(config);
    let invoker = build_invoker(&config)?;
    let registry = build_name_registry(&config);

    let gateway = Arc::new(
        GatewayService::builder(config.clone())
            .invoker(invoker)
            .name_registry(registry)
            .build()
            .context("Failed to assemble gateway")?,
    );
    gateway.start().await.context("Failed to start gateway")?;

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let app = Arc::new(HttpHandler::new(gateway.clone())).router();

    tracing::info!(
        "rpcgate listening on {} for /{} (rpc endpoint: {})",
        addr,
        config.application,
        config.rpc.endpoint
    );

    let shutdown_signal = graceful_shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal.wait_for_shutdown_signal().await;
    });

    let drain_timeout = graceful_shutdown.drain_timeout();
    let server_result = tokio::select! {
        result = server.into_future() => result.context("Server error"),
        _ = async {
            graceful_shutdown.wait_for_shutdown_signal().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!("In-flight requests did not drain within {:?}", drain_timeout);
            Ok(())
        }
    };

    gateway.shutdown().await;
    tracing::info!("Graceful shutdown completed");
    server_result
}

fn build_invoker(config: &GatewayConfig) -> Result<Arc<dyn RpcInvoker>> {
    let mut invoker =
        HttpRpcInvoker::new(&config.rpc.endpoint).context("Failed to create RPC invoker")?;

    if let Some(metadata) = &config.metadata {
        let mut collector = FileMetadataCollector::default();
        collector
            .initialize(&MetadataConnection::new(
                metadata.address.as_str(),
                metadata.group.as_deref(),
            ))
            .context("Failed to initialize metadata collector")?;
        invoker = invoker.with_metadata(Arc::new(collector));
    }

    Ok(Arc::new(invoker))
}

fn build_name_registry(config: &GatewayConfig) -> Arc<dyn NameRegistry> {
    match &config.registry.names_file {
        Some(path) => Arc::new(FileNameRegistry::new(path)),
        None => {
            tracing::info!("No names file configured, service tokens pass through unresolved");
            Arc::new(StaticNameRegistry::default())
        }
    }
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Application: /{}", config.application);
            println!("   • RPC Endpoint: {}", config.rpc.endpoint);
            println!(
                "   • Filters: {}",
                config
                    .filters
                    .iter()
                    .map(|f| format!("{}@{}", f.name, f.priority))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!("   • Worker Pool: {}", config.isolation_enabled());
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure the RPC endpoint starts with http:// or https://");
            println!("   • Give every filter a distinct priority");
            println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
            println!("   • Use humantime durations (e.g., '3s', '500ms')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, starter_config())
        .await
        .context("Failed to write config file")?;

    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'rpcgate serve --config {config_path}' to start the gateway");
    Ok(())
}
