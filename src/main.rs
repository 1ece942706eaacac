//! Dynamic Mock Server - CLI Entry Point

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dynamic_mock_server::{
    ComposeServer, LocalFileReader, MockServer, Reader, ServerOptions, DEFAULT_PREFIX,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "dynamic-mock-server",
    about = "Declarative HTTP mock server - collections, templated endpoints, webhooks, and proxies",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long, default_value_t = 6060)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Path prefix of every mock route
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Collect request metrics and serve them on {prefix}/metrics
    #[arg(long)]
    metrics: bool,

    /// Timeout of outbound calls, in seconds
    #[arg(long, default_value_t = 30)]
    outbound_timeout: u64,

    /// Start one server per proxy, on the proxy's own port and prefix
    #[arg(long)]
    compose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let reader = LocalFileReader::new(&args.config);

    // Validate and exit if requested
    if args.validate {
        let config = reader
            .parse()
            .await
            .with_context(|| format!("invalid configuration {}", args.config.display()))?;
        println!(
            "Configuration is valid ({} collections, {} endpoints, {} proxies, {} webhooks)",
            config.collections.len(),
            config.endpoints.len(),
            config.proxies.len(),
            config.webhooks.len()
        );
        return Ok(());
    }

    let options = ServerOptions::default()
        .with_host(args.host)
        .with_port(args.port)
        .with_outbound_timeout(Duration::from_secs(args.outbound_timeout));

    if args.compose {
        let config = reader.parse().await?;
        let mut compose = ComposeServer::start(&config, &options).await?;
        info!(servers = compose.servers().len(), "Compose servers running");

        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C, stopping");
        compose.stop().await?;
        return Ok(());
    }

    let mut server = MockServer::with_options(options);
    if args.metrics {
        server.enable_metrics();
    }
    info!(path = %args.config.display(), "Loading configuration");
    server.start(&reader, &args.prefix).await?;
    info!(port = %server.port(), prefix = %args.prefix, "Mock server running");

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, stopping");
    server.stop().await?;

    Ok(())
}
