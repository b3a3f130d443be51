//! Marvel MCP Server
//!
//! Serves the Marvel catalog over the Model Context Protocol.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use marvel_mcp::catalog;
use marvel_mcp::config::{Args, Config, Transport};
use marvel_mcp::error::Result;
use marvel_mcp::mcp::transport::StdioTransport;
use marvel_mcp::metrics;
use marvel_mcp::VERSION;

fn init_logging(config: &Config) {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries protocol frames on the stdio transport.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring .env file: {}", e);
        }
    }

    let args = Args::parse();
    let config = Config::load(args)?;
    init_logging(&config);

    info!("Marvel MCP Server v{}", VERSION);
    info!("Data directory: {:?}", config.data_dir);
    info!("Transport: {:?}", config.transport);

    let metrics_handle = if config.metrics {
        let handle = metrics::install_prometheus()?;
        info!("Prometheus metrics enabled");
        Some(handle)
    } else {
        None
    };

    let server = catalog::build_server(&config)?;

    match config.transport {
        Transport::Stdio => {
            if let Some(port) = config.admin_port {
                let admin_config = config.clone();
                let admin_server = server.clone();
                let handle = metrics_handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = marvel_mcp::http::start_admin_server(
                        &admin_config,
                        port,
                        admin_server,
                        handle,
                    )
                    .await
                    {
                        error!("Admin server failed: {}", e);
                    }
                });
            }

            info!("Starting stdio transport...");
            let transport = StdioTransport::stdio()
                .with_capacity(config.channel_capacity)
                .with_send_timeout(config.send_timeout());
            server.run(transport).await?;
        }
        Transport::Http => {
            info!("Starting HTTP transport on {}...", config.bind_addr());
            marvel_mcp::http::start_server(&config, server, metrics_handle).await?;
        }
    }

    Ok(())
}
