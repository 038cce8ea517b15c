//! qzigd - qzig mesh bridge daemon
//!
//! Connects the Zigbee radio and the remote JSON-RPC server, publishes the
//! device tree and keeps both sides in sync until interrupted or until the
//! server goes away.
//!
//! Usage:
//!   qzigd [OPTIONS] [config.toml]
//!
//! Without a config file the mock radio and `localhost:21005` are used.

mod config;

use anyhow::Context;
use qzig_bridge::Bridge;
use qzig_core::radio::create_radio;
use qzig_core::{Store, ValueRegistry};
use qzig_rpc::{outbound_queue, RpcConnection};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Parsed command-line arguments
struct Args {
    /// Daemon config file (TOML)
    config_path: Option<String>,
    /// Overrides `[network] id`
    network_id: Option<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        config_path: None,
        network_id: None,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--network" | "-n" => {
                if i + 1 < args.len() {
                    result.network_id = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    tracing::error!("Missing argument for --network");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                result.config_path = Some(arg.to_string());
                i += 1;
            }
            _ => {
                tracing::warn!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"qzigd - qzig mesh bridge daemon

Usage: qzigd [OPTIONS] [config.toml]

Options:
  -n, --network <id>  Network id on the remote server
  -h, --help          Print this help message

Examples:
  # Mock radio, server on localhost:21005
  qzigd

  # Serial coordinator from a config file
  qzigd /etc/qzig/qzigd.toml
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "qzigd=info,qzig_bridge=info,qzig_rpc=info,qzig_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting qzigd");

    let args = parse_args();
    let mut config = match &args.config_path {
        Some(path) => {
            tracing::info!("Loading config from: {}", path);
            Config::load(path)?
        }
        None => {
            tracing::info!("No config file provided, using mock radio");
            Config::default()
        }
    };
    if args.network_id.is_some() {
        config.network.id = args.network_id;
    }

    let store = Store::new(&config.store.root);
    let network_id = config.network_id(&store);
    tracing::info!(network = %network_id, store = %store.root().display(), "Network");

    let radio = create_radio(&config.radio.driver).context("Failed to create radio")?;
    let (client, queue) = outbound_queue();
    let bridge = Bridge::new(
        config.bridge_config(network_id),
        store,
        radio,
        ValueRegistry::standard(),
        client,
    );

    let addr = config.rpc.addr();
    let (radio_ready, conn) = tokio::join!(
        bridge.connect_radio(),
        RpcConnection::connect(&addr, queue, bridge.handler(), config.rpc.options()),
    );
    radio_ready.context("Failed to connect to the radio")?;
    let conn = conn.with_context(|| format!("Failed to connect to {}", addr))?;
    tracing::info!("Connected to {}", addr);

    bridge.start().await.context("Startup failed")?;
    tracing::info!("qzigd is live");

    let lost = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!("Shutting down");
            false
        }
        _ = conn.closed() => {
            tracing::error!("Connection to the server lost");
            true
        }
    };

    bridge.shutdown();
    conn.close();

    if lost {
        anyhow::bail!("Connection to {} lost", addr);
    }
    Ok(())
}
