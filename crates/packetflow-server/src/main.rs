//! `packetflow-server` binary.
//!
//! # Usage
//!
//! ```bash
//! packetflow-server --bind 0.0.0.0:7700
//! packetflow-server --config packetflow.toml
//! ```

use clap::Parser;
use packetflow_core::PermissionLevel;
use packetflow_proto::{Packet, PacketType};
use packetflow_server::{DispatcherBuilder, Listener, RateClass, ServerConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `packetflow-server`: TCP application server framework.
#[derive(Parser, Debug)]
#[command(name = "packetflow-server")]
#[command(about = "Packet-framed TCP application server")]
#[command(version)]
struct Args {
    /// Address to bind to. Overrides `bind_address` from `--config`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Path to a TOML configuration file. Unset fields fall back to
    /// built-in defaults.
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Command id for the built-in echo handler, used by the E1/E2 test
/// scenarios.
const ECHO_COMMAND: u16 = 0x0001;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = match &args.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            ServerConfig::from_toml_str(&contents)?
        },
        None => ServerConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    tracing::info!(bind_address = %config.listener.bind_address, "packetflow-server starting");

    let dispatcher = DispatcherBuilder::new(config.dispatcher.clone())
        .register(ECHO_COMMAND, "echo", PermissionLevel::Guest, false, RateClass::Medium, |packet, _conn| {
            let reply =
                Packet::new(packet.header().id(), packet.header().command(), PacketType::Binary, packet.payload().clone());
            async move { Ok(reply.ok()) }
        })
        .map_err(|err| format!("failed to register built-in handlers: {err}"))?
        .build();

    let listener = Listener::bind(config, dispatcher).await?;
    tracing::info!(local_addr = ?listener.local_addr(), "listening");

    listener.run().await?;

    Ok(())
}
