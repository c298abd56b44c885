//! `opennote` binary: reads configuration and runs the HTTP server.

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use opennote::{config::Config, run_server};

#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "opennote", version, about = "Chat backend that answers from a user's notes")]
struct Args {
    /// Overrides API_HOST
    #[arg(long)]
    host: Option<String>,

    /// Overrides API_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut cfg = Config::from_env()?;
    if let Some(host) = args.host {
        cfg.api_host = host;
    }
    if let Some(port) = args.port {
        cfg.api_port = port;
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
