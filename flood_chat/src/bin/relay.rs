// src/bin/relay.rs
use clap::Parser;
use flood_chat::relay::DEFAULT_RELAY_PORT;
use flood_chat::{MessageStore, Relay};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "flood-relay", author, version, about = "Line relay with message history", long_about = None)]
struct Cli {
    /// The port to listen on
    #[arg(short, long, default_value_t = DEFAULT_RELAY_PORT)]
    port: u16,

    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// sled directory for message history (history disabled if omitted)
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    flood_chat::init_tracing();
    let cli = Cli::parse();

    let store = cli.db.as_deref().map(MessageStore::open).transpose()?;
    let addr = format!("{}:{}", cli.host, cli.port);
    let relay = Relay::bind(&addr, store).await?;
    println!("Starting line relay on {}", relay.local_addr());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to install Ctrl+C handler: {}", e);
                return;
            }
            tracing::info!("shutdown signal received, closing relay...");
            shutdown.cancel();
        });
    }

    relay.run(shutdown).await?;
    Ok(())
}
