// src/bin/flood-node.rs
use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use flood_chat::config::{prompt_missing, PartialConfig};
use flood_chat::input::{stdin_lines, InputExit};
use flood_chat::{ConsoleSink, MessageSink, MessageStore, Node, NodeConfig, PersistingSink};
use yansi::Paint;

#[derive(Parser, Debug)]
#[command(name = "flood-node", about = "Peer-to-peer flooding chat node", version)]
struct Cli {
    /// Nickname shown next to your messages (prompted if omitted)
    #[arg(short, long, env = "FLOOD_NICK")]
    nick: Option<String>,

    /// P2P listen port (prompted if omitted)
    #[arg(short, long, env = "FLOOD_PORT")]
    port: Option<u16>,

    /// Peers to connect to, comma-separated host:port list
    #[arg(long, env = "FLOOD_PEERS")]
    peers: Option<String>,

    /// Address to bind the listener on
    #[arg(long, env = "FLOOD_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Forget seen message ids after this many seconds (default: never)
    #[arg(long, env = "FLOOD_SEEN_TTL_SECS")]
    seen_ttl_secs: Option<u64>,

    /// Keep retrying unreachable peers for up to this many seconds
    #[arg(long, env = "FLOOD_CONNECT_RETRY_SECS")]
    connect_retry_secs: Option<u64>,

    /// Persist every displayed message to this sled directory
    #[arg(long, env = "FLOOD_HISTORY")]
    history: Option<String>,
}

fn banner(nick: &str, port: u16) {
    println!(
        "{} {}",
        Paint::green("flood-chat").bold(),
        Paint::white("- type a message and press enter, /quit to leave").dimmed()
    );
    println!("{} {} on port {}", Paint::blue("[node]").bold(), nick, port);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    flood_chat::init_tracing();
    let cli = Cli::parse();

    let partial = PartialConfig {
        nickname: cli.nick.clone(),
        listen_port: cli.port,
        peers: cli.peers.clone(),
    };
    let (nickname, port, seeds) = {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut out = io::stdout();
        prompt_missing(partial, &mut input, &mut out)?
    };

    let mut config = NodeConfig::new(nickname, port)
        .with_bind_host(cli.bind.clone())
        .with_seeds(seeds);
    config.seen_retention = cli.seen_ttl_secs.map(Duration::from_secs);
    config.connect_retry = cli.connect_retry_secs.map(Duration::from_secs);

    let validation = config.validate();
    validation.print_summary();
    validation.into_result()?;

    let history = cli.history.as_deref().map(MessageStore::open).transpose()?;
    let console: Arc<dyn MessageSink> = Arc::new(ConsoleSink::new(config.nickname.clone()));
    let sink: Arc<dyn MessageSink> = match &history {
        Some(store) => Arc::new(PersistingSink::new(console, store.clone())),
        None => console,
    };

    banner(&config.nickname, config.listen_port);
    let node = Node::start(config, sink).await?;

    let exit = tokio::select! {
        res = node.run_input(stdin_lines()) => res?,
        _ = tokio::signal::ctrl_c() => InputExit::Shutdown,
    };
    match exit {
        InputExit::Quit | InputExit::Shutdown => println!("{}", Paint::blue("[info] Exiting...")),
        InputExit::Eof => println!("{}", Paint::blue("[info] Input closed, exiting...")),
    }

    node.shutdown().await;
    if let Some(store) = &history {
        store.flush().await?;
    }
    Ok(())
}
