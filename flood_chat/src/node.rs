// src/node.rs
//! A flooding peer: listener, seed connector, local input and shutdown.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use futures::future::join_all;
use futures::{Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{NodeConfig, SeedPeer};
use crate::error::{ChatError, ProtocolError, Result};
use crate::input::{InputCommand, InputExit};
use crate::peer::{spawn_peer, LinkSettings};
use crate::registry::{ConnId, ConnectionRegistry, Direction};
use crate::router::{Dispatch, FloodRouter};
use crate::seen::SeenSet;
use crate::sink::MessageSink;

const MAX_PRUNE_INTERVAL: Duration = Duration::from_secs(30);

pub struct Node {
    config: NodeConfig,
    local_addr: SocketAddr,
    router: FloodRouter,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Node {
    /// Bind the listener, start accepting, then dial every seed once.
    ///
    /// A bind failure is returned: a node that cannot accept peers is not
    /// started at all. Seed failures are only logged.
    pub async fn start(config: NodeConfig, sink: Arc<dyn MessageSink>) -> Result<Self> {
        let seen = match config.seen_retention {
            Some(retention) => SeenSet::with_retention(retention),
            None => SeenSet::new(),
        };
        let router = FloodRouter::new(Arc::new(ConnectionRegistry::new()), Arc::new(seen), sink);

        let bind_addr = config.listen_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ChatError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, nick = %config.nickname, "P2P listener bound");

        let node = Self {
            config,
            local_addr,
            router,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        };

        node.tracker.spawn(accept_loop(
            listener,
            node.router.clone(),
            node.tracker.clone(),
            node.config.link,
            node.shutdown.clone(),
        ));

        if node.router.seen().retention().is_some() {
            node.spawn_seen_pruner();
        }

        let seeds = node.config.seeds.clone();
        join_all(seeds.iter().map(|seed| node.connect_seed(seed))).await;

        Ok(node)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn nickname(&self) -> &str {
        &self.config.nickname
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.router.registry()
    }

    pub fn seen(&self) -> &Arc<SeenSet> {
        self.router.seen()
    }

    pub fn connection_count(&self) -> usize {
        self.router.registry().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// A token that fires when the node starts shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dial one peer and register the link.
    pub async fn connect(&self, addr: &str) -> Result<ConnId> {
        let stream = TcpStream::connect(addr).await.map_err(|source| ChatError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        self.attach(stream, addr)
    }

    fn attach(&self, stream: TcpStream, addr: &str) -> Result<ConnId> {
        let peer_addr = stream.peer_addr().map_err(|source| ChatError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        spawn_peer(
            &self.router,
            &self.tracker,
            stream,
            peer_addr,
            Direction::Outbound,
            &self.config.link,
        )
        .ok_or(ChatError::Disconnected(peer_addr))
    }

    async fn connect_seed(&self, seed: &SeedPeer) -> Option<ConnId> {
        let addr = seed.to_string();
        let result = match self.config.connect_retry {
            None => self.connect(&addr).await,
            Some(window) => self.connect_with_backoff(&addr, window).await,
        };
        match result {
            Ok(id) => {
                tracing::info!(conn = %id, peer = %addr, "connected to peer");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(peer = %addr, "could not connect to peer: {}", e);
                None
            }
        }
    }

    async fn connect_with_backoff(&self, addr: &str, window: Duration) -> Result<ConnId> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(Some(window))
            .build();
        let stream = backoff::future::retry_notify(
            policy,
            || async move {
                if self.shutdown.is_cancelled() {
                    return Err(backoff::Error::permanent(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "node shutting down",
                    )));
                }
                TcpStream::connect(addr).await.map_err(backoff::Error::transient)
            },
            |e: io::Error, wait: Duration| {
                tracing::debug!(peer = %addr, "connect failed ({}); retrying in {:?}", e, wait);
            },
        )
        .await
        .map_err(|source| ChatError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        self.attach(stream, addr)
    }

    fn spawn_seen_pruner(&self) {
        let seen = self.router.seen().clone();
        let shutdown = self.shutdown.clone();
        let Some(retention) = seen.retention() else {
            return;
        };
        let period = retention.min(MAX_PRUNE_INTERVAL).max(Duration::from_millis(10));
        self.tracker.spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let evicted = seen.prune();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = seen.len(), "pruned seen-message set");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Send a line typed by the operator.
    pub fn say(&self, text: &str) -> std::result::Result<Dispatch, ProtocolError> {
        let (_, outcome) = self.router.originate(&self.config.nickname, text)?;
        Ok(outcome)
    }

    /// Consume operator lines until `/quit`, end of input or shutdown.
    pub async fn run_input<S>(&self, mut lines: S) -> Result<InputExit>
    where
        S: Stream<Item = io::Result<String>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(InputExit::Shutdown),
                next = lines.next() => next,
            };
            match next {
                Some(Ok(line)) => match InputCommand::parse(&line) {
                    InputCommand::Quit => {
                        tracing::info!("quit requested");
                        return Ok(InputExit::Quit);
                    }
                    InputCommand::Say(text) => {
                        if let Err(e) = self.say(&text) {
                            tracing::warn!("message not sent: {}", e);
                        }
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!("input read failed: {}", e);
                    return Err(e.into());
                }
                None => return Ok(InputExit::Eof),
            }
        }
    }

    /// Stop accepting, close every link and wait for all tasks to finish.
    /// Calling it again is harmless.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.router.registry().close_all();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(addr = %self.local_addr, "node stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: FloodRouter,
    tracker: TaskTracker,
    link: LinkSettings,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("listener shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::info!(%addr, "incoming connection");
                    spawn_peer(&router, &tracker, stream, addr, Direction::Inbound, &link);
                }
                Err(e) => {
                    tracing::error!("accept failed, listener stopping: {}", e);
                    break;
                }
            },
        }
    }
}
