// src/relay.rs
//! Star-topology line relay.
//!
//! Every line a client sends is fanned out to all other clients and, when a
//! store is attached, appended to it with the client's address as sender.
//! New clients first receive the stored history, oldest first, as
//! `sender: text` lines.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{ChatError, Result};
use crate::peer::{open_link, write_loop, FrameReader, Link, LinkSettings};
use crate::registry::{ConnId, ConnectionRegistry, Direction};
use crate::store::{MessageStore, StoredMessage};

pub const DEFAULT_RELAY_PORT: u16 = 5050;

pub struct Relay {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    store: Option<MessageStore>,
    settings: LinkSettings,
    tracker: TaskTracker,
    // Held while a line is broadcast and stored, and while a new client is
    // registered and handed its history, so every line reaches that client
    // exactly once: live or replayed.
    history_gate: Arc<Mutex<()>>,
}

impl Relay {
    pub async fn bind(addr: &str, store: Option<MessageStore>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| ChatError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, history = store.is_some(), "relay listening");
        Ok(Self {
            listener,
            local_addr,
            registry: Arc::new(ConnectionRegistry::new()),
            store,
            settings: LinkSettings::default(),
            tracker: TaskTracker::new(),
            history_gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Accept clients until `shutdown` fires, then close them all and wait.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tracing::info!(%remote, "relay: client connected");
                        self.admit(stream, remote);
                    }
                    Err(e) => {
                        tracing::error!("relay accept failed: {}", e);
                        break Err(ChatError::Io(e));
                    }
                },
            }
        };
        self.registry.close_all();
        self.tracker.close();
        self.tracker.wait().await;
        if let Some(store) = &self.store {
            if let Err(e) = store.flush().await {
                tracing::warn!("relay: failed to flush history: {}", e);
            }
        }
        tracing::info!("relay stopped");
        outcome
    }

    fn admit(&self, stream: TcpStream, remote: SocketAddr) {
        let (link, history) = {
            let _gate = self.history_gate.lock();
            let Some(link) = open_link(&self.registry, stream, remote, Direction::Inbound, &self.settings) else {
                return;
            };
            (link, self.load_history())
        };
        let Link {
            id,
            addr,
            closed,
            reader,
            mut writer,
            outbound,
        } = link;

        let grace = self.settings.drain_grace;
        let writer_closed = closed.clone();
        self.tracker.spawn(async move {
            // history goes out before anything queued live
            let replay = async {
                for record in history {
                    writer.feed(Bytes::from(history_line(&record))).await?;
                }
                writer.flush().await
            };
            let replayed = tokio::select! {
                replayed = replay => replayed,
                _ = writer_closed.cancelled() => Ok(()),
            };
            if let Err(e) = replayed {
                tracing::warn!(%addr, "relay: history replay failed: {}", e);
                writer_closed.cancel();
                return;
            }
            write_loop(writer, outbound, writer_closed, addr, grace).await;
        });

        self.tracker.spawn(relay_reader(
            self.registry.clone(),
            self.store.clone(),
            self.history_gate.clone(),
            reader,
            id,
            addr,
            closed,
        ));
    }

    fn load_history(&self) -> Vec<StoredMessage> {
        match &self.store {
            Some(store) => store.load_all().unwrap_or_else(|e| {
                tracing::warn!("relay: failed to load history: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        }
    }
}

fn history_line(record: &StoredMessage) -> String {
    format!("{}: {}", record.sender, record.text)
}

async fn relay_reader(
    registry: Arc<ConnectionRegistry>,
    store: Option<MessageStore>,
    history_gate: Arc<Mutex<()>>,
    mut reader: FrameReader,
    id: ConnId,
    addr: SocketAddr,
    closed: CancellationToken,
) {
    let sender = addr.to_string();
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(frame)) => {
                if frame.is_empty() {
                    continue;
                }
                let _gate = history_gate.lock();
                registry.broadcast_except(Some(id), &frame);
                if let Some(store) = &store {
                    let text = String::from_utf8_lossy(&frame);
                    if let Err(e) = store.store(&sender, &text) {
                        tracing::warn!(%addr, "relay: failed to store message: {}", e);
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!(%addr, "relay: read error: {}", e);
                break;
            }
            None => break,
        }
    }
    registry.remove(id);
    tracing::info!(%addr, "relay: client disconnected");
}
