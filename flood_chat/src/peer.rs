// src/peer.rs
// Per-connection tasks: one reader feeding the router, one writer draining
// the link's outbound queue.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::codec::FrameCodec;
use crate::protocol::excerpt;
use crate::registry::{ConnId, ConnectionRegistry, Direction, PeerHandle};
use crate::router::{FloodRouter, Source};

pub(crate) type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;
pub(crate) type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Limits shared by every link a node or relay opens.
#[derive(Debug, Clone, Copy)]
pub struct LinkSettings {
    pub outbound_queue: usize,
    pub max_frame_len: usize,
    /// How long a closing link may spend flushing frames already queued.
    pub drain_grace: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            max_frame_len: crate::codec::DEFAULT_MAX_FRAME_LEN,
            drain_grace: Duration::from_secs(2),
        }
    }
}

/// A registered stream, split and framed, whose tasks are not running yet.
pub(crate) struct Link {
    pub id: ConnId,
    pub addr: SocketAddr,
    pub closed: CancellationToken,
    pub reader: FrameReader,
    pub writer: FrameWriter,
    pub outbound: mpsc::Receiver<Bytes>,
}

/// Register `stream` and frame both halves. Returns `None` if the registry
/// is already shut, in which case the stream is dropped.
pub(crate) fn open_link(
    registry: &ConnectionRegistry,
    stream: TcpStream,
    addr: SocketAddr,
    direction: Direction,
    settings: &LinkSettings,
) -> Option<Link> {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%addr, "set_nodelay failed: {}", e);
    }
    let id = registry.next_id();
    let (tx, outbound) = mpsc::channel(settings.outbound_queue);
    let closed = CancellationToken::new();
    let handle = PeerHandle::new(id, addr, direction, tx, closed.clone());
    if !registry.add(handle) {
        tracing::warn!(%addr, "registry closed; dropping {} connection", direction);
        return None;
    }
    tracing::info!(conn = %id, %addr, "{} connection registered", direction);

    let (read_half, write_half) = stream.into_split();
    Some(Link {
        id,
        addr,
        closed,
        reader: FramedRead::new(read_half, FrameCodec::with_max_len(settings.max_frame_len)),
        writer: FramedWrite::new(write_half, FrameCodec::new()),
        outbound,
    })
}

/// Register a peer stream and start its reader and writer on `tracker`.
pub(crate) fn spawn_peer(
    router: &FloodRouter,
    tracker: &TaskTracker,
    stream: TcpStream,
    addr: SocketAddr,
    direction: Direction,
    settings: &LinkSettings,
) -> Option<ConnId> {
    let link = open_link(router.registry(), stream, addr, direction, settings)?;
    let id = link.id;
    tracker.spawn(write_loop(
        link.writer,
        link.outbound,
        link.closed.clone(),
        link.addr,
        settings.drain_grace,
    ));
    tracker.spawn(receive_loop(router.clone(), link.reader, link.id, link.addr, link.closed));
    Some(id)
}

/// Read frames until EOF, error or close, handing each one to the router.
/// The link is removed from the registry on the way out.
pub(crate) async fn receive_loop(
    router: FloodRouter,
    mut reader: FrameReader,
    id: ConnId,
    addr: SocketAddr,
    closed: CancellationToken,
) {
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
                match std::str::from_utf8(&frame) {
                    Ok(line) => {
                        router.handle_frame(line, Source::Peer(id));
                    }
                    Err(_) => {
                        let lossy = String::from_utf8_lossy(&frame);
                        tracing::warn!(conn = %id, %addr, frame = %excerpt(&lossy, 64), "dropping non utf-8 frame");
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!(conn = %id, %addr, "read error: {}", e);
                break;
            }
            None => {
                tracing::info!(conn = %id, %addr, "peer closed connection");
                break;
            }
        }
    }
    router.registry().remove(id);
    tracing::debug!(conn = %id, %addr, "receive loop ended");
}

/// Drain the outbound queue into the socket. Once the link is closed, frames
/// already queued get `grace` to go out before the write half is shut down.
/// A write stalled on a peer that stopped reading is abandoned on close.
pub(crate) async fn write_loop(
    mut writer: FrameWriter,
    mut outbound: mpsc::Receiver<Bytes>,
    closed: CancellationToken,
    addr: SocketAddr,
    grace: Duration,
) {
    loop {
        let frame = tokio::select! {
            biased;
            maybe = outbound.recv() => match maybe {
                Some(frame) => frame,
                None => break,
            },
            _ = closed.cancelled() => break,
        };
        let sent = tokio::select! {
            sent = writer.send(frame) => sent,
            _ = closed.cancelled() => break,
        };
        if let Err(e) = sent {
            tracing::warn!(%addr, "write failed: {}", e);
            closed.cancel();
            return;
        }
    }

    if closed.is_cancelled() {
        outbound.close();
        let drain = async {
            while let Some(frame) = outbound.recv().await {
                writer.feed(frame).await?;
            }
            writer.flush().await
        };
        match timeout(grace, drain).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(%addr, "drain on close failed: {}", e),
            Err(_) => tracing::debug!(%addr, "drain on close timed out"),
        }
    }
    if timeout(grace, writer.close()).await.is_err() {
        tracing::debug!(%addr, "shutdown of write half timed out");
    }
}
