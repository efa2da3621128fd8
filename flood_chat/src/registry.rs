// src/registry.rs
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who dialed whom. Only used for logging; the protocol is symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Handle to one live link. Frames pushed through `send` are written by the
/// connection's own writer task, so writes to one peer never interleave.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnId,
    addr: SocketAddr,
    direction: Direction,
    tx: mpsc::Sender<Bytes>,
    closed: CancellationToken,
}

impl PeerHandle {
    pub fn new(
        id: ConnId,
        addr: SocketAddr,
        direction: Direction,
        tx: mpsc::Sender<Bytes>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id,
            addr,
            direction,
            tx,
            closed,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Bytes) -> Result<(), ChatError> {
        if self.is_closed() {
            return Err(ChatError::Disconnected(self.addr));
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ChatError::QueueFull(self.addr),
            TrySendError::Closed(_) => ChatError::Disconnected(self.addr),
        })
    }

    pub(crate) fn close(&self) {
        self.closed.cancel();
    }
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub failed: usize,
}

/// The set of live links.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: Mutex<HashMap<ConnId, PeerHandle>>,
    next_id: AtomicU64,
    shut: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> ConnId {
        ConnId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a link. Refused (and the handle closed) once `close_all` has run.
    pub fn add(&self, handle: PeerHandle) -> bool {
        let mut conns = self.conns.lock();
        if self.shut.load(Ordering::Acquire) {
            drop(conns);
            handle.close();
            return false;
        }
        conns.insert(handle.id, handle);
        true
    }

    /// Remove a link and signal its tasks to close the stream.
    pub fn remove(&self, id: ConnId) -> Option<PeerHandle> {
        let removed = self.conns.lock().remove(&id);
        if let Some(handle) = &removed {
            handle.close();
        }
        removed
    }

    pub fn get(&self, id: ConnId) -> Option<PeerHandle> {
        self.conns.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.conns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<PeerHandle> {
        self.conns.lock().values().cloned().collect()
    }

    /// Run `f` for every link except `excluded`. The callback sees a
    /// point-in-time copy and runs with the lock released.
    pub fn for_each_except<F>(&self, excluded: Option<ConnId>, mut f: F)
    where
        F: FnMut(&PeerHandle),
    {
        let targets: Vec<PeerHandle> = {
            let conns = self.conns.lock();
            conns
                .values()
                .filter(|h| Some(h.id) != excluded)
                .cloned()
                .collect()
        };
        for handle in &targets {
            f(handle);
        }
    }

    /// Best-effort fan-out of one frame. Per-link failures are logged and
    /// counted, never returned.
    pub fn broadcast_except(&self, excluded: Option<ConnId>, frame: &Bytes) -> Delivery {
        let mut delivery = Delivery::default();
        self.for_each_except(excluded, |handle| match handle.send(frame.clone()) {
            Ok(()) => delivery.sent += 1,
            Err(e) => {
                tracing::warn!(conn = %handle.id(), addr = %handle.addr(), "send failed: {}", e);
                delivery.failed += 1;
            }
        });
        delivery
    }

    /// Close every link and refuse new ones. Safe to call more than once.
    pub fn close_all(&self) -> usize {
        let drained: Vec<PeerHandle> = {
            let mut conns = self.conns.lock();
            self.shut.store(true, Ordering::Release);
            conns.drain().map(|(_, h)| h).collect()
        };
        for handle in &drained {
            handle.close();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "closed all connections");
        }
        drained.len()
    }

    pub fn is_shut(&self) -> bool {
        self.shut.load(Ordering::Acquire)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_handle(
        registry: &ConnectionRegistry,
        port: u16,
        queue: usize,
    ) -> (PeerHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(queue);
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let handle = PeerHandle::new(
            registry.next_id(),
            addr,
            Direction::Inbound,
            tx,
            CancellationToken::new(),
        );
        (handle, rx)
    }

    #[test]
    fn add_remove_roundtrip() {
        let reg = ConnectionRegistry::new();
        let (h, _rx) = test_handle(&reg, 1, 4);
        let id = h.id();
        assert!(reg.add(h));
        assert_eq!(reg.len(), 1);
        let removed = reg.remove(id).unwrap();
        assert!(removed.is_closed());
        assert!(reg.is_empty());
        assert!(reg.remove(id).is_none());
    }

    #[test]
    fn broadcast_skips_excluded() {
        let reg = ConnectionRegistry::new();
        let (a, mut rx_a) = test_handle(&reg, 1, 4);
        let (b, mut rx_b) = test_handle(&reg, 2, 4);
        let (c, mut rx_c) = test_handle(&reg, 3, 4);
        let a_id = a.id();
        reg.add(a);
        reg.add(b);
        reg.add(c);

        let d = reg.broadcast_except(Some(a_id), &Bytes::from("x"));
        assert_eq!(d, Delivery { sent: 2, failed: 0 });
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), Bytes::from("x"));
        assert_eq!(rx_c.try_recv().unwrap(), Bytes::from("x"));
    }

    #[test]
    fn one_failing_link_does_not_block_others() {
        let reg = ConnectionRegistry::new();
        let (full, _rx_full) = test_handle(&reg, 1, 1);
        let (dead, rx_dead) = test_handle(&reg, 2, 4);
        let (ok, mut rx_ok) = test_handle(&reg, 3, 4);
        full.send(Bytes::from("fill")).unwrap();
        drop(rx_dead);
        reg.add(full);
        reg.add(dead);
        reg.add(ok);

        let d = reg.broadcast_except(None, &Bytes::from("m"));
        assert_eq!(d, Delivery { sent: 1, failed: 2 });
        assert_eq!(rx_ok.try_recv().unwrap(), Bytes::from("m"));
    }

    #[test]
    fn close_all_is_idempotent_and_refuses_new_links() {
        let reg = ConnectionRegistry::new();
        let (a, _rx_a) = test_handle(&reg, 1, 4);
        let a_probe = a.clone();
        reg.add(a);
        assert_eq!(reg.close_all(), 1);
        assert!(a_probe.is_closed());
        assert_eq!(reg.close_all(), 0);

        let (late, _rx_late) = test_handle(&reg, 2, 4);
        let late_probe = late.clone();
        assert!(!reg.add(late));
        assert!(late_probe.is_closed());
        assert!(reg.is_empty());
    }

    #[test]
    fn for_each_except_tolerates_concurrent_removal() {
        let reg = ConnectionRegistry::new();
        let (a, _rx_a) = test_handle(&reg, 1, 4);
        let (b, _rx_b) = test_handle(&reg, 2, 4);
        let b_id = b.id();
        reg.add(a);
        reg.add(b);

        let mut visited = 0;
        reg.for_each_except(None, |h| {
            // removing from inside the callback must not deadlock
            reg.remove(b_id);
            if h.id() == b_id {
                assert!(h.send(Bytes::from("late")).is_err());
            }
            visited += 1;
        });
        assert_eq!(visited, 2);
        assert_eq!(reg.len(), 1);
    }
}
