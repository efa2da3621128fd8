// src/router.rs
//! Flood-with-dedup dispatch.
//!
//! Every frame, local or remote, goes through the same rule: parse, drop if
//! the id was seen, otherwise record it, display it and forward the original
//! bytes to every link except the one it came from. The seen set is the only
//! thing that stops a message from circling a cycle forever.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::protocol::{excerpt, ChatMessage};
use crate::registry::{ConnId, ConnectionRegistry, Delivery};
use crate::seen::SeenSet;
use crate::sink::MessageSink;

/// Where a frame entered this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Peer(ConnId),
}

impl Source {
    fn excluded(self) -> Option<ConnId> {
        match self {
            Source::Local => None,
            Source::Peer(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// First sighting: displayed once and forwarded.
    Delivered(Delivery),
    /// Already handled; nothing displayed or sent.
    Duplicate,
    /// Unparseable; logged and dropped, never forwarded.
    Malformed(ProtocolError),
}

#[derive(Clone)]
pub struct FloodRouter {
    registry: Arc<ConnectionRegistry>,
    seen: Arc<SeenSet>,
    sink: Arc<dyn MessageSink>,
}

impl FloodRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        seen: Arc<SeenSet>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            registry,
            seen,
            sink,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn seen(&self) -> &Arc<SeenSet> {
        &self.seen
    }

    /// Handle one decoded frame.
    pub fn handle_frame(&self, frame: &str, source: Source) -> Dispatch {
        match ChatMessage::parse(frame) {
            Ok(msg) => self.dispatch(&msg, Bytes::copy_from_slice(frame.as_bytes()), source),
            Err(e) => {
                tracing::warn!(
                    ?source,
                    addr = %self.origin(source),
                    frame = %excerpt(frame, 64),
                    "dropping malformed frame: {}",
                    e
                );
                Dispatch::Malformed(e)
            }
        }
    }

    /// Wrap operator input as a new message and flood it to every link.
    pub fn originate(&self, sender: &str, text: &str) -> Result<(ChatMessage, Dispatch), ProtocolError> {
        let msg = ChatMessage::local(sender, text)?;
        let raw = Bytes::from(msg.encode());
        let outcome = self.dispatch(&msg, raw, Source::Local);
        Ok((msg, outcome))
    }

    /// Remote endpoint of `source`, for logs.
    pub(crate) fn origin(&self, source: Source) -> String {
        match source {
            Source::Local => "local".to_string(),
            Source::Peer(id) => match self.registry.get(id) {
                Some(handle) => handle.addr().to_string(),
                None => format!("{} (closed)", id),
            },
        }
    }

    fn dispatch(&self, msg: &ChatMessage, raw: Bytes, source: Source) -> Dispatch {
        if !self.seen.insert(msg.id()) {
            tracing::trace!(id = %msg.id(), ?source, "duplicate suppressed");
            return Dispatch::Duplicate;
        }
        self.sink.display(msg);
        let delivery = self.registry.broadcast_except(source.excluded(), &raw);
        tracing::debug!(
            id = %msg.id(),
            ?source,
            sent = delivery.sent,
            failed = delivery.failed,
            "flooded message"
        );
        Dispatch::Delivered(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::test_handle;
    use crate::sink::ChannelSink;

    struct Fixture {
        router: FloodRouter,
        shown: tokio::sync::mpsc::UnboundedReceiver<ChatMessage>,
    }

    fn fixture() -> Fixture {
        let (sink, shown) = ChannelSink::new();
        let router = FloodRouter::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(SeenSet::new()),
            Arc::new(sink),
        );
        Fixture { router, shown }
    }

    #[test]
    fn new_message_is_displayed_once_and_sent_to_all_but_source() {
        let mut fx = fixture();
        let reg = fx.router.registry().clone();
        let (src, mut rx_src) = test_handle(&reg, 1, 8);
        let (b, mut rx_b) = test_handle(&reg, 2, 8);
        let (c, mut rx_c) = test_handle(&reg, 3, 8);
        let src_id = src.id();
        reg.add(src);
        reg.add(b);
        reg.add(c);

        let out = fx.router.handle_frame("MSG|id1|alice|hello", Source::Peer(src_id));
        assert_eq!(out, Dispatch::Delivered(Delivery { sent: 2, failed: 0 }));

        let shown = fx.shown.try_recv().unwrap();
        assert_eq!(shown.to_string(), "alice: hello");
        assert!(fx.shown.try_recv().is_err());

        assert!(rx_src.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), Bytes::from("MSG|id1|alice|hello"));
        assert_eq!(rx_c.try_recv().unwrap(), Bytes::from("MSG|id1|alice|hello"));
    }

    #[test]
    fn duplicate_is_neither_displayed_nor_forwarded() {
        let mut fx = fixture();
        let reg = fx.router.registry().clone();
        let (a, _rx_a) = test_handle(&reg, 1, 8);
        let (b, mut rx_b) = test_handle(&reg, 2, 8);
        let a_id = a.id();
        let b_id = b.id();
        reg.add(a);
        reg.add(b);

        fx.router.handle_frame("MSG|dup|alice|hi", Source::Peer(a_id));
        let _ = fx.shown.try_recv().unwrap();
        let _ = rx_b.try_recv().unwrap();

        // same id, different body, different link: still the same message
        let out = fx.router.handle_frame("MSG|dup|mallory|changed", Source::Peer(b_id));
        assert_eq!(out, Dispatch::Duplicate);
        assert!(fx.shown.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn malformed_frame_is_dropped() {
        let mut fx = fixture();
        let reg = fx.router.registry().clone();
        let (a, mut rx_a) = test_handle(&reg, 1, 8);
        reg.add(a);

        let out = fx.router.handle_frame("MSG|onlytwoparts", Source::Local);
        assert_eq!(out, Dispatch::Malformed(ProtocolError::MissingFields(2)));
        assert!(matches!(
            fx.router.handle_frame("PING|x|y|z", Source::Local),
            Dispatch::Malformed(ProtocolError::WrongKind(_))
        ));
        assert!(fx.shown.try_recv().is_err());
        assert!(rx_a.try_recv().is_err());
        assert!(fx.router.seen().is_empty());
    }

    #[test]
    fn origin_names_the_remote_endpoint() {
        let fx = fixture();
        let reg = fx.router.registry().clone();
        let (a, _rx_a) = test_handle(&reg, 4100, 8);
        let a_id = a.id();
        reg.add(a);

        assert_eq!(fx.router.origin(Source::Peer(a_id)), "127.0.0.1:4100");
        assert_eq!(fx.router.origin(Source::Local), "local");
        reg.remove(a_id);
        assert_eq!(fx.router.origin(Source::Peer(a_id)), format!("{} (closed)", a_id));
    }

    #[test]
    fn local_message_goes_everywhere_and_never_echoes() {
        let mut fx = fixture();
        let reg = fx.router.registry().clone();
        let (a, mut rx_a) = test_handle(&reg, 1, 8);
        let (b, mut rx_b) = test_handle(&reg, 2, 8);
        let a_id = a.id();
        reg.add(a);
        reg.add(b);

        let (msg, out) = fx.router.originate("me", "hello all").unwrap();
        assert_eq!(out, Dispatch::Delivered(Delivery { sent: 2, failed: 0 }));
        assert_eq!(fx.shown.try_recv().unwrap(), msg);
        let wire = rx_a.try_recv().unwrap();
        assert_eq!(rx_b.try_recv().unwrap(), wire);

        // a peer bouncing it back changes nothing
        let echoed = String::from_utf8(wire.to_vec()).unwrap();
        assert_eq!(fx.router.handle_frame(&echoed, Source::Peer(a_id)), Dispatch::Duplicate);
        assert!(fx.shown.try_recv().is_err());
    }

    #[test]
    fn originate_with_no_links_still_displays() {
        let mut fx = fixture();
        let (_, out) = fx.router.originate("me", "alone").unwrap();
        assert_eq!(out, Dispatch::Delivered(Delivery::default()));
        assert_eq!(fx.shown.try_recv().unwrap().text(), "alone");
    }
}
