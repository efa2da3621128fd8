// src/sink.rs
use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;
use yansi::Paint;

use crate::protocol::ChatMessage;
use crate::store::MessageStore;

/// Where accepted messages are shown to the local user.
pub trait MessageSink: Send + Sync {
    fn display(&self, msg: &ChatMessage);
}

/// Prints `sender: text` lines to stdout.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    own_nick: String,
}

impl ConsoleSink {
    pub fn new(own_nick: impl Into<String>) -> Self {
        Self {
            own_nick: own_nick.into(),
        }
    }
}

impl MessageSink for ConsoleSink {
    fn display(&self, msg: &ChatMessage) {
        let name = if msg.sender() == self.own_nick {
            Paint::green(msg.sender()).bold()
        } else {
            Paint::cyan(msg.sender()).bold()
        };
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let _ = writeln!(out, "{}: {}", name, msg.text());
        let _ = out.flush();
    }
}

/// Hands every displayed message to a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChatMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageSink for ChannelSink {
    fn display(&self, msg: &ChatMessage) {
        let _ = self.tx.send(msg.clone());
    }
}

/// Displays through `inner` and appends the message to a store.
pub struct PersistingSink {
    inner: Arc<dyn MessageSink>,
    store: MessageStore,
}

impl PersistingSink {
    pub fn new(inner: Arc<dyn MessageSink>, store: MessageStore) -> Self {
        Self { inner, store }
    }
}

impl MessageSink for PersistingSink {
    fn display(&self, msg: &ChatMessage) {
        self.inner.display(msg);
        if let Err(e) = self.store.store(msg.sender(), msg.text()) {
            tracing::warn!(id = %msg.id(), "failed to persist message: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisting_sink_tees_to_store() {
        let (chan, mut rx) = ChannelSink::new();
        let store = MessageStore::temporary().unwrap();
        let sink = PersistingSink::new(Arc::new(chan), store.clone());

        let msg = ChatMessage::new("id1", "alice", "hello").unwrap();
        sink.display(&msg);

        assert_eq!(rx.try_recv().unwrap(), msg);
        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sender, "alice");
        assert_eq!(records[0].text, "hello");
    }
}
