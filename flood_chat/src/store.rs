// src/store.rs
// sled-backed append-only message log

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: u64,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Keys are big-endian ids from `generate_id`, so a tree scan yields records
/// in insertion order.
///
/// `store` does not fsync. sled flushes in the background; call `flush` before
/// exit to make the tail durable.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<sled::Db>,
}

impl MessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// In-memory store removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn store(&self, sender: &str, text: &str) -> Result<StoredMessage> {
        let record = StoredMessage {
            id: self.db.generate_id()?,
            sender: sender.to_string(),
            timestamp: Utc::now(),
            text: text.to_string(),
        };
        let bytes = serde_json::to_vec(&record)?;
        self.db.insert(record.id.to_be_bytes(), bytes)?;
        Ok(record)
    }

    /// Write every pending record to disk. Returns the number of bytes flushed.
    pub async fn flush(&self) -> Result<usize> {
        Ok(self.db.flush_async().await?)
    }

    pub fn load_all(&self) -> Result<Vec<StoredMessage>> {
        let mut out = Vec::new();
        for item in self.db.iter() {
            let (_key, value) = item?;
            out.push(serde_json::from_slice::<StoredMessage>(&value)?);
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_come_back_in_insertion_order() {
        let store = MessageStore::temporary().unwrap();
        for i in 0..20 {
            store.store("alice", &format!("line {i}")).unwrap();
        }
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 20);
        for (i, rec) in all.iter().enumerate() {
            assert_eq!(rec.text, format!("line {i}"));
        }
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn reopen_keeps_flushed_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat");
        {
            let store = MessageStore::open(&path).unwrap();
            store.store("127.0.0.1:4000", "first").unwrap();
            store.store("127.0.0.1:4001", "second").unwrap();
            store.flush().await.unwrap();
        }
        let store = MessageStore::open(&path).unwrap();
        store.store("127.0.0.1:4000", "third").unwrap();
        let texts: Vec<String> = store.load_all().unwrap().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn empty_store_loads_nothing() {
        let store = MessageStore::temporary().unwrap();
        assert!(store.is_empty());
        assert!(store.load_all().unwrap().is_empty());
    }
}
