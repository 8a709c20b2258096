// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::errors::{Error, Result};

/// Buffer size for watch subscriptions. The initial replay of a prefix and
/// its sync marker must fit in this buffer; `watch` rejects the
/// subscription outright when they do not, rather than hand out a stream
/// that can never finish its sync.
const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// An entity type kept in the config store and mirrored locally.
///
/// `PREFIX` scopes the store keyspace for the type; the full key of an
/// entity is `<PREFIX>/<name>`. Names are unique per type and double as the
/// mirror map key.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const PREFIX: &'static str;

    fn name(&self) -> &str;
}

/// Store key for a named entity of type `T`.
pub fn entity_key<T: Resource>(name: &str) -> String {
    format!("{}/{}", T::PREFIX, name)
}

/// One ordered change observed on a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key was written. `snapshot` marks the first event of a full state
    /// replay: consumers must discard everything they hold before applying
    /// it.
    Put {
        key: String,
        value: Vec<u8>,
        snapshot: bool,
    },
    /// A key was removed. `prev_value` carries the last stored encoding so
    /// consumers can identify the entity without a reverse index.
    Delete { key: String, prev_value: Vec<u8> },
    /// The initial replay is complete; the subscriber now holds a full copy
    /// of the prefix. Sent even when the prefix is empty.
    SyncDone,
}

/// The authoritative configuration store.
///
/// Administrative writes go through `put`/`delete`; mirrors learn of them
/// through the ordered event stream returned by `watch`. Values are the
/// JSON encodings of the entity types.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Subscribes to all keys under `prefix`. The returned stream first
    /// replays the current state (`Put` events, the first flagged
    /// `snapshot`), then a `SyncDone` marker, then live changes in the
    /// order they were committed.
    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>>;
}

struct Subscriber {
    prefix: String,
    tx: mpsc::Sender<WatchEvent>,
}

struct MemState {
    entries: BTreeMap<String, Vec<u8>>,
    subscribers: Vec<Subscriber>,
}

/// In-process [`ConfigStore`] for single-node deployments and tests.
///
/// Watch delivery is ordered because every mutation holds the state lock
/// while fanning out. A subscriber that stops draining its queue is dropped
/// rather than allowed to block writers; in-process consumers drain
/// promptly, so this only fires when a mirror task has died.
pub struct MemStore {
    state: Mutex<MemState>,
    watch_capacity: usize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Queue capacity override, mainly for exercising the slow-subscriber
    /// path in tests.
    pub fn with_watch_capacity(watch_capacity: usize) -> Self {
        Self {
            state: Mutex::new(MemState {
                entries: BTreeMap::new(),
                subscribers: Vec::new(),
            }),
            watch_capacity,
        }
    }

    fn broadcast(state: &mut MemState, key: &str, event: &WatchEvent) {
        state.subscribers.retain(|subscriber| {
            if !key.starts_with(&subscriber.prefix) {
                return true;
            }
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        key,
                        prefix = %subscriber.prefix,
                        "watch queue full, dropping subscriber"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_prefix(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

fn replay_overflow(prefix: &str) -> Error {
    Error::store(std::io::Error::other(format!(
        "initial replay of {prefix} exceeds the watch queue capacity"
    )))
}

#[async_trait]
impl ConfigStore for MemStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.entries.insert(key.to_string(), value.clone());
        let event = WatchEvent::Put {
            key: key.to_string(),
            value,
            snapshot: false,
        };
        Self::broadcast(&mut state, key, &event);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(prev_value) = state.entries.remove(key) {
            let event = WatchEvent::Delete {
                key: key.to_string(),
                prev_value,
            };
            Self::broadcast(&mut state, key, &event);
        }
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>> {
        let prefix = normalize_prefix(prefix);
        let (tx, rx) = mpsc::channel(self.watch_capacity);
        let mut state = self.state.lock().await;

        // a truncated replay would leave the subscriber unsynced forever;
        // fail the subscription instead
        let mut snapshot = true;
        for (key, value) in &state.entries {
            if !key.starts_with(&prefix) {
                continue;
            }
            let event = WatchEvent::Put {
                key: key.clone(),
                value: value.clone(),
                snapshot,
            };
            if tx.try_send(event).is_err() {
                return Err(replay_overflow(&prefix));
            }
            snapshot = false;
        }
        if tx.try_send(WatchEvent::SyncDone).is_err() {
            return Err(replay_overflow(&prefix));
        }

        state.subscribers.push(Subscriber { prefix, tx });
        Ok(rx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::datasource::DataSource;

    #[test]
    fn test_entity_key_shape() {
        assert_eq!(
            entity_key::<DataSource>("prom-main"),
            "/chartstream/datasources/prom-main"
        );
    }

    #[tokio::test]
    async fn test_watch_replays_snapshot_then_live_events() {
        let store = MemStore::new();
        store.put("/t/a", b"1".to_vec()).await.unwrap();
        store.put("/t/b", b"2".to_vec()).await.unwrap();

        let mut events = store.watch("/t").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::Put {
                key: "/t/a".to_string(),
                value: b"1".to_vec(),
                snapshot: true,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::Put {
                key: "/t/b".to_string(),
                value: b"2".to_vec(),
                snapshot: false,
            }
        );
        assert_eq!(events.recv().await.unwrap(), WatchEvent::SyncDone);

        store.put("/t/c", b"3".to_vec()).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::Put {
                key: "/t/c".to_string(),
                value: b"3".to_vec(),
                snapshot: false,
            }
        );

        store.delete("/t/a").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::Delete {
                key: "/t/a".to_string(),
                prev_value: b"1".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn test_watch_empty_prefix_is_sync_done_only() {
        let store = MemStore::new();
        let mut events = store.watch("/empty").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), WatchEvent::SyncDone);
    }

    #[tokio::test]
    async fn test_watch_prefixes_are_isolated() {
        let store = MemStore::new();
        let mut events = store.watch("/charts").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), WatchEvent::SyncDone);

        store.put("/datasources/x", b"ds".to_vec()).await.unwrap();
        store.put("/charts/y", b"c".to_vec()).await.unwrap();

        match events.recv().await.unwrap() {
            WatchEvent::Put { key, .. } => assert_eq!(key, "/charts/y"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watch_does_not_cross_sibling_prefixes() {
        let store = MemStore::new();
        let mut events = store.watch("/t/charts").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), WatchEvent::SyncDone);

        // shares the string prefix but not the path prefix
        store.put("/t/chartstore/x", b"1".to_vec()).await.unwrap();
        store.put("/t/charts/y", b"2".to_vec()).await.unwrap();

        match events.recv().await.unwrap() {
            WatchEvent::Put { key, .. } => assert_eq!(key, "/t/charts/y"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_of_absent_key_emits_nothing() {
        let store = MemStore::new();
        let mut events = store.watch("/t").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), WatchEvent::SyncDone);

        store.delete("/t/ghost").await.unwrap();
        store.put("/t/real", b"1".to_vec()).await.unwrap();

        // the first event after the no-op delete is the put
        match events.recv().await.unwrap() {
            WatchEvent::Put { key, .. } => assert_eq!(key, "/t/real"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watch_rejects_replay_larger_than_capacity() {
        let store = MemStore::with_watch_capacity(2);
        store.put("/t/a", b"1".to_vec()).await.unwrap();
        store.put("/t/b", b"2".to_vec()).await.unwrap();

        // two entries plus the sync marker cannot fit in two slots
        let result = store.watch("/t").await;
        assert!(matches!(result, Err(Error::StoreFailure(_))));

        // a prefix whose replay fits still subscribes
        let mut events = store.watch("/empty").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), WatchEvent::SyncDone);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_dropped() {
        let store = MemStore::with_watch_capacity(1);
        // SyncDone fills the single slot; the next put overflows it.
        let mut events = store.watch("/t").await.unwrap();
        store.put("/t/a", b"1".to_vec()).await.unwrap();
        store.put("/t/b", b"2".to_vec()).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), WatchEvent::SyncDone);
        // subscriber was dropped on overflow, so the stream ends here
        assert_eq!(events.recv().await, None);

        // the store itself keeps serving new subscribers
        let mut fresh = store.watch("/t").await.unwrap();
        match fresh.recv().await.unwrap() {
            WatchEvent::Put { key, snapshot, .. } => {
                assert_eq!(key, "/t/a");
                assert!(snapshot);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
