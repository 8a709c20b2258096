// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::errors::{Error, Result};
use crate::store::{ConfigStore, Resource, WatchEvent};

/// How long accessors wait for the initial sync before giving up.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

type State<T> = Arc<RwLock<HashMap<String, T>>>;

/// A name-indexed local copy of one entity type, kept consistent with the
/// authoritative store through its ordered change-event stream.
///
/// The consumer task spawned at start is the sole mutator; everything else
/// reads through accessors that return owned clones. Accessors block until
/// the stream has replayed the initial state, bounded by the ready timeout,
/// and fail with [`Error::NotReady`] rather than serve a partial view.
///
/// Administrative writes never touch the mirror directly. They go to the
/// store, and the mirror observes them on the event stream; until it does,
/// reads are stale by at most the event delivery delay.
pub struct Mirror<T: Resource> {
    state: State<T>,
    ready: watch::Receiver<bool>,
    ready_timeout: Duration,
    consumer: JoinHandle<()>,
}

impl<T: Resource> Mirror<T> {
    /// Subscribes to the store prefix for `T` and starts the consumer task.
    pub async fn start(store: &dyn ConfigStore, ready_timeout: Duration) -> Result<Self> {
        let events = store.watch(T::PREFIX).await?;
        Ok(Self::with_events(events, ready_timeout))
    }

    pub(crate) fn with_events(
        events: mpsc::Receiver<WatchEvent>,
        ready_timeout: Duration,
    ) -> Self {
        let state: State<T> = Arc::new(RwLock::new(HashMap::new()));
        let (ready_tx, ready) = watch::channel(false);
        let consumer = tokio::spawn(consume::<T>(events, Arc::clone(&state), ready_tx));
        Self {
            state,
            ready,
            ready_timeout,
            consumer,
        }
    }

    /// Retrieves entities by name.
    ///
    /// `None` returns everything currently mirrored. Otherwise the first
    /// element holds the entities that were found and the second the
    /// requested names that were not.
    pub async fn get(&self, names: Option<&[String]>) -> Result<(Vec<T>, Vec<String>)> {
        self.await_ready().await?;
        let map = self.state.read().await;
        match names {
            None => Ok((map.values().cloned().collect(), Vec::new())),
            Some(names) => {
                let mut found = Vec::with_capacity(names.len());
                let mut missing = Vec::new();
                for name in names {
                    match map.get(name) {
                        Some(entity) => found.push(entity.clone()),
                        None => missing.push(name.clone()),
                    }
                }
                Ok((found, missing))
            }
        }
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        self.await_ready().await?;
        Ok(self.state.read().await.contains_key(name))
    }

    async fn await_ready(&self) -> Result<()> {
        if *self.ready.borrow() {
            return Ok(());
        }
        let mut ready = self.ready.clone();
        match tokio::time::timeout(self.ready_timeout, ready.wait_for(|synced| *synced)).await {
            Ok(Ok(_)) => Ok(()),
            // timed out, or the consumer died before the sync marker
            _ => Err(Error::NotReady),
        }
    }
}

impl<T: Resource> Drop for Mirror<T> {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

async fn consume<T: Resource>(
    mut events: mpsc::Receiver<WatchEvent>,
    state: State<T>,
    ready: watch::Sender<bool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            WatchEvent::SyncDone => {
                debug!(prefix = T::PREFIX, "initial sync complete");
                let _ = ready.send(true);
            }
            other => apply::<T>(&state, other).await,
        }
    }
    // closing before the sync marker leaves the mirror NotReady for good
    if *ready.borrow() {
        debug!(prefix = T::PREFIX, "change event stream closed");
    } else {
        warn!(prefix = T::PREFIX, "change event stream closed before initial sync");
    }
}

/// Applies one change event to the mirrored map.
///
/// Events arrive strictly ordered. A snapshot-flagged put empties the map
/// before its own payload lands, so nothing stale survives a full replay.
/// Undecodable payloads are logged and skipped; the subscription stays up.
async fn apply<T: Resource>(state: &RwLock<HashMap<String, T>>, event: WatchEvent) {
    match event {
        WatchEvent::Put {
            key,
            value,
            snapshot,
        } => {
            let mut map = state.write().await;
            // an undecodable payload must not cancel the replay's reset
            if snapshot {
                map.clear();
            }
            match serde_json::from_slice::<T>(&value) {
                Ok(entity) => {
                    debug!(key, "applied put event");
                    map.insert(entity.name().to_string(), entity);
                }
                Err(error) => {
                    error!(key, %error, "skipping put event with undecodable value");
                }
            }
        }
        WatchEvent::Delete { key, prev_value } => {
            match serde_json::from_slice::<T>(&prev_value) {
                Ok(entity) => {
                    state.write().await.remove(entity.name());
                    debug!(key, "applied delete event");
                }
                Err(error) => {
                    error!(key, %error, "skipping delete event with undecodable previous value");
                }
            }
        }
        WatchEvent::SyncDone => {}
    }
}
