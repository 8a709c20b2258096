// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::metric::Metric;
use crate::registry::Querier;

/// Bound on the metric and error queues between the round tasks and the
/// consumer. A full queue drops the newest item rather than holding a round
/// open; a streaming client that lags gets fresh values, not a backlog.
const QUEUE_CAPACITY: usize = 1024;

/// Per-querier bound on one round's execution.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built, not yet scheduled.
    Created,
    /// Rounds are being scheduled.
    Running,
    /// Token fired; no further rounds.
    Cancelled,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Running) | (Created, Cancelled) | (Running, Cancelled)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Running => write!(f, "running"),
            SessionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything the scheduling task takes ownership of when it launches.
struct Launch {
    queriers: Vec<Arc<dyn Querier>>,
    metrics_tx: mpsc::Sender<Metric>,
    errors_tx: mpsc::Sender<Error>,
}

/// Fan-out/fan-in query execution for one client session.
///
/// Once started, the engine runs an immediate round and then one round per
/// poll interval: each round spawns a task per querier, bounds it with the
/// query timeout, and awaits every task before the next tick is considered,
/// so rounds never overlap. Query results and failures land on bounded
/// queues drained through [`recv`](Self::recv); a failing querier costs the
/// session one error per round, never the session itself. Only cancellation
/// stops the engine.
pub struct QueryAggregator {
    session: String,
    interval: Duration,
    query_timeout: Duration,
    launch: Option<Launch>,
    metrics_rx: mpsc::Receiver<Metric>,
    errors_rx: mpsc::Receiver<Error>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

impl QueryAggregator {
    pub fn new(
        session: &str,
        queriers: Vec<Arc<dyn Querier>>,
        interval: Duration,
        query_timeout: Duration,
    ) -> Self {
        Self::with_capacity(session, queriers, interval, query_timeout, QUEUE_CAPACITY)
    }

    /// Queue capacity override, mainly for exercising backpressure in
    /// tests.
    pub fn with_capacity(
        session: &str,
        queriers: Vec<Arc<dyn Querier>>,
        interval: Duration,
        query_timeout: Duration,
        capacity: usize,
    ) -> Self {
        let (metrics_tx, metrics_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(capacity);
        Self {
            session: session.to_string(),
            interval,
            query_timeout,
            launch: Some(Launch {
                queriers,
                metrics_tx,
                errors_tx,
            }),
            metrics_rx,
            errors_rx,
            cancel: CancellationToken::new(),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            SessionState::Cancelled
        } else if self.launch.is_none() {
            SessionState::Running
        } else {
            SessionState::Created
        }
    }

    /// Launches the scheduling task. The first round begins immediately.
    pub fn start(&mut self) -> Result<()> {
        let from = self.state();
        if !from.can_transition_to(SessionState::Running) {
            return Err(Error::InvalidTransition {
                from,
                to: SessionState::Running,
            });
        }
        let Some(launch) = self.launch.take() else {
            return Err(Error::InvalidTransition {
                from,
                to: SessionState::Running,
            });
        };
        let rounds = Rounds {
            session: self.session.clone(),
            queriers: launch.queriers,
            query_timeout: self.query_timeout,
            metrics_tx: launch.metrics_tx,
            errors_tx: launch.errors_tx,
            cancel: self.cancel.clone(),
            dropped: Arc::clone(&self.dropped),
        };
        debug!(session = %self.session, interval = ?self.interval, "starting aggregation");
        tokio::spawn(rounds.run(self.interval));
        Ok(())
    }

    /// Next item for this session: a metric, a round failure as `Err`, or
    /// [`Error::Cancelled`] once the token has fired. After cancellation
    /// this always reports `Cancelled`, even if items are still queued.
    pub async fn recv(&mut self) -> Result<Metric> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            Some(metric) = self.metrics_rx.recv() => Ok(metric),
            Some(error) = self.errors_rx.recv() => Err(error),
            else => Err(Error::Cancelled),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Total items dropped to full queues since the session began.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for QueryAggregator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The scheduling half of the engine, owned by the spawned task.
struct Rounds {
    session: String,
    queriers: Vec<Arc<dyn Querier>>,
    query_timeout: Duration,
    metrics_tx: mpsc::Sender<Metric>,
    errors_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

impl Rounds {
    async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // the first tick completes immediately; cancellation wins any
            // race against it
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(session = %self.session, "aggregation cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.round().await;
        }
    }

    /// One fan-out round. Returns only after every per-querier task has
    /// finished, which is what keeps rounds from overlapping.
    async fn round(&self) {
        let mut tasks = Vec::with_capacity(self.queriers.len());
        for querier in &self.queriers {
            let querier = Arc::clone(querier);
            let session = self.session.clone();
            let query_timeout = self.query_timeout;
            let metrics_tx = self.metrics_tx.clone();
            let errors_tx = self.errors_tx.clone();
            let cancel = self.cancel.clone();
            let dropped = Arc::clone(&self.dropped);
            tasks.push(tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    outcome = tokio::time::timeout(query_timeout, querier.query()) => outcome,
                };
                let failure = match outcome {
                    Err(_) => Some(Error::QueryTimeout {
                        datasource: querier.datasource().to_string(),
                    }),
                    Ok(Err(error)) => Some(error),
                    Ok(Ok(metrics)) => {
                        for metric in metrics {
                            if metrics_tx.try_send(metric).is_err() {
                                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                                warn!(
                                    session = %session,
                                    datasource = querier.datasource(),
                                    total,
                                    "metric queue full, dropping metric"
                                );
                            }
                        }
                        None
                    }
                };
                if let Some(error) = failure {
                    if errors_tx.try_send(error).is_err() {
                        let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            session = %session,
                            datasource = querier.datasource(),
                            total,
                            "error queue full, dropping query error"
                        );
                    }
                }
            }));
        }
        for task in tasks {
            if let Err(error) = task.await {
                warn!(session = %self.session, %error, "querier task failed");
            }
        }
    }
}
