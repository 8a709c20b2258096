// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{info, trace};
use uuid::Uuid;

use crate::admin::Admin;
use crate::aggregator::{QueryAggregator, SessionState};
use crate::chart::transpose_by_datasource;
use crate::errors::{Error, Result};
use crate::metric::Metric;
use crate::registry::BackendRegistry;

/// Poll intervals below one second are rejected rather than clamped.
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;

/// Client request to open a streaming session: which charts to poll, which
/// entities to keep, and how often to poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub chart_names: Vec<String>,
    pub entity_names: Vec<String>,
    /// Poll interval in whole seconds.
    pub poll_interval: u64,
    /// RFC 3339 backfill start. Accepted for compatibility; the bundled
    /// backends only serve instant values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
}

impl SessionDescriptor {
    pub fn validate(&self) -> Result<()> {
        if self.chart_names.is_empty() {
            return Err(Error::InvalidDescriptor {
                reason: "chart_names must not be empty".to_string(),
            });
        }
        if self.entity_names.is_empty() {
            return Err(Error::InvalidDescriptor {
                reason: "entity_names must not be empty".to_string(),
            });
        }
        if self.poll_interval < MIN_POLL_INTERVAL_SECS {
            return Err(Error::InvalidDescriptor {
                reason: format!("poll_interval must be at least {MIN_POLL_INTERVAL_SECS}s"),
            });
        }
        if self.fill.is_some() {
            self.fill_time()?;
        }
        Ok(())
    }

    pub fn fill_time(&self) -> Result<Option<DateTime<FixedOffset>>> {
        match &self.fill {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(Some)
                .map_err(|err| Error::InvalidDescriptor {
                    reason: format!("fill is not a valid RFC 3339 timestamp: {err}"),
                }),
        }
    }
}

/// Builds running sessions out of descriptors. Resolution happens at open
/// time against the mirrors; later chart or datasource edits do not touch
/// sessions that are already streaming.
#[derive(Clone)]
pub struct Sessions {
    admin: Admin,
    registry: Arc<BackendRegistry>,
    query_timeout: Duration,
}

impl Sessions {
    pub fn new(admin: Admin, registry: Arc<BackendRegistry>, query_timeout: Duration) -> Self {
        Self {
            admin,
            registry,
            query_timeout,
        }
    }

    /// Resolves the descriptor's charts to queriers, one per referenced
    /// datasource, and starts the polling engine. Any unknown chart or
    /// datasource fails the whole open.
    pub async fn open(&self, descriptor: &SessionDescriptor) -> Result<Session> {
        descriptor.validate()?;

        let (charts, missing) = self.admin.charts_by_name(&descriptor.chart_names).await?;
        if let Some(name) = missing.first() {
            return Err(Error::NotFound { name: name.clone() });
        }

        let by_datasource = transpose_by_datasource(&charts);
        let mut source_names: Vec<String> = by_datasource.keys().cloned().collect();
        source_names.sort();

        let (sources, missing) = self.admin.datasources_by_name(&source_names).await?;
        if !missing.is_empty() {
            return Err(Error::MissingDataSources { names: missing });
        }

        let mut queriers = Vec::with_capacity(sources.len());
        for source in &sources {
            let metrics = by_datasource.get(&source.name).cloned().unwrap_or_default();
            let querier = self.registry.build(source, metrics)?;
            queriers.push(Arc::from(querier));
        }

        let id = Uuid::new_v4().to_string();
        let mut aggregator = QueryAggregator::new(
            &id,
            queriers,
            Duration::from_secs(descriptor.poll_interval),
            self.query_timeout,
        );
        aggregator.start()?;
        info!(
            session = %id,
            charts = descriptor.chart_names.len(),
            entities = descriptor.entity_names.len(),
            "session opened"
        );

        Ok(Session {
            id,
            entities: descriptor.entity_names.iter().cloned().collect(),
            aggregator,
        })
    }
}

/// A running streaming session. Dropping it cancels the engine.
pub struct Session {
    id: String,
    entities: HashSet<String>,
    aggregator: QueryAggregator,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next metric whose name is in the session's entity set. Metrics for
    /// other entities are dropped here rather than shipped to the client.
    pub async fn recv(&mut self) -> Result<Metric> {
        loop {
            let metric = self.aggregator.recv().await?;
            if self.entities.contains(&metric.name) {
                return Ok(metric);
            }
            trace!(session = %self.id, entity = %metric.name, "metric outside entity set, skipped");
        }
    }

    pub fn cancel(&self) {
        self.aggregator.cancel();
    }

    pub fn dropped(&self) -> u64 {
        self.aggregator.dropped()
    }

    pub fn state(&self) -> SessionState {
        self.aggregator.state()
    }
}
