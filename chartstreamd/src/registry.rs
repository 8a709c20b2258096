// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::chart::ChartMetric;
use crate::datasource::DataSource;
use crate::errors::{Error, Result};
use crate::metric::Metric;

/// A live connection to one datasource, executing that source's share of a
/// session's queries.
///
/// One invocation produces zero or more metrics or one error. The engine
/// races the returned future against the session's cancellation token and a
/// per-round timeout and drops it when either fires, so implementations
/// must only await cancel-safe operations and must not block indefinitely.
#[async_trait]
pub trait Querier: Send + Sync {
    /// Name of the datasource this querier is bound to; used to attribute
    /// errors and log lines.
    fn datasource(&self) -> &str;

    async fn query(&self) -> Result<Vec<Metric>>;
}

/// Builds a querier bound to a datasource and the metrics it will serve.
/// Factories receive an owned snapshot of the datasource's state.
pub type QuerierFactory =
    Box<dyn Fn(&DataSource, Vec<ChartMetric>) -> Result<Box<dyn Querier>> + Send + Sync>;

/// Maps backend type names to querier factories.
///
/// Backends register once at startup; afterwards the registry is shared
/// immutably, so lookups take no lock. The registry is a constructed object
/// handed to its consumers, never process-global state.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, QuerierFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: &str, factory: QuerierFactory) -> Result<()> {
        if self.backends.contains_key(backend) {
            return Err(Error::DuplicateBackend {
                backend: backend.to_string(),
            });
        }
        self.backends.insert(backend.to_string(), factory);
        Ok(())
    }

    pub fn exists(&self, backend: &str) -> bool {
        self.backends.contains_key(backend)
    }

    /// Sorted names of every registered backend.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a querier for the datasource's backend type. The factory's
    /// own failures (for instance an unusable connection string) propagate
    /// unchanged.
    pub fn build(&self, source: &DataSource, metrics: Vec<ChartMetric>) -> Result<Box<dyn Querier>> {
        let factory = self
            .backends
            .get(&source.backend_type)
            .ok_or_else(|| Error::MissingBackend {
                backend: source.backend_type.clone(),
            })?;
        factory(source, metrics)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct NullQuerier {
        datasource: String,
    }

    #[async_trait]
    impl Querier for NullQuerier {
        fn datasource(&self) -> &str {
            &self.datasource
        }

        async fn query(&self) -> Result<Vec<Metric>> {
            Ok(Vec::new())
        }
    }

    fn null_factory() -> QuerierFactory {
        Box::new(|source, _metrics| {
            let querier: Box<dyn Querier> = Box::new(NullQuerier {
                datasource: source.name.clone(),
            });
            Ok(querier)
        })
    }

    fn sample_source(backend: &str) -> DataSource {
        DataSource {
            name: "prom-main".to_string(),
            backend_type: backend.to_string(),
            connection_string: "http://localhost:9090".to_string(),
        }
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register("prometheus", null_factory()).unwrap();

        let err = registry
            .register("prometheus", null_factory())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateBackend { backend } if backend == "prometheus"));
    }

    #[test]
    fn test_exists_and_sorted_listing() {
        let mut registry = BackendRegistry::new();
        registry.register("prometheus", null_factory()).unwrap();
        registry.register("graphite", null_factory()).unwrap();

        assert!(registry.exists("prometheus"));
        assert!(!registry.exists("influx"));
        assert_eq!(registry.backends(), vec!["graphite", "prometheus"]);
    }

    #[test]
    fn test_build_unregistered_backend() {
        let registry = BackendRegistry::new();
        let result = registry.build(&sample_source("prometheus"), Vec::new());
        assert!(matches!(result, Err(Error::MissingBackend { backend }) if backend == "prometheus"));
    }

    #[test]
    fn test_build_binds_querier_to_source() {
        let mut registry = BackendRegistry::new();
        registry.register("prometheus", null_factory()).unwrap();

        let querier = registry
            .build(&sample_source("prometheus"), Vec::new())
            .unwrap();
        assert_eq!(querier.datasource(), "prom-main");
    }
}
