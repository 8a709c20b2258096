// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::chart::Chart;
use crate::datasource::DataSource;
use crate::errors::{Error, Result};
use crate::mirror::Mirror;
use crate::registry::BackendRegistry;
use crate::store::{ConfigStore, Resource, entity_key};

/// Create/read/update/delete over datasources and charts, enforcing the
/// invariants that span both mirrors and the backend registry.
///
/// Writes are store-first: they go to the authoritative store and the
/// mirrors catch up through the change-event stream. A read immediately
/// after a write may not observe it yet; that window is the cost of keeping
/// the event stream the single source of truth. Validation for a batch
/// happens before any write, so a rejected batch leaves the store
/// untouched.
#[derive(Clone)]
pub struct Admin {
    store: Arc<dyn ConfigStore>,
    datasources: Arc<Mirror<DataSource>>,
    charts: Arc<Mirror<Chart>>,
    registry: Arc<BackendRegistry>,
}

impl Admin {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        datasources: Arc<Mirror<DataSource>>,
        charts: Arc<Mirror<Chart>>,
        registry: Arc<BackendRegistry>,
    ) -> Self {
        Self {
            store,
            datasources,
            charts,
            registry,
        }
    }

    /// Upserts the given datasources. Every `backend_type` must be
    /// registered; one unknown type rejects the whole batch.
    pub async fn create_datasources(&self, sources: Vec<DataSource>) -> Result<()> {
        for source in &sources {
            if !self.registry.exists(&source.backend_type) {
                return Err(Error::MissingBackend {
                    backend: source.backend_type.clone(),
                });
            }
        }
        for source in &sources {
            self.put_entity(source).await?;
            info!(name = %source.name, backend = %source.backend_type, "datasource stored");
        }
        Ok(())
    }

    pub async fn read_datasources(&self) -> Result<Vec<DataSource>> {
        let (sources, _) = self.datasources.get(None).await?;
        Ok(sources)
    }

    pub async fn datasources_by_name(
        &self,
        names: &[String],
    ) -> Result<(Vec<DataSource>, Vec<String>)> {
        self.datasources.get(Some(names)).await
    }

    /// Full overwrite of an existing datasource.
    pub async fn update_datasource(&self, source: &DataSource) -> Result<()> {
        if !self.datasources.contains(&source.name).await? {
            return Err(Error::NotFound {
                name: source.name.clone(),
            });
        }
        if !self.registry.exists(&source.backend_type) {
            return Err(Error::MissingBackend {
                backend: source.backend_type.clone(),
            });
        }
        self.put_entity(source).await?;
        info!(name = %source.name, "datasource updated");
        Ok(())
    }

    /// Deletes an existing datasource. Charts referencing it are left in
    /// place; opening a session over them reports the missing source.
    pub async fn delete_datasource(&self, source: &DataSource) -> Result<()> {
        if !self.datasources.contains(&source.name).await? {
            return Err(Error::NotFound {
                name: source.name.clone(),
            });
        }
        self.store
            .delete(&entity_key::<DataSource>(&source.name))
            .await?;
        info!(name = %source.name, "datasource deleted");
        Ok(())
    }

    /// Upserts the given charts. Every datasource referenced by any chart
    /// metric must exist; one missing reference rejects the whole batch and
    /// nothing is written.
    pub async fn create_charts(&self, charts: Vec<Chart>) -> Result<()> {
        self.check_datasource_refs(&charts).await?;
        for chart in &charts {
            self.put_entity(chart).await?;
            info!(name = %chart.name, metrics = chart.metrics.len(), "chart stored");
        }
        Ok(())
    }

    pub async fn read_charts(&self) -> Result<Vec<Chart>> {
        let (charts, _) = self.charts.get(None).await?;
        Ok(charts)
    }

    pub async fn charts_by_name(&self, names: &[String]) -> Result<(Vec<Chart>, Vec<String>)> {
        self.charts.get(Some(names)).await
    }

    /// Full overwrite of an existing chart, re-validating its datasource
    /// references.
    pub async fn update_chart(&self, chart: &Chart) -> Result<()> {
        if !self.charts.contains(&chart.name).await? {
            return Err(Error::NotFound {
                name: chart.name.clone(),
            });
        }
        self.check_datasource_refs(std::slice::from_ref(chart)).await?;
        self.put_entity(chart).await?;
        info!(name = %chart.name, "chart updated");
        Ok(())
    }

    pub async fn delete_chart(&self, chart: &Chart) -> Result<()> {
        if !self.charts.contains(&chart.name).await? {
            return Err(Error::NotFound {
                name: chart.name.clone(),
            });
        }
        self.store.delete(&entity_key::<Chart>(&chart.name)).await?;
        info!(name = %chart.name, "chart deleted");
        Ok(())
    }

    /// Names of every backend the registry can build queriers for.
    pub fn backends(&self) -> Vec<String> {
        self.registry.backends()
    }

    async fn put_entity<T: Resource>(&self, entity: &T) -> Result<()> {
        let value = serde_json::to_vec(entity)?;
        self.store.put(&entity_key::<T>(entity.name()), value).await
    }

    async fn check_datasource_refs(&self, charts: &[Chart]) -> Result<()> {
        let names = referenced_datasources(charts);
        let (_, missing) = self.datasources.get(Some(&names)).await?;
        if !missing.is_empty() {
            return Err(Error::MissingDataSources { names: missing });
        }
        Ok(())
    }
}

/// Distinct datasource names referenced by the given charts, sorted.
fn referenced_datasources(charts: &[Chart]) -> Vec<String> {
    let names: BTreeSet<&str> = charts
        .iter()
        .flat_map(|chart| chart.metrics.iter().map(|m| m.datasource_name.as_str()))
        .collect();
    names.into_iter().map(str::to_string).collect()
}
