// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Querier for the prometheus HTTP API.
//!
//! A datasource's `connection_string` is the server's base URL; each chart
//! metric's `query` is sent as-is to the instant-query endpoint and the
//! resulting vector samples become [`Metric`]s.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::chart::ChartMetric;
use crate::datasource::DataSource;
use crate::errors::{Error, Result};
use crate::metric::Metric;
use crate::registry::{BackendRegistry, Querier};

/// Backend type name datasources refer to.
pub const BACKEND: &str = "prometheus";

/// Sample label carrying the entity name. Streamed entities are tagged with
/// this label at collection time; samples without it fall back to the chart
/// metric's own name.
const NAME_LABEL: &str = "container_name";

/// Client-side bound per request. The engine's round timeout is the real
/// budget; this only caps requests that outlive their round.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Registers the prometheus backend with the given registry.
pub fn register(registry: &mut BackendRegistry) -> Result<()> {
    registry.register(
        BACKEND,
        Box::new(|source, metrics| {
            let querier: Box<dyn Querier> = Box::new(PrometheusQuerier::new(source, metrics)?);
            Ok(querier)
        }),
    )
}

pub struct PrometheusQuerier {
    datasource: String,
    endpoint: reqwest::Url,
    client: reqwest::Client,
    metrics: Vec<ChartMetric>,
}

impl PrometheusQuerier {
    pub fn new(source: &DataSource, metrics: Vec<ChartMetric>) -> Result<Self> {
        let mut endpoint = reqwest::Url::parse(&source.connection_string).map_err(|error| {
            Error::InvalidConnectionString {
                datasource: source.name.clone(),
                reason: error.to_string(),
            }
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::InvalidConnectionString {
                datasource: source.name.clone(),
                reason: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }
        endpoint.set_path("/api/v1/query");

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| Error::QueryFailure {
                datasource: source.name.clone(),
                reason: error.to_string(),
            })?;

        Ok(Self {
            datasource: source.name.clone(),
            endpoint,
            client,
            metrics,
        })
    }

    async fn query_metric(&self, chart_metric: &ChartMetric) -> Result<Vec<Metric>> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("query", &chart_metric.query);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| self.failure(&error))?;
        let body: QueryResponse = response.json().await.map_err(|error| self.failure(&error))?;

        decode_response(&self.datasource, chart_metric, body)
    }

    fn failure(&self, error: &reqwest::Error) -> Error {
        Error::QueryFailure {
            datasource: self.datasource.clone(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl Querier for PrometheusQuerier {
    fn datasource(&self) -> &str {
        &self.datasource
    }

    async fn query(&self) -> Result<Vec<Metric>> {
        let rounds = self.metrics.iter().map(|metric| self.query_metric(metric));
        let results = futures::future::join_all(rounds).await;

        let mut out = Vec::new();
        for result in results {
            out.extend(result?);
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// `[unix_seconds, "value"]` pair as the API encodes it.
    value: (f64, String),
}

fn decode_response(
    datasource: &str,
    chart_metric: &ChartMetric,
    body: QueryResponse,
) -> Result<Vec<Metric>> {
    if body.status != "success" {
        return Err(Error::QueryFailure {
            datasource: datasource.to_string(),
            reason: format!("query returned status '{}'", body.status),
        });
    }
    let data = body.data.ok_or_else(|| Error::QueryFailure {
        datasource: datasource.to_string(),
        reason: "query response carried no data".to_string(),
    })?;
    if data.result_type != "vector" {
        return Err(Error::QueryFailure {
            datasource: datasource.to_string(),
            reason: format!("expected a vector result, got '{}'", data.result_type),
        });
    }

    Ok(data
        .result
        .into_iter()
        .map(|sample| sample_to_metric(chart_metric, sample))
        .collect())
}

fn sample_to_metric(chart_metric: &ChartMetric, sample: VectorSample) -> Metric {
    let name = sample
        .metric
        .get(NAME_LABEL)
        .cloned()
        .unwrap_or_else(|| chart_metric.name.clone());
    let (timestamp, value) = sample.value;
    Metric {
        name,
        chart_name: chart_metric.chart_name.clone(),
        timestamp: timestamp as i64,
        value,
    }
}
