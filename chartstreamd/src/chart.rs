// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::Resource;

/// One query belonging to a chart, bound to the datasource it runs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartMetric {
    pub name: String,
    pub chart_name: String,
    pub query: String,
    pub datasource_name: String,
}

/// A named grouping of metric queries.
///
/// Every `datasource_name` referenced by the chart's metrics must exist when
/// the chart is created or updated; administration rejects the whole write
/// otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub name: String,
    pub metrics: Vec<ChartMetric>,
}

impl Resource for Chart {
    const PREFIX: &'static str = "/chartstream/charts";

    fn name(&self) -> &str {
        &self.name
    }
}

/// Groups the metrics of the given charts by the datasource they query, so
/// one querier per datasource can serve all charts in a session.
pub fn transpose_by_datasource(charts: &[Chart]) -> HashMap<String, Vec<ChartMetric>> {
    let mut by_source: HashMap<String, Vec<ChartMetric>> = HashMap::new();
    for chart in charts {
        for metric in &chart.metrics {
            by_source
                .entry(metric.datasource_name.clone())
                .or_default()
                .push(metric.clone());
        }
    }
    by_source
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_metric(chart: &str, source: &str, name: &str) -> ChartMetric {
        ChartMetric {
            name: name.to_string(),
            chart_name: chart.to_string(),
            query: format!("rate(container_cpu_usage_seconds_total{{name=\"{name}\"}}[1m])"),
            datasource_name: source.to_string(),
        }
    }

    #[test]
    fn test_chart_round_trip_no_metrics() {
        let chart = Chart {
            name: "empty".to_string(),
            metrics: Vec::new(),
        };
        let encoded = serde_json::to_string(&chart).unwrap();
        let decoded: Chart = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, chart);
    }

    #[test]
    fn test_chart_round_trip_many_metrics() {
        let chart = Chart {
            name: "cpu".to_string(),
            metrics: vec![
                sample_metric("cpu", "prom-east", "user"),
                sample_metric("cpu", "prom-east", "system"),
                sample_metric("cpu", "prom-west", "user"),
            ],
        };
        let encoded = serde_json::to_string(&chart).unwrap();
        let decoded: Chart = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, chart);
    }

    #[test]
    fn test_chart_metric_wire_shape() {
        let metric = sample_metric("cpu", "prom-east", "user");
        let encoded = serde_json::to_value(&metric).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({
                "name": "user",
                "chart_name": "cpu",
                "query": "rate(container_cpu_usage_seconds_total{name=\"user\"}[1m])",
                "datasource_name": "prom-east",
            })
        );
    }

    #[test]
    fn test_transpose_groups_by_datasource() {
        let charts = vec![
            Chart {
                name: "cpu".to_string(),
                metrics: vec![
                    sample_metric("cpu", "prom-east", "user"),
                    sample_metric("cpu", "prom-west", "user"),
                ],
            },
            Chart {
                name: "mem".to_string(),
                metrics: vec![sample_metric("mem", "prom-east", "rss")],
            },
        ];

        let by_source = transpose_by_datasource(&charts);
        assert_eq!(by_source.len(), 2);
        let east = by_source.get("prom-east").unwrap();
        assert_eq!(east.len(), 2);
        assert!(east.iter().any(|m| m.chart_name == "cpu"));
        assert!(east.iter().any(|m| m.chart_name == "mem"));
        assert_eq!(by_source.get("prom-west").unwrap().len(), 1);
    }

    #[test]
    fn test_transpose_empty_input() {
        assert!(transpose_by_datasource(&[]).is_empty());
    }
}
