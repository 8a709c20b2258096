// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::{Deserialize, Serialize};

/// A single computed value streamed to a client. Immutable once produced.
///
/// `name` identifies the entity the value belongs to (for the prometheus
/// backend, the `container_name` label of the sample) and is what session
/// entity filters match against. `chart_name` ties the value back to the
/// chart whose query produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub chart_name: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub value: String,
}
