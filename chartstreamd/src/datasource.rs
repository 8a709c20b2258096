// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::{Deserialize, Serialize};

use crate::store::Resource;

/// A named connection to a metrics backend.
///
/// `backend_type` must match a name registered with the
/// [`BackendRegistry`](crate::BackendRegistry) before a session can query
/// this source. Querier factories receive an owned snapshot of the source,
/// so a DataSource is effectively immutable once a session is built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    pub backend_type: String,
    pub connection_string: String,
}

impl Resource for DataSource {
    const PREFIX: &'static str = "/chartstream/datasources";

    fn name(&self) -> &str {
        &self.name
    }
}
