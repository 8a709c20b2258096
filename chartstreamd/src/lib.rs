// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

mod admin;
mod aggregator;
mod chart;
mod datasource;
mod errors;
mod http;
mod metric;
mod mirror;
pub mod prometheus;
mod registry;
mod session;
mod store;

// Re-export the public API
pub use admin::Admin;
pub use aggregator::{DEFAULT_QUERY_TIMEOUT, QueryAggregator, SessionState};
pub use chart::{Chart, ChartMetric, transpose_by_datasource};
pub use datasource::DataSource;
pub use errors::{Error, Result};
pub use http::{AppState, StatusBody, router, serve};
pub use metric::Metric;
pub use mirror::{DEFAULT_READY_TIMEOUT, Mirror};
pub use registry::{BackendRegistry, Querier, QuerierFactory};
pub use session::{MIN_POLL_INTERVAL_SECS, Session, SessionDescriptor, Sessions};
pub use store::{ConfigStore, MemStore, Resource, WatchEvent, entity_key};
