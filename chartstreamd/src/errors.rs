// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use thiserror::Error;

use crate::aggregator::SessionState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no such entity: {name}")]
    NotFound { name: String },

    #[error("charts reference unknown datasources: {}", names.join(", "))]
    MissingDataSources { names: Vec<String> },

    #[error("backend '{backend}' is not registered")]
    MissingBackend { backend: String },

    #[error("backend '{backend}' is already registered")]
    DuplicateBackend { backend: String },

    #[error("datasource '{datasource}' has an unusable connection string: {reason}")]
    InvalidConnectionString { datasource: String, reason: String },

    #[error("config store failure")]
    StoreFailure(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("resource mirror has not completed its initial sync")]
    NotReady,

    #[error("query against datasource '{datasource}' timed out")]
    QueryTimeout { datasource: String },

    #[error("query against datasource '{datasource}' failed: {reason}")]
    QueryFailure { datasource: String, reason: String },

    #[error("invalid session descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("invalid session state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("session cancelled")]
    Cancelled,

    #[error("could not encode or decode an entity: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wraps an underlying store I/O error. Store failures are surfaced to
    /// the caller as-is, never retried.
    pub fn store<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::StoreFailure(Box::new(cause))
    }
}
