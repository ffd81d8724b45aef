// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for the query cache engine

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::hooks::HookPoint;

/// Failure reported by a user-supplied fetch or mutation function.
///
/// Stored on the entry until the next successful settle, so it must survive
/// snapshots and is therefore plain serializable data.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a machine-readable code (used by retry predicates)
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(format!("Fetch timed out after {:?}", after)).with_code("timeout")
    }

    pub fn is_timeout(&self) -> bool {
        self.code.as_deref() == Some("timeout")
    }
}

impl From<String> for FetchError {
    fn from(message: String) -> Self {
        FetchError::new(message)
    }
}

impl From<&str> for FetchError {
    fn from(message: &str) -> Self {
        FetchError::new(message)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::new(err.to_string()).with_code("serialization")
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::new(err.to_string()).with_code("io")
    }
}

/// Engine error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Plugin '{plugin}' failed during {point}: {message}")]
    PluginCallback {
        plugin: String,
        point: HookPoint,
        message: String,
    },

    #[error("Fetch was cancelled")]
    Cancelled,

    #[error("No query function registered for key {0}")]
    MissingQueryFn(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persist(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl QueryError {
    /// The fetch failure carried by this error, if any
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            QueryError::Fetch(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for QueryError {
    fn from(err: std::io::Error) -> Self {
        QueryError::Persist(err.to_string())
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
