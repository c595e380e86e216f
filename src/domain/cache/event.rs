//! Cache events emitted after repository operations

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of operation an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventKind {
    Hit,
    Missed,
    Written,
    WriteFailed,
    Forgotten,
    Flushed,
    Incremented,
    Decremented,
}

impl CacheEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Missed => "missed",
            Self::Written => "written",
            Self::WriteFailed => "write_failed",
            Self::Forgotten => "forgotten",
            Self::Flushed => "flushed",
            Self::Incremented => "incremented",
            Self::Decremented => "decremented",
        }
    }
}

impl fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed cache operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    /// Key as seen by the caller (before any repository prefix)
    pub key: String,
    /// Serialized value involved in the operation, if any
    pub value: Option<String>,
    pub ttl: Option<Duration>,
    pub timestamp: DateTime<Utc>,
}

impl CacheEvent {
    pub fn new(kind: CacheEventKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            value: None,
            ttl: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}
