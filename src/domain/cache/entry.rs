//! Cache entry stored by every backend

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored value with an optional absolute expiry.
///
/// `expires_at == None` means the entry never expires. Once `expires_at` is
/// in the past the entry is logically absent; stores purge it on the next
/// access instead of running a background sweeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Serialized value
    pub value: String,
    /// Absolute expiration time
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Creates an entry expiring `ttl` from now, or never when `ttl` is `None`
    pub fn new(value: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            expires_at: ttl.map(expiry_from_now),
        }
    }

    /// Creates an entry that never expires
    pub fn forever(value: impl Into<String>) -> Self {
        Self::new(value, None)
    }

    /// Replaces the value while keeping the current expiry
    pub fn with_value(&self, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: self.expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Time left before expiry; `None` for entries that never expire
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at.map(|expires_at| {
            (expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}

fn expiry_from_now(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
