// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection configuration loaded from environment variables.

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Enforce foreign keys (`PRAGMA foreign_keys`). Seed rows rely on
    /// `ON DELETE CASCADE` to follow their link.
    pub foreign_keys: bool,
    /// How long to wait on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Capacity of the prepared statement cache.
    pub statement_cache_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            foreign_keys: std::env::var("TOPONET_FOREIGN_KEYS")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no"))
                .unwrap_or(true),
            busy_timeout_ms: std::env::var("TOPONET_BUSY_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".into())
                .parse()
                .unwrap_or(5000),
            statement_cache_capacity: std::env::var("TOPONET_STATEMENT_CACHE")
                .unwrap_or_else(|_| "64".into())
                .parse()
                .unwrap_or(64),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
