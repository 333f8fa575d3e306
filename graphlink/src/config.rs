// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Driver configuration
//!
//! - [`Options`]: the per-session / per-transaction / per-query options bundle
//! - [`ClientConfig`]: client-wide settings, loadable from JSON

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Options bundle attached to sessions, transactions and queries.
///
/// Every field is optional; unset fields leave the server default in place.
/// Apart from `call_timeout`, options only change how requests are built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub infer: Option<bool>,
    pub trace_inference: Option<bool>,
    pub explain: Option<bool>,
    pub parallel: Option<bool>,
    pub prefetch: Option<bool>,
    pub prefetch_size: Option<u32>,
    pub session_idle_timeout_millis: Option<u64>,
    pub transaction_timeout_millis: Option<u64>,
    pub schema_lock_acquire_timeout_millis: Option<u64>,
    /// Client-side limit on how long a single call (or a single batch of a
    /// streamed call) may take
    pub call_timeout_millis: Option<u64>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infer(mut self, infer: bool) -> Self {
        self.infer = Some(infer);
        self
    }

    pub fn trace_inference(mut self, trace: bool) -> Self {
        self.trace_inference = Some(trace);
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = Some(explain);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn prefetch_size(mut self, size: u32) -> Self {
        self.prefetch_size = Some(size);
        self
    }

    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout_millis = Some(timeout.as_millis() as u64);
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout_millis = Some(timeout.as_millis() as u64);
        self
    }

    pub fn schema_lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.schema_lock_acquire_timeout_millis = Some(timeout.as_millis() as u64);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_millis = Some(timeout.as_millis() as u64);
        self
    }

    pub fn call_timeout_duration(&self) -> Option<Duration> {
        self.call_timeout_millis.map(Duration::from_millis)
    }

    /// Overlay `other` onto these options: fields set in `other` win.
    pub fn merged_with(&self, other: &Options) -> Options {
        Options {
            infer: other.infer.or(self.infer),
            trace_inference: other.trace_inference.or(self.trace_inference),
            explain: other.explain.or(self.explain),
            parallel: other.parallel.or(self.parallel),
            prefetch: other.prefetch.or(self.prefetch),
            prefetch_size: other.prefetch_size.or(self.prefetch_size),
            session_idle_timeout_millis: other
                .session_idle_timeout_millis
                .or(self.session_idle_timeout_millis),
            transaction_timeout_millis: other
                .transaction_timeout_millis
                .or(self.transaction_timeout_millis),
            schema_lock_acquire_timeout_millis: other
                .schema_lock_acquire_timeout_millis
                .or(self.schema_lock_acquire_timeout_millis),
            call_timeout_millis: other.call_timeout_millis.or(self.call_timeout_millis),
        }
    }
}

/// Default interval between session keep-alive pulses
pub const DEFAULT_PULSE_INTERVAL_MILLIS: u64 = 5_000;

/// Client-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Interval between session pulses; 0 disables pulsing
    pub pulse_interval_millis: u64,
    /// Options applied to every session unless overridden
    pub default_options: Options,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pulse_interval_millis: DEFAULT_PULSE_INTERVAL_MILLIS,
            default_options: Options::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn pulse_interval(&self) -> Option<Duration> {
        match self.pulse_interval_millis {
            0 => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }

    pub fn with_pulse_interval(mut self, interval: Duration) -> Self {
        self.pulse_interval_millis = interval.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_merge_prefers_overlay() {
        let base = Options::new().infer(false).prefetch_size(10);
        let overlay = Options::new().infer(true).explain(true);
        let merged = base.merged_with(&overlay);

        assert_eq!(merged.infer, Some(true));
        assert_eq!(merged.explain, Some(true));
        assert_eq!(merged.prefetch_size, Some(10));
        assert_eq!(merged.parallel, None);
    }

    #[test]
    fn test_call_timeout_roundtrips_through_millis() {
        let options = Options::new().call_timeout(Duration::from_millis(250));
        assert_eq!(options.call_timeout_duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = ClientConfig::from_json(
            r#"{ "pulse_interval_millis": 0, "default_options": { "infer": true } }"#,
        )
        .unwrap();

        assert_eq!(config.pulse_interval(), None);
        assert_eq!(config.default_options.infer, Some(true));
        assert_eq!(config.default_options.prefetch_size, None);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "pulse_interval_millis": 1500 }}"#).unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pulse_interval(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = ClientConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = ClientConfig::from_file("/nonexistent/graphlink.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
