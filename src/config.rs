//! Service configuration.
//!
//! The API key is injected here and handed only to the task client. It is
//! never compiled in and never persisted; natively it may come from
//! `MESHY_API_KEY`, otherwise it is typed into the settings panel.

use std::fmt;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.meshy.ai/openapi/v1";

#[cfg(not(target_arch = "wasm32"))]
pub const API_KEY_ENV: &str = "MESHY_API_KEY";

/// Bearer credential. `Debug` and `Display` are redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Returns `None` for blank input.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Flags forwarded verbatim in the task creation body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationOptions {
    pub enable_pbr: bool,
    pub should_remesh: bool,
    pub should_texture: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { enable_pbr: true, should_remesh: true, should_texture: true }
    }
}

/// Poll cadence and the transient-error budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Consecutive retryable poll failures tolerated before giving up.
    pub max_retries: u32,
    pub max_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_retries: 3,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl PollPolicy {
    /// Delay before the next poll after `failures` consecutive transient errors.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
        self.interval.saturating_mul(factor).min(self.max_backoff.max(self.interval))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: Option<ApiKey>,
    pub options: GenerationOptions,
    pub poll: PollPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            options: GenerationOptions::default(),
            poll: PollPolicy::default(),
        }
    }
}

impl ServiceConfig {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().and_then(ApiKey::new);
        if api_key.is_some() {
            log::info!("API key loaded from {API_KEY_ENV}");
        }
        Self { api_key, ..Self::default() }
    }

    /// Endpoint root without a trailing slash.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}
