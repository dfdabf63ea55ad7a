//! Session manager configuration.

use std::time::Duration;

use folio_core::DocumentId;
use serde::Deserialize;

use crate::error::SessionError;
use crate::hydration::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sync server endpoint; `None` runs every document local-only
    pub endpoint: Option<String>,
    /// Replicas kept in the cache, the active one included (default: 5)
    pub max_cached_replicas: usize,
    /// Upper bound on opening the connection of a switch (default: 10s)
    pub switch_timeout_ms: u64,
    /// Delay between accepting a switch and tearing down the previous session
    pub switch_debounce_ms: u64,
    pub hydration_max_attempts: u32,
    pub hydration_base_delay_ms: u64,
    pub hydration_max_delay_ms: u64,
    /// Prefix of the browser-visible location of a document
    pub location_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_cached_replicas: 5,
            switch_timeout_ms: 10_000,
            switch_debounce_ms: 50,
            hydration_max_attempts: 5,
            hydration_base_delay_ms: 50,
            hydration_max_delay_ms: 1_000,
            location_prefix: "/notes/".to_string(),
        }
    }
}

impl SessionConfig {
    /// Create config for testing (no debounce, short timeouts).
    pub fn for_testing(endpoint: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.map(str::to_string),
            max_cached_replicas: 5,
            switch_timeout_ms: 2_000,
            switch_debounce_ms: 0,
            hydration_max_attempts: 4,
            hydration_base_delay_ms: 5,
            hydration_max_delay_ms: 40,
            location_prefix: "/notes/".to_string(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_cached_replicas == 0 {
            return Err(SessionError::Config("max_cached_replicas must be at least 1".into()));
        }
        if self.hydration_max_attempts == 0 {
            return Err(SessionError::Config("hydration_max_attempts must be at least 1".into()));
        }
        if self.endpoint.as_deref().is_some_and(str::is_empty) {
            return Err(SessionError::Config("endpoint must not be empty".into()));
        }
        Ok(())
    }

    pub fn switch_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_timeout_ms)
    }

    pub fn switch_debounce(&self) -> Duration {
        Duration::from_millis(self.switch_debounce_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.hydration_max_attempts,
            base_delay: Duration::from_millis(self.hydration_base_delay_ms),
            max_delay: Duration::from_millis(self.hydration_max_delay_ms),
        }
    }

    pub fn location_for(&self, id: &DocumentId) -> String {
        format!("{}{}", self.location_prefix, id)
    }
}
