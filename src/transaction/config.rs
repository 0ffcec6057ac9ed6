use crate::core::{MqError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Defaults applied to resource holders created by a transaction manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HolderConfig {
    /// Deadline set on every new holder
    pub default_timeout: Option<Duration>,

    /// Whether new holders start out synchronized with a transaction
    pub synchronized_with_transaction: bool,
}

impl HolderConfig {
    pub fn new() -> Self {
        Self {
            default_timeout: None,
            synchronized_with_transaction: false,
        }
    }

    /// Set the default timeout
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn synchronized_with_transaction(mut self, synchronized: bool) -> Self {
        self.synchronized_with_transaction = synchronized;
        self
    }

    /// Parse from JSON
    ///
    /// Missing fields take their default values. Durations use serde's
    /// `{ "secs": .., "nanos": .. }` form.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rustmemomq::HolderConfig;
    /// let config = HolderConfig::from_json(
    ///     r#"{ "default_timeout": { "secs": 30, "nanos": 0 } }"#
    /// ).unwrap();
    /// assert_eq!(config.default_timeout.unwrap().as_secs(), 30);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.default_timeout {
            if timeout.is_zero() {
                return Err(MqError::InvalidArgument(
                    "default_timeout must be > 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for HolderConfig {
    fn default() -> Self {
        Self::new()
    }
}
