use std::time::Duration;

/// Configuration for the socket multiplexer
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Reconnect backoff settings
    pub reconnect: ReconnectConfig,
    /// Buffer capacity of each subscription's broadcast channel.
    /// Slow consumers that fall more than this many events behind skip
    /// ahead instead of blocking frame routing.
    pub channel_capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            channel_capacity: 1024,
        }
    }
}

impl MuxConfig {
    /// Create a new builder for configuration
    pub fn builder() -> MuxConfigBuilder {
        MuxConfigBuilder::default()
    }
}

/// Builder for MuxConfig
#[derive(Debug, Clone, Default)]
pub struct MuxConfigBuilder {
    config: MuxConfig,
}

impl MuxConfigBuilder {
    /// Set reconnect configuration
    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.config.reconnect = config;
        self
    }

    /// Set the per-subscription channel capacity
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Build the configuration with validation.
    pub fn build(self) -> Result<MuxConfig, ConfigError> {
        if self.config.reconnect.base_interval.is_zero() {
            return Err(ConfigError::InvalidReconnect(
                "base_interval must be > 0".to_string(),
            ));
        }

        if let Some(max) = self.config.reconnect.max_delay {
            if max < self.config.reconnect.base_interval {
                return Err(ConfigError::InvalidReconnect(
                    "max_delay must be >= base_interval".to_string(),
                ));
            }
        }

        if self.config.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity(
                "channel_capacity cannot be 0".to_string(),
            ));
        }

        Ok(self.config)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid reconnect configuration
    #[error("Invalid reconnect configuration: {0}")]
    InvalidReconnect(String),
    /// Invalid channel capacity
    #[error("Invalid channel capacity: {0}")]
    InvalidChannelCapacity(String),
}

/// Backoff configuration for reconnection.
///
/// Delay grows linearly: the n-th consecutive attempt waits `n * base_interval`.
/// A successful connection resets the counter.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base interval multiplied by the attempt number
    pub base_interval: Duration,
    /// Optional cap on the computed delay. `None` means the delay grows
    /// unbounded, which matches the behavior this crate was modeled on.
    pub max_delay: Option<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(2),
            max_delay: None,
        }
    }
}

impl ReconnectConfig {
    /// Calculate the delay for a given attempt number (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_interval.saturating_mul(attempt);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
