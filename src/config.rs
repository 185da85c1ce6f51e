//! Loop configuration and builder.
//!
//! All queue capacities are fixed at construction time; the loop never grows
//! a queue past its configured size. Use [`LoopBuilder`] rather than filling
//! in [`LoopConfig`] by hand.
//!
//! # Defaults
//!
//! | Field | Default | Meaning |
//! |-------|---------|---------|
//! | `ready_capacity` | 16 | FIFO ready queue entries |
//! | `timed_capacity` | 16 | timed wait queue entries |
//! | `low_priority_capacity` | 0 | low-priority queue entries (0 disables) |
//! | `io_queue_capacity` | 0 | immediate-I/O queue entries (0 disables) |
//! | `max_overdue_ms` | 0 | escalation threshold (0 disables escalation) |

/// Construction-time configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A capacity or threshold combination is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The readiness poller could not be created.
    #[error("poller setup failed: {0}")]
    Poller(#[source] std::io::Error),
}

/// Concrete configuration values for an event loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Capacity of the FIFO ready queue.
    pub ready_capacity: usize,
    /// Capacity of the timed wait queue.
    pub timed_capacity: usize,
    /// Capacity of the low-priority queue; 0 disables the queue.
    pub low_priority_capacity: usize,
    /// Capacity of the immediate-I/O queue; 0 disables immediate-I/O mode.
    pub io_queue_capacity: usize,
    /// Low-priority escalation threshold in milliseconds; 0 disables
    /// escalation (entries are promoted only when nothing else is due).
    pub max_overdue_ms: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            ready_capacity: 16,
            timed_capacity: 16,
            low_priority_capacity: 0,
            io_queue_capacity: 0,
            max_overdue_ms: 0,
        }
    }
}

impl LoopConfig {
    /// Validates cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a required capacity is zero or
    /// `max_overdue_ms` is set without a low-priority queue to act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ready_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ready queue capacity must be non-zero".into(),
            ));
        }
        if self.timed_capacity == 0 {
            return Err(ConfigError::Invalid(
                "timed wait queue capacity must be non-zero".into(),
            ));
        }
        if self.max_overdue_ms > 0 && self.low_priority_capacity == 0 {
            return Err(ConfigError::Invalid(
                "max_overdue_ms requires a low-priority queue".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`LoopConfig`].
#[derive(Debug, Clone, Default)]
pub struct LoopBuilder {
    config: LoopConfig,
}

impl LoopBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ready queue capacity.
    #[must_use]
    pub fn ready_capacity(mut self, n: usize) -> Self {
        self.config.ready_capacity = n;
        self
    }

    /// Sets the timed wait queue capacity.
    #[must_use]
    pub fn timed_capacity(mut self, n: usize) -> Self {
        self.config.timed_capacity = n;
        self
    }

    /// Sets the low-priority queue capacity (0 disables it).
    #[must_use]
    pub fn low_priority_capacity(mut self, n: usize) -> Self {
        self.config.low_priority_capacity = n;
        self
    }

    /// Sets the immediate-I/O queue capacity (0 disables it).
    #[must_use]
    pub fn io_queue_capacity(mut self, n: usize) -> Self {
        self.config.io_queue_capacity = n;
        self
    }

    /// Sets the low-priority escalation threshold in milliseconds.
    #[must_use]
    pub fn max_overdue_ms(mut self, ms: u32) -> Self {
        self.config.max_overdue_ms = ms;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Propagates [`LoopConfig::validate`] failures.
    pub fn build(self) -> Result<LoopConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacities_are_compact() {
        let config = LoopConfig::default();
        assert_eq!(config.ready_capacity, 16);
        assert_eq!(config.timed_capacity, 16);
        assert_eq!(config.low_priority_capacity, 0);
        assert_eq!(config.io_queue_capacity, 0);
        assert_eq!(config.max_overdue_ms, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overdue_threshold_requires_low_priority_queue() {
        let err = LoopBuilder::new().max_overdue_ms(250).build();
        assert!(err.is_err());
        let ok = LoopBuilder::new()
            .max_overdue_ms(250)
            .low_priority_capacity(8)
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn zero_core_capacity_is_rejected() {
        assert!(LoopBuilder::new().ready_capacity(0).build().is_err());
        assert!(LoopBuilder::new().timed_capacity(0).build().is_err());
    }
}
