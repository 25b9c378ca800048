use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::errors::{Result, TaskError};

/// Scheduler configuration with all tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    // Queue configuration
    /// Maximum number of ticks waiting in the ready queue. Going past it is
    /// treated as a runaway producer and poisons the scheduler.
    pub ready_capacity: usize,
    /// Number of ticks the async driver runs before yielding to the host loop
    pub ticks_per_yield: usize,
    /// Maximum immediate `continue` re-entries of one Repeat within one tick
    pub max_sync_iterations: usize,
    /// Maximum back-to-back iterations of one Repeat that never suspends.
    /// Going past it is a runaway loop and poisons the scheduler.
    pub max_loop_iterations: usize,

    // Diagnostics
    /// Emit a debug event for every step executed
    pub trace: bool,
    /// Pause a task on a failed assertion instead of raising
    pub pause_on_assert: bool,

    // Task defaults
    /// Deadline applied to every root task when it is created
    pub default_deadline: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ready_capacity: 100_000,
            ticks_per_yield: 256,
            max_sync_iterations: 10_000,
            max_loop_iterations: 100_000,
            trace: false,
            pause_on_assert: false,
            default_deadline: None,
        }
    }
}

impl SchedulerConfig {
    /// Create a new builder for SchedulerConfig
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ready_capacity == 0 {
            return Err(TaskError::InvalidConfiguration(
                "ready_capacity must be greater than 0".to_string(),
            ));
        }
        if self.ticks_per_yield == 0 {
            return Err(TaskError::InvalidConfiguration(
                "ticks_per_yield must be greater than 0".to_string(),
            ));
        }
        if self.max_sync_iterations == 0 {
            return Err(TaskError::InvalidConfiguration(
                "max_sync_iterations must be greater than 0".to_string(),
            ));
        }
        if self.max_loop_iterations < self.max_sync_iterations {
            return Err(TaskError::InvalidConfiguration(
                "max_loop_iterations cannot be below max_sync_iterations".to_string(),
            ));
        }
        if let Some(deadline) = self.default_deadline {
            if deadline.is_zero() {
                return Err(TaskError::InvalidConfiguration(
                    "default_deadline cannot be zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Create a configuration for development: step tracing on, small bounds
    /// so runaway loops surface quickly
    pub fn development() -> Self {
        Self {
            ready_capacity: 10_000,
            ticks_per_yield: 32,
            max_sync_iterations: 1_000,
            max_loop_iterations: 10_000,
            trace: true,
            ..Default::default()
        }
    }

    /// Parse a configuration from YAML; missing keys fall back to defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| TaskError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            TaskError::InvalidConfiguration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }
}

/// Builder for SchedulerConfig
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    /// Set ready queue capacity
    pub fn ready_capacity(mut self, capacity: usize) -> Self {
        self.config.ready_capacity = capacity;
        self
    }

    /// Set how many ticks run before yielding to the host
    pub fn ticks_per_yield(mut self, ticks: usize) -> Self {
        self.config.ticks_per_yield = ticks;
        self
    }

    /// Set the bound on immediate loop re-entries
    pub fn max_sync_iterations(mut self, iterations: usize) -> Self {
        self.config.max_sync_iterations = iterations;
        self
    }

    /// Set the bound on iterations of a Repeat that never suspends
    pub fn max_loop_iterations(mut self, iterations: usize) -> Self {
        self.config.max_loop_iterations = iterations;
        self
    }

    /// Enable/disable per-step tracing
    pub fn trace(mut self, enabled: bool) -> Self {
        self.config.trace = enabled;
        self
    }

    /// Enable/disable pausing on failed assertions
    pub fn pause_on_assert(mut self, enabled: bool) -> Self {
        self.config.pause_on_assert = enabled;
        self
    }

    /// Set the default root task deadline
    pub fn default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.config.default_deadline = deadline;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.trace);
    }

    #[test]
    fn test_development_config() {
        let config = SchedulerConfig::development();
        assert!(config.validate().is_ok());
        assert!(config.trace);
        assert_eq!(config.max_sync_iterations, 1_000);
        assert_eq!(config.max_loop_iterations, 10_000);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = SchedulerConfig::default();

        config.ready_capacity = 0;
        assert!(config.validate().is_err());
        config.ready_capacity = 10;

        config.ticks_per_yield = 0;
        assert!(config.validate().is_err());
        config.ticks_per_yield = 1;

        config.max_loop_iterations = config.max_sync_iterations - 1;
        assert!(config.validate().is_err());
        config.max_loop_iterations = config.max_sync_iterations;

        config.default_deadline = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::builder()
            .ready_capacity(500)
            .ticks_per_yield(8)
            .max_sync_iterations(20)
            .max_loop_iterations(50)
            .trace(true)
            .pause_on_assert(true)
            .default_deadline(Some(Duration::from_secs(2)))
            .build()
            .unwrap();

        assert_eq!(config.ready_capacity, 500);
        assert_eq!(config.ticks_per_yield, 8);
        assert_eq!(config.max_sync_iterations, 20);
        assert_eq!(config.max_loop_iterations, 50);
        assert!(config.trace);
        assert!(config.pause_on_assert);
        assert_eq!(config.default_deadline, Some(Duration::from_secs(2)));

        assert!(SchedulerConfig::builder().ready_capacity(0).build().is_err());
    }

    #[test]
    fn test_from_yaml() {
        let config = SchedulerConfig::from_yaml_str("ready_capacity: 64\ntrace: true\n").unwrap();
        assert_eq!(config.ready_capacity, 64);
        assert!(config.trace);
        assert_eq!(config.ticks_per_yield, SchedulerConfig::default().ticks_per_yield);

        let err = SchedulerConfig::from_yaml_str("ready_capacity: 0\n").unwrap_err();
        assert!(matches!(err, TaskError::InvalidConfiguration(_)));

        let err = SchedulerConfig::from_yaml_str("ready_capacity: [1, 2]\n").unwrap_err();
        assert!(matches!(err, TaskError::InvalidConfiguration(_)));
    }
}
