//! Process-wide runtime configuration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::debug;

use crate::fault::RuntimeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Largest single request the allocation entry points accept.
    pub max_allocation_bytes: usize,
    /// Capacity of each thread's shadow stack used by `stack_alloc`.
    pub shadow_stack_bytes: usize,
    /// Zero-fill shadow stack allocations before handing them out.
    pub zero_stack_allocations: bool,
}

impl RuntimeConfig {
    pub const DEFAULT: RuntimeConfig = RuntimeConfig {
        max_allocation_bytes: 256 * 1024 * 1024,
        shadow_stack_bytes: 1024 * 1024,
        zero_stack_allocations: true,
    };

    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_allocation_bytes == 0 {
            return Err(RuntimeError::InvalidConfig(
                "max_allocation_bytes must be greater than zero",
            ));
        }
        if self.max_allocation_bytes > isize::MAX as usize {
            return Err(RuntimeError::InvalidConfig(
                "max_allocation_bytes must not exceed isize::MAX",
            ));
        }
        if self.shadow_stack_bytes == 0 {
            return Err(RuntimeError::InvalidConfig(
                "shadow_stack_bytes must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfigBuilder {
    inner: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn new() -> Self {
        Self {
            inner: RuntimeConfig::default(),
        }
    }

    pub fn max_allocation_bytes(mut self, bytes: usize) -> Self {
        self.inner.max_allocation_bytes = bytes;
        self
    }

    pub fn shadow_stack_bytes(mut self, bytes: usize) -> Self {
        self.inner.shadow_stack_bytes = bytes;
        self
    }

    pub fn zero_stack_allocations(mut self, enabled: bool) -> Self {
        self.inner.zero_stack_allocations = enabled;
        self
    }

    pub fn build(self) -> Result<RuntimeConfig, RuntimeError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

impl Default for RuntimeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

static CONFIG: RwLock<RuntimeConfig> = RwLock::new(RuntimeConfig::DEFAULT);
static GENERATION: AtomicU64 = AtomicU64::new(0);

pub fn install_runtime_config(config: RuntimeConfig) -> Result<(), RuntimeError> {
    config.validate()?;
    {
        let mut guard = CONFIG.write().unwrap_or_else(|e| e.into_inner());
        *guard = config;
    }
    let generation = GENERATION.fetch_add(1, Ordering::AcqRel) + 1;
    debug!(generation, "installed runtime config");
    Ok(())
}

/// Snapshot of the active configuration.
pub fn runtime_config() -> RuntimeConfig {
    CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Bumped on every successful install.
pub fn runtime_config_generation() -> u64 {
    GENERATION.load(Ordering::Acquire)
}

pub fn reset_runtime_config() {
    // Defaults always validate.
    let _ = install_runtime_config(RuntimeConfig::DEFAULT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_lock::runtime_test_guard;

    #[test]
    fn builder_rejects_zero_limits() {
        assert_eq!(
            RuntimeConfig::builder().max_allocation_bytes(0).build(),
            Err(RuntimeError::InvalidConfig(
                "max_allocation_bytes must be greater than zero"
            ))
        );
        assert!(RuntimeConfig::builder().shadow_stack_bytes(0).build().is_err());
    }

    #[test]
    fn install_bumps_generation() {
        let _guard = runtime_test_guard();
        let before = runtime_config_generation();
        let config = RuntimeConfig::builder()
            .max_allocation_bytes(4096)
            .zero_stack_allocations(false)
            .build()
            .unwrap();
        install_runtime_config(config.clone()).unwrap();
        assert_eq!(runtime_config(), config);
        assert!(runtime_config_generation() > before);
        reset_runtime_config();
        assert_eq!(runtime_config(), RuntimeConfig::default());
    }

    #[test]
    fn invalid_install_keeps_previous_config() {
        let _guard = runtime_test_guard();
        let bad = RuntimeConfig {
            shadow_stack_bytes: 0,
            ..RuntimeConfig::default()
        };
        assert!(install_runtime_config(bad).is_err());
        assert_eq!(runtime_config(), RuntimeConfig::default());
    }
}
