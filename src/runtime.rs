use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::{
    config::{self, RuntimeConfig},
    exception::{self, ExceptionClass},
    fault::{FaultKind, RuntimeError},
    memory::{self, Allocator},
};

/// Process-wide runtime setup.
///
/// Collects configuration, the collector hooks and the host exception classes,
/// then installs them all at once. A host calls this once before running
/// generated code; anything left unset keeps its built-in default.
pub struct Runtime {
    config: RuntimeConfig,
    allocator: Option<Arc<dyn Allocator>>,
    classes: Vec<(FaultKind, ExceptionClass)>,
}

impl Runtime {
    pub fn new() -> Self {
        Runtime {
            config: RuntimeConfig::DEFAULT,
            allocator: None,
            classes: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// A later class for the same kind replaces an earlier one.
    pub fn with_exception_class(mut self, kind: FaultKind, class: ExceptionClass) -> Self {
        self.classes.retain(|(k, _)| *k != kind);
        self.classes.push((kind, class));
        self
    }

    /// Install everything. The config is validated first, so a rejected
    /// config leaves all process-wide state untouched.
    pub fn install(self) -> Result<(), RuntimeError> {
        let max_allocation_bytes = self.config.max_allocation_bytes;
        config::install_runtime_config(self.config)?;
        match self.allocator {
            Some(allocator) => memory::install_allocator(allocator),
            None => memory::reset_allocator(),
        }
        for kind in FaultKind::ALL {
            match self.classes.iter().find(|(k, _)| *k == kind) {
                Some((_, class)) => exception::install_exception_class(kind, *class),
                None => exception::reset_exception_class(kind),
            }
        }
        info!(
            allocator = memory::allocator_name(),
            max_allocation_bytes,
            "runtime installed"
        );
        Ok(())
    }

    /// Restore every process-wide hook to its built-in default.
    pub fn reset() {
        config::reset_runtime_config();
        memory::reset_allocator();
        for kind in FaultKind::ALL {
            exception::reset_exception_class(kind);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("allocator", &self.allocator.as_ref().map(|a| a.name()))
            .field("classes", &self.classes)
            .finish()
    }
}
