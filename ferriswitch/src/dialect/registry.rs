//! Dialect registry keyed by dialect name.

use std::sync::Arc;

use indexmap::IndexMap;

use super::definition::Dialect;
use super::vendors;
use crate::error::DialectError;
use crate::transport::DeviceTarget;

/// Registry for dialect definitions.
///
/// An ordinary value, not a process-wide table: each caller builds (or
/// shares) its own. Dialects are handed out as `Arc` so concurrent
/// sessions can hold them without copying.
#[derive(Debug, Clone, Default)]
pub struct DialectRegistry {
    dialects: IndexMap<String, Arc<Dialect>>,
}

impl DialectRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in dialects.
    pub fn builtin() -> Result<Self, DialectError> {
        let mut registry = Self::new();
        registry.register(vendors::tplink_sg::dialect()?)?;
        registry.register(vendors::cisco_ios::dialect()?)?;
        Ok(registry)
    }

    /// Register a dialect definition.
    pub fn register(&mut self, dialect: Dialect) -> Result<(), DialectError> {
        if self.dialects.contains_key(&dialect.name) {
            return Err(DialectError::AlreadyRegistered {
                name: dialect.name.clone(),
            });
        }
        dialect.validate()?;
        self.dialects.insert(dialect.name.clone(), Arc::new(dialect));
        Ok(())
    }

    /// Get a dialect by name.
    pub fn get(&self, name: &str) -> Result<Arc<Dialect>, DialectError> {
        self.dialects
            .get(name)
            .cloned()
            .ok_or_else(|| DialectError::UnknownDialect {
                name: name.to_string(),
            })
    }

    /// Get the dialect a target declares it speaks.
    pub fn for_target(&self, target: &DeviceTarget) -> Result<Arc<Dialect>, DialectError> {
        self.get(&target.dialect)
    }

    /// Check if a dialect is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.dialects.contains_key(name)
    }

    /// List registered dialect names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dialects.keys().map(String::as_str)
    }
}
