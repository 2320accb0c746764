//! Environment-style configuration store.
//!
//! Platform setup both reads user overrides from, and fills defaults into, the
//! process environment that NCCL and libfabric consult later. The [`EnvStore`]
//! trait lets that logic run against the real environment or an in-memory map.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{PlatformError, Result};

/// Key/value store with environment-variable semantics.
pub trait EnvStore: Send + Sync {
    /// Get the value of `name`, if set.
    fn get(&self, name: &str) -> Option<String>;

    /// Set `name` to `value`, replacing any existing value.
    fn set(&self, name: &str, value: &str) -> Result<()>;

    /// Whether `name` is set at all.
    fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set `name` only if it is unset. Returns whether a value was written.
    fn set_default(&self, name: &str, value: &str) -> Result<bool> {
        if self.is_set(name) {
            return Ok(false);
        }
        self.set(name, value)?;
        Ok(true)
    }
}

fn validate_assignment(name: &str, value: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "empty variable name"
    } else if name.contains('=') {
        "variable name contains '='"
    } else if name.contains('\0') {
        "variable name contains a NUL byte"
    } else if value.contains('\0') {
        "value contains a NUL byte"
    } else {
        return Ok(());
    };

    Err(PlatformError::Environment {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvStore for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var_os(name).map(|v| v.to_string_lossy().into_owned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        validate_assignment(name, value)?;
        debug!("Setting environment variable {}={}", name, value);
        std::env::set_var(name, value);
        Ok(())
    }
}

/// In-memory environment, used by tests and embedders that stage variables.
#[derive(Debug, Default)]
pub struct MemoryEnv {
    vars: RwLock<HashMap<String, String>>,
}

impl MemoryEnv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `pairs`.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            vars: RwLock::new(vars),
        }
    }

    /// Copy of all variables currently set.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.vars.read().clone()
    }
}

impl EnvStore for MemoryEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.read().get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        validate_assignment(name, value)?;
        self.vars.write().insert(name.to_string(), value.to_string());
        Ok(())
    }
}
