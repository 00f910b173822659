//! Ownership oracle: which machines and workspace runtimes are still tracked.

pub mod http;

pub use http::HttpOwnershipOracle;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

/// Errors reported by an [`OwnershipOracle`].
#[derive(Debug, Error)]
pub enum OracleError {
    /// The workspace or machine is unknown. Treated as "not tracked".
    #[error("not found: {0}")]
    NotFound(String),

    /// The oracle could not be reached.
    #[error("ownership oracle unavailable: {0}")]
    Unavailable(String),

    /// The oracle answered with something unexpected.
    #[error("unexpected ownership oracle response: {0}")]
    Unexpected(String),
}

impl OracleError {
    /// Whether this is the normal "unowned" signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Answers whether runtime resources still belong to something tracked.
#[async_trait]
pub trait OwnershipOracle: Send + Sync {
    /// Whether `machine_id` of `workspace_id` is currently known.
    async fn is_known_machine(&self, workspace_id: &str, machine_id: &str)
    -> Result<bool, OracleError>;

    /// Whether a runtime is currently registered for `workspace_id`.
    async fn has_runtime(&self, workspace_id: &str) -> Result<bool, OracleError>;
}

/// In-process registry of running workspaces and their machines.
///
/// Unknown machines of a known workspace answer `Ok(false)`; machines of an
/// unknown workspace answer [`OracleError::NotFound`].
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    workspaces: RwLock<HashMap<String, HashSet<String>>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a workspace runtime as registered.
    pub fn register_workspace(&self, workspace_id: impl Into<String>) {
        self.workspaces.write().entry(workspace_id.into()).or_default();
    }

    /// Register a machine, registering its workspace if needed.
    pub fn register_machine(&self, workspace_id: impl Into<String>, machine_id: impl Into<String>) {
        self.workspaces
            .write()
            .entry(workspace_id.into())
            .or_default()
            .insert(machine_id.into());
    }

    /// Forget a machine. Returns whether it was registered.
    pub fn remove_machine(&self, workspace_id: &str, machine_id: &str) -> bool {
        self.workspaces
            .write()
            .get_mut(workspace_id)
            .is_some_and(|machines| machines.remove(machine_id))
    }

    /// Forget a workspace and all of its machines.
    pub fn remove_workspace(&self, workspace_id: &str) -> bool {
        self.workspaces.write().remove(workspace_id).is_some()
    }
}

#[async_trait]
impl OwnershipOracle for InMemoryRegistry {
    async fn is_known_machine(
        &self,
        workspace_id: &str,
        machine_id: &str,
    ) -> Result<bool, OracleError> {
        self.workspaces.read().get(workspace_id).map_or_else(
            || Err(OracleError::NotFound(format!("workspace {workspace_id}"))),
            |machines| Ok(machines.contains(machine_id)),
        )
    }

    async fn has_runtime(&self, workspace_id: &str) -> Result<bool, OracleError> {
        Ok(self.workspaces.read().contains_key(workspace_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_registry() {
        let registry = InMemoryRegistry::new();
        registry.register_machine("ws1", "m1");
        registry.register_workspace("ws2");

        assert!(registry.is_known_machine("ws1", "m1").await.unwrap());
        assert!(!registry.is_known_machine("ws1", "m2").await.unwrap());
        assert!(registry.has_runtime("ws2").await.unwrap());
        assert!(!registry.has_runtime("ws3").await.unwrap());

        let err = registry.is_known_machine("ws3", "m1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_removal() {
        let registry = InMemoryRegistry::new();
        registry.register_machine("ws1", "m1");

        assert!(registry.remove_machine("ws1", "m1"));
        assert!(!registry.remove_machine("ws1", "m1"));
        assert!(registry.has_runtime("ws1").await.unwrap());

        assert!(registry.remove_workspace("ws1"));
        assert!(!registry.has_runtime("ws1").await.unwrap());
    }
}
