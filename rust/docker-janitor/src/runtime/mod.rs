//! Container runtime abstraction.
//!
//! The cleaner talks to the runtime only through [`ContainerRuntime`]. Records
//! returned here are snapshots taken for a single reconciliation pass.

pub mod docker_cli;

pub use docker_cli::DockerCli;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A live container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container ID.
    pub id: String,
    /// Container names, with or without the leading `/`.
    pub names: Vec<String>,
    /// Human readable status (e.g. "Up 6 hours", "Exited (0) 2 days ago").
    pub status: String,
    /// Machine readable state (e.g. "running", "exited") when available.
    pub state: Option<String>,
}

impl ContainerRecord {
    /// Create a record without a machine readable state.
    pub fn new(id: impl Into<String>, names: Vec<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            names,
            status: status.into(),
            state: None,
        }
    }

    /// Whether the container is running and must be killed before removal.
    pub fn is_running(&self) -> bool {
        match &self.state {
            Some(state) => state.eq_ignore_ascii_case("running"),
            None => self.status.starts_with("Up"),
        }
    }
}

/// A container attached to a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMember {
    /// Container name.
    pub name: String,
    /// Address inside the network, if assigned.
    pub ipv4_address: Option<String>,
}

/// A live network as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Network ID.
    pub id: String,
    /// Network name.
    pub name: String,
    /// Attached containers keyed by container ID.
    pub containers: HashMap<String, NetworkMember>,
}

impl NetworkRecord {
    /// Create a network record with no attached containers.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            containers: HashMap::new(),
        }
    }

    /// Attach a container (builder style).
    #[must_use]
    pub fn with_container(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.containers.insert(
            id.into(),
            NetworkMember {
                name: name.into(),
                ipv4_address: None,
            },
        );
        self
    }

    /// Whether any container is attached.
    pub fn is_in_use(&self) -> bool {
        !self.containers.is_empty()
    }
}

/// Server-side filter for network listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFilter {
    /// Substring the network name must contain.
    pub name: Option<String>,
    /// Network driver (e.g. "bridge").
    pub driver: Option<String>,
}

impl NetworkFilter {
    /// Filter by name substring.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            driver: None,
        }
    }
}

/// Errors reported by a container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container or network does not exist (any more).
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime rejected the request.
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The runtime could not be reached.
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The runtime did not answer in time.
    #[error("`{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// The runtime answered with something unreadable.
    #[error("unexpected output from `{command}`: {reason}")]
    Parse { command: String, reason: String },
}

impl RuntimeError {
    /// Whether the resource is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Operations the cleaner needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List all containers, running or not.
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError>;

    /// Send SIGKILL to a running container.
    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Remove a container.
    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError>;

    /// List networks with their attached containers.
    async fn get_networks(&self, filter: &NetworkFilter) -> Result<Vec<NetworkRecord>, RuntimeError>;

    /// Remove a network.
    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError>;
}
