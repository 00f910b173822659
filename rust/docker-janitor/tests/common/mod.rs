//! Shared fixtures for integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use docker_janitor::naming::DefaultNameParser;
use docker_janitor::ownership::InMemoryRegistry;
use docker_janitor::runtime::{
    ContainerRecord, ContainerRuntime, NetworkFilter, NetworkRecord, RuntimeError,
};
use docker_janitor::AbandonedResourcesCleaner;

pub const WS_KNOWN: &str = "workspace00000000000000aa";
pub const WS_GONE: &str = "workspace00000000000000bb";
pub const MACHINE_KNOWN: &str = "machine00000000000000a1";
pub const MACHINE_GONE: &str = "machine00000000000000b2";

pub fn container_name(workspace_id: &str, machine_id: &str) -> String {
    format!("/{workspace_id}_{machine_id}_dev-machine")
}

pub fn network_name(workspace_id: &str) -> String {
    format!("{workspace_id}_00000000000000ff")
}

/// In-memory docker daemon that records mutating calls as strings.
#[derive(Debug, Default)]
pub struct FakeDocker {
    pub containers: Mutex<Vec<ContainerRecord>>,
    pub networks: Mutex<Vec<NetworkRecord>>,
    pub calls: Mutex<Vec<String>>,
    pub broken_networks: Mutex<HashSet<String>>,
    pub container_listing_down: Mutex<bool>,
}

impl FakeDocker {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl ContainerRuntime for FakeDocker {
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        if *self.container_listing_down.lock() {
            return Err(RuntimeError::Io {
                command: "docker ps".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "daemon down"),
            });
        }
        Ok(self.containers.lock().clone())
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.calls.lock().push(format!("kill {id}"));
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError> {
        self.calls
            .lock()
            .push(format!("rm {id} force={force} volumes={remove_volumes}"));
        self.containers.lock().retain(|c| c.id != id);
        Ok(())
    }

    async fn get_networks(&self, _filter: &NetworkFilter) -> Result<Vec<NetworkRecord>, RuntimeError> {
        Ok(self.networks.lock().clone())
    }

    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError> {
        self.calls.lock().push(format!("network rm {id}"));
        if self.broken_networks.lock().contains(id) {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker network rm {id}"),
                status: "exit status: 1".to_string(),
                stderr: "error while removing network".to_string(),
            });
        }
        Ok(())
    }
}

/// Registry with `WS_KNOWN` running `MACHINE_KNOWN`.
pub fn registry() -> Arc<InMemoryRegistry> {
    let registry = InMemoryRegistry::new();
    registry.register_machine(WS_KNOWN, MACHINE_KNOWN);
    Arc::new(registry)
}

pub fn cleaner(docker: &Arc<FakeDocker>, registry: &Arc<InMemoryRegistry>) -> AbandonedResourcesCleaner {
    AbandonedResourcesCleaner::new(
        Arc::clone(docker) as Arc<dyn ContainerRuntime>,
        Arc::new(DefaultNameParser),
        Arc::clone(registry) as Arc<dyn docker_janitor::ownership::OwnershipOracle>,
    )
}
