//! Recording test doubles for the runtime and the ownership oracle.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ownership::{OracleError, OwnershipOracle};
use crate::runtime::{
    ContainerRecord, ContainerRuntime, NetworkFilter, NetworkRecord, RuntimeError,
};

type RuntimeErrorFactory = Box<dyn Fn() -> RuntimeError + Send + Sync>;
type OracleErrorFactory = Box<dyn Fn() -> OracleError + Send + Sync>;

/// `workspace` followed by 16 hex digits of `n`.
pub fn workspace_id(n: u64) -> String {
    format!("workspace{n:016x}")
}

/// `machine` followed by 16 hex digits of `n`.
pub fn machine_id(n: u64) -> String {
    format!("machine{n:016x}")
}

/// A managed container record.
pub fn container(id: &str, workspace_id: &str, machine_id: &str, status: &str) -> ContainerRecord {
    ContainerRecord::new(
        id,
        vec![format!("/{workspace_id}_{machine_id}_dev-machine")],
        status,
    )
}

/// An empty managed network of `workspace_id`.
pub fn network(id: &str, workspace_id: &str) -> NetworkRecord {
    NetworkRecord::new(id, format!("{workspace_id}_0000000000000000"))
}

/// One call made against [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    ListContainers,
    Kill(String),
    Remove {
        id: String,
        force: bool,
        remove_volumes: bool,
    },
    GetNetworks,
    RemoveNetwork(String),
}

/// Mock implementation of [`ContainerRuntime`] that records every call.
#[derive(Default)]
pub struct MockRuntime {
    containers: Mutex<Vec<ContainerRecord>>,
    networks: Mutex<Vec<NetworkRecord>>,
    calls: Mutex<Vec<RuntimeCall>>,
    list_failure: Mutex<Option<RuntimeErrorFactory>>,
    kill_failures: Mutex<HashMap<String, RuntimeErrorFactory>>,
    remove_failures: Mutex<HashMap<String, RuntimeErrorFactory>>,
    network_remove_failures: Mutex<HashMap<String, RuntimeErrorFactory>>,
}

impl fmt::Debug for MockRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRuntime")
            .field("calls", &*self.calls.lock())
            .finish_non_exhaustive()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&self, container: ContainerRecord) {
        self.containers.lock().push(container);
    }

    pub fn add_network(&self, network: NetworkRecord) {
        self.networks.lock().push(network);
    }

    /// Make `list_containers` fail.
    pub fn fail_listing(&self, error: impl Fn() -> RuntimeError + Send + Sync + 'static) {
        *self.list_failure.lock() = Some(Box::new(error));
    }

    pub fn fail_kill(&self, id: &str, error: impl Fn() -> RuntimeError + Send + Sync + 'static) {
        self.kill_failures.lock().insert(id.to_string(), Box::new(error));
    }

    pub fn fail_remove(&self, id: &str, error: impl Fn() -> RuntimeError + Send + Sync + 'static) {
        self.remove_failures.lock().insert(id.to_string(), Box::new(error));
    }

    pub fn fail_network_remove(
        &self,
        id: &str,
        error: impl Fn() -> RuntimeError + Send + Sync + 'static,
    ) {
        self.network_remove_failures
            .lock()
            .insert(id.to_string(), Box::new(error));
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().push(call);
    }

    fn injected(failures: &Mutex<HashMap<String, RuntimeErrorFactory>>, id: &str) -> Result<(), RuntimeError> {
        match failures.lock().get(id) {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        self.record(RuntimeCall::ListContainers);
        if let Some(error) = &*self.list_failure.lock() {
            return Err(error());
        }
        Ok(self.containers.lock().clone())
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Kill(id.to_string()));
        Self::injected(&self.kill_failures, id)
    }

    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Remove {
            id: id.to_string(),
            force,
            remove_volumes,
        });
        Self::injected(&self.remove_failures, id)?;
        self.containers.lock().retain(|c| c.id != id);
        Ok(())
    }

    async fn get_networks(&self, filter: &NetworkFilter) -> Result<Vec<NetworkRecord>, RuntimeError> {
        self.record(RuntimeCall::GetNetworks);
        Ok(self
            .networks
            .lock()
            .iter()
            .filter(|n| filter.name.as_ref().is_none_or(|name| n.name.contains(name.as_str())))
            .cloned()
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::RemoveNetwork(id.to_string()));
        Self::injected(&self.network_remove_failures, id)
    }
}

/// Mock implementation of [`OwnershipOracle`].
///
/// Unknown machines answer `Ok(false)` unless
/// [`MockOracle::fail_machine_lookups_with_not_found`] was called.
#[derive(Default)]
pub struct MockOracle {
    machines: Mutex<HashSet<(String, String)>>,
    runtimes: Mutex<HashSet<String>>,
    unknown_is_not_found: AtomicBool,
    failure: Mutex<Option<OracleErrorFactory>>,
    machine_lookups: AtomicUsize,
    runtime_lookups: AtomicUsize,
}

impl fmt::Debug for MockOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockOracle")
            .field("machines", &*self.machines.lock())
            .field("runtimes", &*self.runtimes.lock())
            .finish_non_exhaustive()
    }
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn know_machine(&self, workspace_id: &str, machine_id: &str) {
        self.machines
            .lock()
            .insert((workspace_id.to_string(), machine_id.to_string()));
    }

    pub fn register_runtime(&self, workspace_id: &str) {
        self.runtimes.lock().insert(workspace_id.to_string());
    }

    pub fn fail_machine_lookups_with_not_found(&self) {
        self.unknown_is_not_found.store(true, Ordering::SeqCst);
    }

    /// Make every lookup fail.
    pub fn fail_with(&self, error: impl Fn() -> OracleError + Send + Sync + 'static) {
        *self.failure.lock() = Some(Box::new(error));
    }

    pub fn machine_lookups(&self) -> usize {
        self.machine_lookups.load(Ordering::SeqCst)
    }

    pub fn runtime_lookups(&self) -> usize {
        self.runtime_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OwnershipOracle for MockOracle {
    async fn is_known_machine(
        &self,
        workspace_id: &str,
        machine_id: &str,
    ) -> Result<bool, OracleError> {
        self.machine_lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &*self.failure.lock() {
            return Err(error());
        }
        let known = self
            .machines
            .lock()
            .contains(&(workspace_id.to_string(), machine_id.to_string()));
        if !known && self.unknown_is_not_found.load(Ordering::SeqCst) {
            return Err(OracleError::NotFound(machine_id.to_string()));
        }
        Ok(known)
    }

    async fn has_runtime(&self, workspace_id: &str) -> Result<bool, OracleError> {
        self.runtime_lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &*self.failure.lock() {
            return Err(error());
        }
        Ok(self.runtimes.lock().contains(workspace_id))
    }
}
