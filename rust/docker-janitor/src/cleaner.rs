//! Removal of abandoned workspace containers and networks.
//!
//! One invocation of [`AbandonedResourcesCleaner::run`] performs a container
//! pass and then a network pass. A failing pass is logged and never prevents
//! the other one. Within a pass, failures are isolated per resource.

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::CleanerConfig;
use crate::logging::OpTimer;
use crate::naming::{self, ContainerNameInfo, ContainerNameParser};
use crate::ownership::OwnershipOracle;
use crate::runtime::{ContainerRecord, ContainerRuntime, NetworkFilter, NetworkRecord, RuntimeError};
use crate::scheduler::launcher::panic_message;

/// Network names that are never removed.
///
/// A network is protected when its name appears in at least one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkExclusions {
    groups: Vec<Vec<String>>,
}

impl NetworkExclusions {
    /// Build from configured name groups.
    pub fn new(groups: Vec<Vec<String>>) -> Self {
        Self { groups }
    }

    /// Whether `name` is protected.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.groups
            .iter()
            .any(|group| group.iter().any(|excluded| excluded == name))
    }
}

/// Counters for one cleaner invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Whether removals were only logged.
    pub dry_run: bool,
    pub containers_inspected: usize,
    pub containers_killed: usize,
    pub containers_removed: usize,
    pub networks_inspected: usize,
    pub networks_removed: usize,
    /// Per-resource failures (lookups, kills and removals).
    pub failures: usize,
    /// Passes that could not list their resources.
    pub failed_passes: usize,
}

/// Removes containers and networks whose owner is no longer tracked.
pub struct AbandonedResourcesCleaner {
    runtime: Arc<dyn ContainerRuntime>,
    names: Arc<dyn ContainerNameParser>,
    oracle: Arc<dyn OwnershipOracle>,
    exclusions: NetworkExclusions,
    network_filter: NetworkFilter,
    dry_run: bool,
}

impl fmt::Debug for AbandonedResourcesCleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbandonedResourcesCleaner")
            .field("exclusions", &self.exclusions)
            .field("network_filter", &self.network_filter)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl AbandonedResourcesCleaner {
    /// Create a cleaner with no exclusions and an unfiltered network listing.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        names: Arc<dyn ContainerNameParser>,
        oracle: Arc<dyn OwnershipOracle>,
    ) -> Self {
        Self {
            runtime,
            names,
            oracle,
            exclusions: NetworkExclusions::default(),
            network_filter: NetworkFilter::default(),
            dry_run: false,
        }
    }

    /// Create a cleaner configured from `config`.
    pub fn from_config(
        runtime: Arc<dyn ContainerRuntime>,
        names: Arc<dyn ContainerNameParser>,
        oracle: Arc<dyn OwnershipOracle>,
        config: &CleanerConfig,
    ) -> Self {
        let filter = if config.network_name_filter.is_empty() {
            NetworkFilter::default()
        } else {
            NetworkFilter::by_name(config.network_name_filter.clone())
        };
        Self::new(runtime, names, oracle)
            .with_exclusions(NetworkExclusions::new(config.additional_networks.clone()))
            .with_network_filter(filter)
            .with_dry_run(config.dry_run)
    }

    /// Protect the given network names.
    #[must_use]
    pub fn with_exclusions(mut self, exclusions: NetworkExclusions) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Filter passed to the network listing.
    #[must_use]
    pub fn with_network_filter(mut self, filter: NetworkFilter) -> Self {
        self.network_filter = filter;
        self
    }

    /// Only log what would be removed.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run the container pass, then the network pass.
    pub async fn run(&self) -> CleanupReport {
        let mut report = CleanupReport {
            dry_run: self.dry_run,
            ..CleanupReport::default()
        };

        let timer = OpTimer::new("cleaner", "containers");
        let outcome = AssertUnwindSafe(self.clean_containers(&mut report))
            .catch_unwind()
            .await;
        Self::finish_pass(timer, outcome, &mut report);

        let timer = OpTimer::new("cleaner", "networks");
        let outcome = AssertUnwindSafe(self.clean_networks(&mut report))
            .catch_unwind()
            .await;
        Self::finish_pass(timer, outcome, &mut report);

        info!(
            dry_run = report.dry_run,
            containers_inspected = report.containers_inspected,
            containers_killed = report.containers_killed,
            containers_removed = report.containers_removed,
            networks_inspected = report.networks_inspected,
            networks_removed = report.networks_removed,
            failures = report.failures,
            failed_passes = report.failed_passes,
            "Abandoned resource cleanup finished"
        );
        report
    }

    fn finish_pass(
        timer: OpTimer,
        outcome: std::thread::Result<Result<(), RuntimeError>>,
        report: &mut CleanupReport,
    ) {
        let result = match outcome {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(panic) => Err(format!("pass panicked: {}", panic_message(panic.as_ref()))),
        };
        if result.is_err() {
            report.failed_passes += 1;
        }
        timer.finish_with_result(result.as_ref());
    }

    /// Remove containers whose machine is no longer known.
    ///
    /// Fails only when the container listing fails.
    pub async fn clean_containers(&self, report: &mut CleanupReport) -> Result<(), RuntimeError> {
        let containers = self.runtime.list_containers().await?;
        let mut seen = HashSet::new();

        for container in &containers {
            if !seen.insert(container.id.as_str()) {
                continue;
            }
            report.containers_inspected += 1;

            let Some(info) = container.names.iter().find_map(|name| self.names.parse(name)) else {
                trace!(container_id = %container.id, "Container is not managed, skipping");
                continue;
            };

            match self
                .oracle
                .is_known_machine(&info.workspace_id, &info.machine_id)
                .await
            {
                Ok(true) => {
                    trace!(
                        container_id = %container.id,
                        machine_id = %info.machine_id,
                        "Machine is still known, keeping container"
                    );
                    continue;
                }
                Ok(false) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(
                        container_id = %container.id,
                        workspace_id = %info.workspace_id,
                        machine_id = %info.machine_id,
                        error = %e,
                        "Ownership lookup failed, keeping container"
                    );
                    report.failures += 1;
                    continue;
                }
            }

            if self.dry_run {
                info!(
                    container_id = %container.id,
                    workspace_id = %info.workspace_id,
                    machine_id = %info.machine_id,
                    running = container.is_running(),
                    "Dry run: would remove abandoned container"
                );
                if container.is_running() {
                    report.containers_killed += 1;
                }
                report.containers_removed += 1;
                continue;
            }

            if let Err(e) = self.remove_abandoned_container(container, &info, report).await {
                warn!(
                    container_id = %container.id,
                    workspace_id = %info.workspace_id,
                    machine_id = %info.machine_id,
                    error = %e,
                    "Failed to remove abandoned container"
                );
                report.failures += 1;
            }
        }

        Ok(())
    }

    async fn remove_abandoned_container(
        &self,
        container: &ContainerRecord,
        info: &ContainerNameInfo,
        report: &mut CleanupReport,
    ) -> Result<(), RuntimeError> {
        info!(
            container_id = %container.id,
            workspace_id = %info.workspace_id,
            machine_id = %info.machine_id,
            "Removing abandoned container"
        );

        if container.is_running() {
            match self.runtime.kill_container(&container.id).await {
                Ok(()) => report.containers_killed += 1,
                Err(e) if e.is_not_found() => {
                    debug!(container_id = %container.id, "Container already gone");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        match self.runtime.remove_container(&container.id, true, true).await {
            Ok(()) => {
                report.containers_removed += 1;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(container_id = %container.id, "Container already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove empty managed networks whose workspace has no runtime.
    ///
    /// Fails only when the network listing fails.
    pub async fn clean_networks(&self, report: &mut CleanupReport) -> Result<(), RuntimeError> {
        let networks = self.runtime.get_networks(&self.network_filter).await?;

        let protected: HashSet<&str> = networks
            .iter()
            .filter(|network| self.exclusions.is_excluded(&network.name))
            .map(|network| network.id.as_str())
            .collect();
        let mut handled = HashSet::new();

        for network in &networks {
            report.networks_inspected += 1;

            if protected.contains(network.id.as_str()) {
                debug!(
                    network_id = %network.id,
                    network_name = %network.name,
                    "Network is excluded from cleanup"
                );
                continue;
            }
            let Some(workspace_id) = naming::workspace_id_of_network(&network.name) else {
                trace!(network_id = %network.id, "Network is not managed, skipping");
                continue;
            };
            if network.is_in_use() {
                trace!(
                    network_id = %network.id,
                    containers = network.containers.len(),
                    "Network is in use, keeping"
                );
                continue;
            }
            if !handled.insert(network.id.as_str()) {
                continue;
            }

            match self.oracle.has_runtime(workspace_id).await {
                Ok(true) => {
                    trace!(
                        network_id = %network.id,
                        workspace_id = %workspace_id,
                        "Workspace runtime is registered, keeping network"
                    );
                    continue;
                }
                Ok(false) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(
                        network_id = %network.id,
                        workspace_id = %workspace_id,
                        error = %e,
                        "Ownership lookup failed, keeping network"
                    );
                    report.failures += 1;
                    continue;
                }
            }

            self.remove_abandoned_network(network, workspace_id, report).await;
        }

        Ok(())
    }

    async fn remove_abandoned_network(
        &self,
        network: &NetworkRecord,
        workspace_id: &str,
        report: &mut CleanupReport,
    ) {
        if self.dry_run {
            info!(
                network_id = %network.id,
                network_name = %network.name,
                workspace_id = %workspace_id,
                "Dry run: would remove abandoned network"
            );
            report.networks_removed += 1;
            return;
        }

        info!(
            network_id = %network.id,
            network_name = %network.name,
            workspace_id = %workspace_id,
            "Removing abandoned network"
        );
        match self.runtime.remove_network(&network.id).await {
            Ok(()) => report.networks_removed += 1,
            Err(e) if e.is_not_found() => {
                debug!(network_id = %network.id, "Network already gone");
            }
            Err(e) => {
                warn!(
                    network_id = %network.id,
                    network_name = %network.name,
                    error = %e,
                    "Failed to remove abandoned network"
                );
                report.failures += 1;
            }
        }
    }
}
