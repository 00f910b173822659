//! Composition root: builds the collaborators from configuration and wires
//! the cleaner into the task launcher.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::cleaner::{AbandonedResourcesCleaner, CleanupReport};
use crate::config::{CleanerConfig, ConfigValidator, JanitorConfig};
use crate::error::JanitorResult;
use crate::naming::{ContainerNameParser, DefaultNameParser};
use crate::ownership::{HttpOwnershipOracle, OwnershipOracle};
use crate::runtime::{ContainerRuntime, DockerCli};
use crate::scheduler::{ScheduleHandle, TaskLauncher, TaskRegistry};

/// Name the cleaner is registered under.
pub const CLEANER_TASK: &str = "abandoned-resources-cleaner";

/// The assembled application.
pub struct Janitor {
    cleaner_config: CleanerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    cleaner: Arc<AbandonedResourcesCleaner>,
}

impl fmt::Debug for Janitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Janitor")
            .field("cleaner_config", &self.cleaner_config)
            .field("cleaner", &self.cleaner)
            .finish_non_exhaustive()
    }
}

impl Janitor {
    /// Validate `config` and build the docker and HTTP backed collaborators.
    pub fn from_config(config: &JanitorConfig) -> JanitorResult<Self> {
        ConfigValidator::validate(config)?;

        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::from_config(&config.docker));
        let oracle: Arc<dyn OwnershipOracle> =
            Arc::new(HttpOwnershipOracle::from_config(&config.oracle)?);

        Ok(Self::with_components(
            &config.cleaner,
            runtime,
            Arc::new(DefaultNameParser),
            oracle,
        ))
    }

    /// Assemble from explicit collaborators.
    pub fn with_components(
        config: &CleanerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        names: Arc<dyn ContainerNameParser>,
        oracle: Arc<dyn OwnershipOracle>,
    ) -> Self {
        let cleaner = AbandonedResourcesCleaner::from_config(
            Arc::clone(&runtime),
            names,
            oracle,
            config,
        );
        Self {
            cleaner_config: config.clone(),
            runtime,
            cleaner: Arc::new(cleaner),
        }
    }

    /// The shared cleaner.
    pub fn cleaner(&self) -> Arc<AbandonedResourcesCleaner> {
        Arc::clone(&self.cleaner)
    }

    /// Check that the container runtime answers. Returns the container count.
    pub async fn preflight(&self) -> JanitorResult<usize> {
        Ok(self.runtime.list_containers().await?.len())
    }

    /// Run one reconciliation immediately.
    pub async fn run_once(&self) -> CleanupReport {
        self.cleaner.run().await
    }

    /// Recurring tasks derived from configuration.
    pub fn registry(&self) -> TaskRegistry {
        let config = &self.cleaner_config;
        if !config.enabled {
            info!("Abandoned resource cleaner is disabled");
            return TaskRegistry::default();
        }

        let cleaner = Arc::clone(&self.cleaner);
        let body = move || {
            let cleaner = Arc::clone(&cleaner);
            async move {
                cleaner.run().await;
            }
        };

        let builder = TaskRegistry::builder();
        let builder = match &config.cron {
            Some(expression) => builder.cron(CLEANER_TASK, expression.clone(), body),
            None => builder.fixed_delay(
                CLEANER_TASK,
                config.initial_delay(),
                config.interval(),
                body,
            ),
        };
        builder.build()
    }

    /// Register every task on `launcher`.
    pub fn start(&self, launcher: &TaskLauncher) -> JanitorResult<Vec<ScheduleHandle>> {
        Ok(self.registry().launch(launcher)?)
    }
}
