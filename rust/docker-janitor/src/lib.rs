//! docker-janitor - Scheduled Reconciler for Workspace Containers
//!
//! This crate removes Docker containers and networks that were created for
//! workspaces the workspace master no longer tracks. It combines:
//!
//! - **Task launcher**: cron, fixed-delay and fixed-rate scheduling over a
//!   shared tokio pool with graceful and immediate shutdown
//! - **Abandoned resource cleaner**: a container pass and a network pass,
//!   isolated from each other and from per-resource failures
//! - **Collaborators**: a `docker` CLI runtime client, the workspace naming
//!   convention and an HTTP ownership oracle
//!
//! # Architecture
//!
//! - [`scheduler`]: cron parsing, [`scheduler::TaskLauncher`] and the startup
//!   [`scheduler::TaskRegistry`]
//! - [`cleaner`]: [`cleaner::AbandonedResourcesCleaner`]
//! - [`runtime`]: container runtime abstraction and the docker CLI client
//! - [`naming`]: managed container and network names
//! - [`ownership`]: ownership oracle abstraction, in-memory and HTTP backends
//! - [`config`]: layered configuration and validation
//! - [`app`]: composition root
//!
//! # Example
//!
//! ```rust,ignore
//! use docker_janitor::{app::Janitor, config::JanitorConfig, scheduler::TaskLauncher};
//!
//! let config = JanitorConfig::load(None)?;
//! let janitor = Janitor::from_config(&config)?;
//! let launcher = TaskLauncher::new();
//! janitor.start(&launcher)?;
//! ```

pub mod app;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod logging;
pub mod naming;
pub mod ownership;
pub mod runtime;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use app::Janitor;
pub use cleaner::{AbandonedResourcesCleaner, CleanupReport, NetworkExclusions};
pub use error::{JanitorError, JanitorResult};
pub use scheduler::{ScheduleHandle, TaskLauncher, TaskRegistry};
