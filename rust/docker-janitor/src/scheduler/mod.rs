//! Recurring task scheduling.
//!
//! This module provides the cron parser, the pool-backed [`TaskLauncher`]
//! and the startup-time [`TaskRegistry`] used to wire periodic jobs such as
//! the abandoned resource cleaner.

pub mod cron;
pub mod launcher;
pub mod registry;

pub use cron::{CronError, CronExpression, CronParser};
pub use launcher::{LauncherError, ScheduleHandle, TaskLauncher};
pub use registry::{ScheduledTask, TaskRegistry, TaskRegistryBuilder, Trigger};

use std::sync::Arc;

use futures::future::BoxFuture;

/// A shareable task body with no result.
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Box an async closure into a [`TaskFn`].
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}
