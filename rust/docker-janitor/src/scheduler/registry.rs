//! Startup-time registry of recurring tasks.
//!
//! Tasks are declared explicitly with a builder and handed to a
//! [`TaskLauncher`] in one call:
//!
//! ```rust,ignore
//! let handles = TaskRegistry::builder()
//!     .fixed_delay("cleanup", Duration::from_secs(60), Duration::from_secs(3600), move || {
//!         let cleaner = Arc::clone(&cleaner);
//!         async move { cleaner.run().await; }
//!     })
//!     .build()
//!     .launch(&launcher)?;
//! ```

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use super::launcher::{LauncherError, ScheduleHandle, TaskLauncher};
use super::{TaskFn, task_fn};

/// When a task fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Calendar schedule.
    Cron(String),
    /// Next run starts `delay` after the previous run finished.
    FixedDelay {
        /// Wait before the first run.
        initial_delay: Duration,
        /// Gap between the end of a run and the start of the next.
        delay: Duration,
    },
    /// Runs start every `period`.
    FixedRate {
        /// Wait before the first run.
        initial_delay: Duration,
        /// Gap between run starts.
        period: Duration,
    },
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron(expr) => write!(f, "cron({expr})"),
            Self::FixedDelay {
                initial_delay,
                delay,
            } => write!(f, "fixed-delay({delay:?}, initial {initial_delay:?})"),
            Self::FixedRate {
                initial_delay,
                period,
            } => write!(f, "fixed-rate({period:?}, initial {initial_delay:?})"),
        }
    }
}

/// A named task body with its trigger.
pub struct ScheduledTask {
    name: String,
    trigger: Trigger,
    body: TaskFn,
}

impl ScheduledTask {
    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task trigger.
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TaskRegistry`].
#[derive(Debug, Default)]
pub struct TaskRegistryBuilder {
    tasks: Vec<ScheduledTask>,
}

impl TaskRegistryBuilder {
    /// Register a task with an explicit trigger.
    #[must_use]
    pub fn task<F, Fut>(mut self, name: impl Into<String>, trigger: Trigger, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(ScheduledTask {
            name: name.into(),
            trigger,
            body: task_fn(body),
        });
        self
    }

    /// Register a cron task.
    #[must_use]
    pub fn cron<F, Fut>(self, name: impl Into<String>, expression: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.task(name, Trigger::Cron(expression.into()), body)
    }

    /// Register a fixed-delay task.
    #[must_use]
    pub fn fixed_delay<F, Fut>(
        self,
        name: impl Into<String>,
        initial_delay: Duration,
        delay: Duration,
        body: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.task(
            name,
            Trigger::FixedDelay {
                initial_delay,
                delay,
            },
            body,
        )
    }

    /// Register a fixed-rate task.
    #[must_use]
    pub fn fixed_rate<F, Fut>(
        self,
        name: impl Into<String>,
        initial_delay: Duration,
        period: Duration,
        body: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.task(
            name,
            Trigger::FixedRate {
                initial_delay,
                period,
            },
            body,
        )
    }

    /// Finish the registry.
    #[must_use]
    pub fn build(self) -> TaskRegistry {
        TaskRegistry { tasks: self.tasks }
    }
}

/// The set of tasks to launch at startup.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<ScheduledTask>,
}

impl TaskRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    /// Registered tasks in declaration order.
    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Schedule every task on `launcher`.
    ///
    /// Fixed triggers that the launcher rejects are skipped with a warning. A
    /// cron error cancels the registrations made so far and is returned.
    pub fn launch(self, launcher: &TaskLauncher) -> Result<Vec<ScheduleHandle>, LauncherError> {
        let mut handles: Vec<ScheduleHandle> = Vec::with_capacity(self.tasks.len());

        for ScheduledTask {
            name,
            trigger,
            body,
        } in self.tasks
        {
            let run = move || body();
            let handle = match &trigger {
                Trigger::Cron(expression) => {
                    match launcher.schedule_cron(name.clone(), expression, run) {
                        Ok(handle) => Some(handle),
                        Err(e) => {
                            for handle in &handles {
                                handle.cancel();
                            }
                            return Err(e);
                        }
                    }
                }
                Trigger::FixedDelay {
                    initial_delay,
                    delay,
                } => launcher.schedule_with_fixed_delay(name.clone(), run, *initial_delay, *delay),
                Trigger::FixedRate {
                    initial_delay,
                    period,
                } => launcher.schedule_at_fixed_rate(name.clone(), run, *initial_delay, *period),
            };

            match handle {
                Some(handle) => {
                    info!(task = %name, trigger = %trigger, "Registered task");
                    handles.push(handle);
                }
                None => warn!(task = %name, trigger = %trigger, "Task was not scheduled"),
            }
        }

        Ok(handles)
    }
}
