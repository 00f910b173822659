//! Pool-backed launcher for recurring tasks.
//!
//! Every registration becomes one long-lived loop future spawned on the
//! runtime. Cron loops sleep until the next fire time and hand each execution
//! to the pool as a separate task; fixed-delay and fixed-rate loops run the
//! task inline so a registration never overlaps itself.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::cron::{CronError, CronExpression, CronParser};
use super::{TaskFn, task_fn};

/// Errors returned when registering a task.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// The cron expression could not be parsed. Nothing was scheduled.
    #[error("invalid cron expression '{expression}' for task '{task}': {source}")]
    InvalidCron {
        /// Task name.
        task: String,
        /// The rejected expression.
        expression: String,
        /// Parser error.
        #[source]
        source: CronError,
    },
    /// The launcher no longer accepts registrations.
    #[error("task launcher is shut down")]
    ShutDown,
}

/// Handle to one registration.
///
/// Cancelling wakes a pending wait and ends the chain without running the
/// task again. An execution already in progress is not interrupted.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    name: String,
    token: CancellationToken,
}

impl ScheduleHandle {
    fn new(name: String, token: CancellationToken) -> Self {
        Self { name, token }
    }

    /// Name the task was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop this registration.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the registration has been cancelled, directly or by shutdown.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Scheduler for cron, fixed-delay and fixed-rate tasks over a shared pool.
///
/// The pool is the tokio runtime behind the handle given at construction.
/// Dropping the launcher performs a graceful [`TaskLauncher::shutdown`].
#[derive(Debug)]
pub struct TaskLauncher {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    handle: Handle,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    stopped: AtomicBool,
    /// Wake-up signals of every pending cron wait.
    cron_waits: Mutex<Vec<CancellationToken>>,
    /// Loops and executions that `shutdown_now` aborts.
    running: Mutex<Vec<AbortHandle>>,
}

impl TaskLauncher {
    /// Create a launcher on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    /// Create a launcher that spawns onto the given runtime.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                stopped: AtomicBool::new(false),
                cron_waits: Mutex::new(Vec::new()),
                running: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Run `task` every time `cron` fires.
    ///
    /// A malformed expression is reported synchronously and nothing is
    /// scheduled.
    pub fn schedule_cron<F, Fut>(
        &self,
        name: impl Into<String>,
        cron: &str,
        task: F,
    ) -> Result<ScheduleHandle, LauncherError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let expression = CronParser::parse(cron).map_err(|source| LauncherError::InvalidCron {
            task: name.clone(),
            expression: cron.to_string(),
            source,
        })?;
        if self.is_shutdown() {
            return Err(LauncherError::ShutDown);
        }

        // A child of the shutdown token is born cancelled if shutdown races us.
        let token = self.inner.shutdown.child_token();
        self.inner.cron_waits.lock().push(token.clone());

        let join = self.inner.tracker.spawn_on(
            cron_loop(
                Arc::clone(&self.inner),
                name.clone(),
                expression,
                task_fn(task),
                token.clone(),
            ),
            &self.inner.handle,
        );
        self.inner.track(join.abort_handle());

        info!(task = %name, cron = %cron, "Scheduled cron task");
        Ok(ScheduleHandle::new(name, token))
    }

    /// Run `task` repeatedly, starting each run `delay` after the previous
    /// one finished.
    ///
    /// A zero `delay` is rejected: nothing is scheduled and `None` is returned.
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        name: impl Into<String>,
        task: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Option<ScheduleHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if delay.is_zero() {
            warn!(task = %name, "Rejected fixed-delay schedule: delay must be positive");
            return None;
        }
        let token = self.periodic_token(&name)?;
        let join = self.inner.tracker.spawn_on(
            fixed_delay_loop(name.clone(), task_fn(task), initial_delay, delay, token.clone()),
            &self.inner.handle,
        );
        self.inner.track(join.abort_handle());

        info!(
            task = %name,
            initial_delay_ms = initial_delay.as_millis(),
            delay_ms = delay.as_millis(),
            "Scheduled fixed-delay task"
        );
        Some(ScheduleHandle::new(name, token))
    }

    /// Run `task` every `period`, measured between run starts.
    ///
    /// Overrunning executions are followed immediately by the missed runs.
    /// A zero `period` is rejected: nothing is scheduled and `None` is returned.
    pub fn schedule_at_fixed_rate<F, Fut>(
        &self,
        name: impl Into<String>,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Option<ScheduleHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if period.is_zero() {
            warn!(task = %name, "Rejected fixed-rate schedule: period must be positive");
            return None;
        }
        let token = self.periodic_token(&name)?;
        let join = self.inner.tracker.spawn_on(
            fixed_rate_loop(name.clone(), task_fn(task), initial_delay, period, token.clone()),
            &self.inner.handle,
        );
        self.inner.track(join.abort_handle());

        info!(
            task = %name,
            initial_delay_ms = initial_delay.as_millis(),
            period_ms = period.as_millis(),
            "Scheduled fixed-rate task"
        );
        Some(ScheduleHandle::new(name, token))
    }

    fn periodic_token(&self, name: &str) -> Option<CancellationToken> {
        if self.is_shutdown() {
            warn!(task = %name, "Rejected schedule: task launcher is shut down");
            return None;
        }
        Some(self.inner.shutdown.child_token())
    }

    /// Stop all schedules and refuse new work. Running executions finish.
    ///
    /// Safe to call any number of times.
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let waits = std::mem::take(&mut *self.inner.cron_waits.lock());
        for wait in &waits {
            wait.cancel();
        }
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        info!(cron_waits = waits.len(), "Task launcher shutting down");
    }

    /// Like [`TaskLauncher::shutdown`], then abort every running execution.
    pub fn shutdown_now(&self) {
        self.shutdown();
        let running = std::mem::take(&mut *self.inner.running.lock());
        let mut aborted = 0_usize;
        for handle in running {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(aborted, "Aborted in-flight tasks");
        }
    }

    /// Wait until every loop and execution has ended after a shutdown.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok()
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of cron registrations currently waiting for their next fire.
    pub fn pending_cron_waits(&self) -> usize {
        self.inner
            .cron_waits
            .lock()
            .iter()
            .filter(|wait| !wait.is_cancelled())
            .count()
    }
}

impl Default for TaskLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskLauncher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn track(&self, handle: AbortHandle) {
        let mut running = self.running.lock();
        running.retain(|h| !h.is_finished());
        running.push(handle);
    }

    /// Hand one cron execution to the pool.
    fn submit(&self, name: &str, task: &TaskFn) {
        if self.shutdown.is_cancelled() {
            debug!(task = %name, "Rejected execution: task launcher is shutting down");
            return;
        }
        let name = name.to_string();
        let task = Arc::clone(task);
        let join = self
            .tracker
            .spawn_on(async move { run_guarded(&name, &task).await }, &self.handle);
        self.track(join.abort_handle());
    }

    fn forget_cancelled_waits(&self) {
        self.cron_waits.lock().retain(|wait| !wait.is_cancelled());
    }
}

async fn cron_loop(
    inner: Arc<Inner>,
    name: String,
    expression: CronExpression,
    task: TaskFn,
    token: CancellationToken,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        // Never fire the same instant twice, even if the wall clock lags.
        let base = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = expression.next_after(&base) else {
            warn!(task = %name, cron = %expression, "Cron expression has no future fire time");
            token.cancel();
            break;
        };
        let wait = (next - base).to_std().unwrap_or_default();
        debug!(task = %name, next_fire = %next, "Waiting for next cron fire");

        if !sleep_or_cancel(wait, &token).await {
            debug!(task = %name, "Cron wait cancelled");
            break;
        }
        last_fire = Some(next);
        inner.submit(&name, &task);
    }
    inner.forget_cancelled_waits();
}

async fn fixed_delay_loop(
    name: String,
    task: TaskFn,
    initial_delay: Duration,
    delay: Duration,
    token: CancellationToken,
) {
    if sleep_or_cancel(initial_delay, &token).await {
        loop {
            run_guarded(&name, &task).await;
            if !sleep_or_cancel(delay, &token).await {
                break;
            }
        }
    }
    debug!(task = %name, "Fixed-delay schedule stopped");
}

async fn fixed_rate_loop(
    name: String,
    task: TaskFn,
    initial_delay: Duration,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        run_guarded(&name, &task).await;
    }
    debug!(task = %name, "Fixed-rate schedule stopped");
}

/// Sleep for `duration`; returns `false` if cancelled first.
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Run one execution, containing panics so the schedule survives them.
async fn run_guarded(name: &str, task: &TaskFn) {
    let started = Instant::now();
    debug!(task = %name, "Task started");
    match AssertUnwindSafe(task()).catch_unwind().await {
        Ok(()) => debug!(
            task = %name,
            duration_ms = started.elapsed().as_millis(),
            "Task finished"
        ),
        Err(panic) => error!(
            task = %name,
            panic = %panic_message(panic.as_ref()),
            "Task panicked"
        ),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
