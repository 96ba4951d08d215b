//! Background job runner.
//!
//! Wraps a [`JobScheduler`] with an explicit lifecycle
//! (`Idle -> Running <-> Executing -> Stopped`) and a per-job guard so that
//! each job fires at most once per local calendar day and never overlaps
//! itself.

pub mod profile_foods;

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Instant,
};

use chrono::{DateTime, Local, NaiveDate};
use futures::{future::BoxFuture, FutureExt};
use nutri_core::DailySchedule;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// The work a job performs. Invoked with no arguments.
pub type JobTask = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A named task and the daily time it fires at.
#[derive(Clone)]
pub struct JobDescriptor {
    name: String,
    schedule: DailySchedule,
    task: JobTask,
}

impl JobDescriptor {
    pub fn new<F, Fut>(name: impl Into<String>, schedule: DailySchedule, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule,
            task: Arc::new(move || task().boxed()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn schedule(&self) -> DailySchedule {
        self.schedule
    }
}

impl std::fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    /// Running, with at least one task in flight.
    Executing,
    Stopped,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerState::Idle => write!(f, "idle"),
            RunnerState::Running => write!(f, "running"),
            RunnerState::Executing => write!(f, "executing"),
            RunnerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What happened when a trigger reached a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Completed,
    Failed,
    AlreadyRanToday,
    StillRunning,
    NotRunning,
}

#[derive(Debug, Error)]
pub enum JobRunnerError {
    #[error("job runner cannot start while {0}")]
    InvalidState(RunnerState),
    #[error("no job named '{0}'")]
    UnknownJob(String),
    #[error(transparent)]
    Scheduler(#[from] JobSchedulerError),
}

/// Counters for one job since the runner was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStats {
    pub runs: u64,
    pub failures: u64,
    pub last_fired_on: Option<NaiveDate>,
}

struct JobSlot {
    descriptor: JobDescriptor,
    in_flight: AtomicBool,
    last_fired_on: Mutex<Option<NaiveDate>>,
    runs: AtomicU64,
    failures: AtomicU64,
}

impl JobSlot {
    fn new(descriptor: JobDescriptor) -> Self {
        Self {
            descriptor,
            in_flight: AtomicBool::new(false),
            last_fired_on: Mutex::new(None),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Claims `today` for this job. Fails if a run is in flight or the day
    /// was already claimed.
    fn claim(&self, today: NaiveDate) -> Result<(), FireOutcome> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(FireOutcome::StillRunning);
        }

        let mut last = self
            .last_fired_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *last == Some(today) {
            self.in_flight.store(false, Ordering::Release);
            return Err(FireOutcome::AlreadyRanToday);
        }
        *last = Some(today);
        Ok(())
    }

    fn stats(&self) -> JobStats {
        JobStats {
            runs: self.runs.load(Ordering::Acquire),
            failures: self.failures.load(Ordering::Acquire),
            last_fired_on: *self
                .last_fired_on
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

struct Shared {
    phase: Mutex<RunnerState>,
    executing: AtomicUsize,
}

impl Shared {
    fn phase(&self) -> RunnerState {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, next: RunnerState) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Runs one trigger of `slot`, logging and counting the result. Task errors
/// and panics are contained here; the job stays scheduled either way.
async fn fire(shared: &Shared, slot: &JobSlot, today: NaiveDate) -> FireOutcome {
    if shared.phase() != RunnerState::Running {
        tracing::warn!(job = slot.name(), "scheduler: trigger ignored, runner not running");
        return FireOutcome::NotRunning;
    }

    if let Err(outcome) = slot.claim(today) {
        tracing::warn!(
            job = slot.name(),
            %today,
            ?outcome,
            "scheduler: skipping duplicate trigger"
        );
        return outcome;
    }

    shared.executing.fetch_add(1, Ordering::AcqRel);
    tracing::info!(job = slot.name(), "scheduler: starting run");
    let started = Instant::now();

    let result = AssertUnwindSafe((slot.descriptor.task)())
        .catch_unwind()
        .await;

    shared.executing.fetch_sub(1, Ordering::AcqRel);
    slot.in_flight.store(false, Ordering::Release);
    slot.runs.fetch_add(1, Ordering::AcqRel);
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(Ok(())) => {
            tracing::info!(job = slot.name(), elapsed_ms, "scheduler: run complete");
            FireOutcome::Completed
        }
        Ok(Err(e)) => {
            slot.failures.fetch_add(1, Ordering::AcqRel);
            tracing::error!(job = slot.name(), elapsed_ms, error = %format!("{e:#}"), "scheduler: run failed");
            FireOutcome::Failed
        }
        Err(_) => {
            slot.failures.fetch_add(1, Ordering::AcqRel);
            tracing::error!(job = slot.name(), elapsed_ms, "scheduler: run panicked");
            FireOutcome::Failed
        }
    }
}

/// Owns the scheduler for the lifetime of the server. Pair every
/// [`JobRunner::start`] with [`JobRunner::stop`].
pub struct JobRunner {
    shared: Arc<Shared>,
    slots: Vec<Arc<JobSlot>>,
    scheduler: Option<JobScheduler>,
}

impl JobRunner {
    #[must_use]
    pub fn new(jobs: Vec<JobDescriptor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                phase: Mutex::new(RunnerState::Idle),
                executing: AtomicUsize::new(0),
            }),
            slots: jobs.into_iter().map(|d| Arc::new(JobSlot::new(d))).collect(),
            scheduler: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> RunnerState {
        match self.shared.phase() {
            RunnerState::Running if self.shared.executing.load(Ordering::Acquire) > 0 => {
                RunnerState::Executing
            }
            phase => phase,
        }
    }

    /// Registers every job as a daily trigger in local time and starts the
    /// scheduler. Returns as soon as the triggers are armed.
    ///
    /// # Errors
    ///
    /// Returns [`JobRunnerError::InvalidState`] unless the runner is idle, or
    /// [`JobRunnerError::Scheduler`] if a job cannot be registered or the
    /// scheduler fails to start.
    pub async fn start(&mut self) -> Result<(), JobRunnerError> {
        let state = self.state();
        if state != RunnerState::Idle {
            return Err(JobRunnerError::InvalidState(state));
        }

        let mut scheduler = JobScheduler::new().await?;
        for slot in &self.slots {
            register_daily_job(&scheduler, Arc::clone(&self.shared), Arc::clone(slot)).await?;
        }

        // Running before the scheduler ticks, so an immediate trigger is not dropped.
        self.shared.set_phase(RunnerState::Running);
        if let Err(e) = scheduler.start().await {
            self.shared.set_phase(RunnerState::Idle);
            if let Err(shutdown) = scheduler.shutdown().await {
                tracing::warn!(error = %shutdown, "scheduler: shutdown after failed start");
            }
            return Err(e.into());
        }

        self.scheduler = Some(scheduler);
        tracing::info!(jobs = self.slots.len(), "scheduler: job runner started");
        Ok(())
    }

    /// Shuts the scheduler down. Runs already in flight finish on their own.
    ///
    /// # Errors
    ///
    /// Returns [`JobRunnerError::Scheduler`] if the scheduler fails to shut
    /// down cleanly; the runner is stopped regardless.
    pub async fn stop(&mut self) -> Result<(), JobRunnerError> {
        self.shared.set_phase(RunnerState::Stopped);
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown().await?;
        }
        tracing::info!("scheduler: job runner stopped");
        Ok(())
    }

    /// Fires `name` as if its trigger had been reached on `today`, subject
    /// to the same once-per-day and overlap guards.
    ///
    /// # Errors
    ///
    /// Returns [`JobRunnerError::UnknownJob`] if no such job is registered.
    pub async fn fire(&self, name: &str, today: NaiveDate) -> Result<FireOutcome, JobRunnerError> {
        let slot = self.slot(name)?;
        Ok(fire(&self.shared, slot, today).await)
    }

    /// Next trigger instant for `name` after the current local time.
    ///
    /// # Errors
    ///
    /// Returns [`JobRunnerError::UnknownJob`] if no such job is registered.
    pub fn next_trigger(&self, name: &str) -> Result<Option<DateTime<Local>>, JobRunnerError> {
        let slot = self.slot(name)?;
        Ok(slot.descriptor.schedule().next_after(&Local::now()))
    }

    /// # Errors
    ///
    /// Returns [`JobRunnerError::UnknownJob`] if no such job is registered.
    pub fn stats(&self, name: &str) -> Result<JobStats, JobRunnerError> {
        Ok(self.slot(name)?.stats())
    }

    fn slot(&self, name: &str) -> Result<&Arc<JobSlot>, JobRunnerError> {
        self.slots
            .iter()
            .find(|slot| slot.name() == name)
            .ok_or_else(|| JobRunnerError::UnknownJob(name.to_string()))
    }
}

async fn register_daily_job(
    scheduler: &JobScheduler,
    shared: Arc<Shared>,
    slot: Arc<JobSlot>,
) -> Result<(), JobSchedulerError> {
    let schedule = slot.descriptor.schedule();
    let cron = schedule.cron_expression();
    let name = slot.name().to_string();

    let job = Job::new_async_tz(cron.as_str(), Local, move |_uuid, _lock| {
        let shared = Arc::clone(&shared);
        let slot = Arc::clone(&slot);

        Box::pin(async move {
            fire(&shared, &slot, Local::now().date_naive()).await;
            if let Some(next) = schedule.next_after(&Local::now()) {
                tracing::info!(job = slot.name(), next = %next, "scheduler: re-armed");
            }
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(job = %name, %schedule, cron = %cron, "scheduler: registered job");
    Ok(())
}
