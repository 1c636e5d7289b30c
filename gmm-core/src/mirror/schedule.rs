//! Periodic update schedules
//!
//! A schedule specification is one of:
//! - `false` (any case): updates are disabled
//! - `@every <duration>`: fixed period, e.g. `@every 30m`
//! - a cron expression: five-field crontab (`0 0 * * *`), six or seven
//!   field with seconds, or a descriptor such as `@daily`
//!
//! Cron expressions are evaluated in local time.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::Local;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Literal that disables scheduled updates
pub const DISABLED: &str = "false";

/// A parsed update schedule
#[derive(Debug, Clone)]
pub enum UpdateSchedule {
    /// No periodic updates
    Disabled,
    /// Fire at a fixed period
    Every(Duration),
    /// Fire on a cron schedule
    Cron(Box<cron::Schedule>),
}

impl UpdateSchedule {
    /// Parse a schedule specification
    pub fn parse(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();

        if trimmed.eq_ignore_ascii_case(DISABLED) {
            return Ok(UpdateSchedule::Disabled);
        }

        if let Some(period) = trimmed.strip_prefix("@every") {
            let period = humantime::parse_duration(period.trim()).map_err(|e| {
                Error::Scheduling {
                    spec: spec.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if period.is_zero() {
                return Err(Error::Scheduling {
                    spec: spec.to_string(),
                    reason: "period must be greater than zero".to_string(),
                });
            }
            return Ok(UpdateSchedule::Every(period));
        }

        // The cron crate wants a seconds field; classic crontab has none
        let expression = if !trimmed.starts_with('@') && trimmed.split_whitespace().count() == 5 {
            format!("0 {}", trimmed)
        } else {
            trimmed.to_string()
        };

        cron::Schedule::from_str(&expression)
            .map(|schedule| UpdateSchedule::Cron(Box::new(schedule)))
            .map_err(|e| Error::Scheduling {
                spec: spec.to_string(),
                reason: e.to_string(),
            })
    }

    /// Whether this schedule ever fires
    pub fn is_enabled(&self) -> bool {
        !matches!(self, UpdateSchedule::Disabled)
    }

    /// Time until the next trigger, or `None` if it never fires again
    pub fn next_delay(&self) -> Option<Duration> {
        match self {
            UpdateSchedule::Disabled => None,
            UpdateSchedule::Every(period) => Some(*period),
            UpdateSchedule::Cron(schedule) => {
                let now = Local::now();
                let next = schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }

    /// Start a job that runs `job` on every trigger
    ///
    /// Returns `None` for a disabled schedule. Must be called from within a
    /// tokio runtime.
    pub fn start<F, Fut>(&self, label: impl Into<String>, job: F) -> Option<ScheduledJob>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.is_enabled() {
            return None;
        }

        let label = label.into();
        let schedule = self.clone();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            tracing::debug!(job = %label, "schedule started");
            while let Some(delay) = schedule.next_delay() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    // Fires on stop() and when the job handle is dropped
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }
                job().await;
            }
            tracing::debug!(job = %label, "schedule stopped");
        });

        Some(ScheduledJob {
            stop_tx,
            task: Some(task),
        })
    }
}

/// Handle to a running periodic job
///
/// No trigger fires after [`ScheduledJob::stop`] returns; an invocation
/// already in progress is allowed to finish. Dropping the handle stops the job.
#[derive(Debug)]
pub struct ScheduledJob {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ScheduledJob {
    /// Stop the job; idempotent
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Whether the job's task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the job and wait for an invocation in progress to return
    pub async fn stop_and_wait(&mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::warn!(error = %e, "scheduled job panicked");
                }
            }
        }
    }
}

impl Drop for ScheduledJob {
    fn drop(&mut self) {
        self.stop();
    }
}
