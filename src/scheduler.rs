//! Cron-driven job scheduling
//!
//! A minimal cron engine: register jobs against cron expressions, start, and
//! stop. Each job runs on its own timer task and every fire spawns an
//! independent task, so there is no shared run-loop ordering between jobs and
//! a slow job never delays another's trigger.
//!
//! The recorder builds a brand-new engine on every configuration refresh and
//! starts it only after the previous engine is fully stopped; two engines are
//! never active at once.

use chrono::{FixedOffset, Utc};
use cron::Schedule;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Boxed future returned by a scheduled job
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A schedulable job: each invocation produces a fresh future
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Cron engine owning a fixed set of jobs
///
/// Jobs are registered before [`start`](Self::start); the engine is
/// immutable afterwards. Dropping the engine stops all timers.
pub struct CronScheduler {
    tz: FixedOffset,
    jobs: Vec<(Schedule, String, JobFn)>,
    handles: Vec<JoinHandle<()>>,
}

impl CronScheduler {
    /// Create an engine evaluating expressions in the given timezone
    pub fn new(tz: FixedOffset) -> Self {
        Self {
            tz,
            jobs: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Register a job under a cron expression
    ///
    /// Accepts standard five-field expressions as well as six/seven-field
    /// expressions with seconds. An invalid expression is a registration
    /// error; the caller decides whether that aborts a whole refresh.
    pub fn add_job(&mut self, expression: &str, job: JobFn) -> Result<()> {
        let normalized = normalize_cron(expression);
        let schedule = Schedule::from_str(&normalized).map_err(|e| Error::Cron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        self.jobs.push((schedule, expression.to_string(), job));
        Ok(())
    }

    /// Number of registered jobs
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Spawn one timer task per registered job
    pub fn start(&mut self) {
        for (schedule, expression, job) in &self.jobs {
            let tz = self.tz;
            let schedule = schedule.clone();
            let expression = expression.clone();
            let job = job.clone();

            let handle = tokio::spawn(async move {
                loop {
                    let now = Utc::now().with_timezone(&tz);
                    let Some(next) = schedule.after(&now).next() else {
                        tracing::warn!(cron = %expression, "schedule has no future fire times");
                        break;
                    };
                    let wait = (next - now)
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    tracing::debug!(cron = %expression, next = %next, "waiting for next trigger");
                    tokio::time::sleep(wait).await;

                    // Every fire runs on its own task so a long-running job
                    // cannot delay its own next trigger
                    tokio::spawn(job());
                }
            });
            self.handles.push(handle);
        }
        tracing::info!(jobs = self.jobs.len(), "cron scheduler started");
    }

    /// Stop all timer tasks
    ///
    /// Already-fired jobs keep running to completion; only the timers are
    /// cancelled.
    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        tracing::info!("cron scheduler stopped");
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pin the seconds field to zero for standard five-field expressions
///
/// The cron parser requires a seconds field, while configs use the
/// conventional five-field form.
fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}
