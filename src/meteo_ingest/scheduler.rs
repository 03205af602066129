// meteo_ingest - Publish Open-Meteo weather observations to RabbitMQ
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use async_trait::async_trait;
use std::error;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Error returned by a job that can't sensibly keep running.
#[derive(Debug)]
pub struct JobError {
    source: Box<dyn error::Error + Send + Sync + 'static>,
}

impl JobError {
    pub fn new<E>(source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync + 'static>>,
    {
        JobError { source: source.into() }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl error::Error for JobError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

#[derive(Debug)]
pub enum SchedulerError {
    JobFailed { job: String, source: JobError },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JobFailed { job, source } => write!(f, "job {} failed: {}", job, source),
        }
    }
}

impl error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::JobFailed { source, .. } => Some(source),
        }
    }
}

/// Unit of work run on every tick of the scheduler.
#[async_trait]
pub trait Job: Send {
    async fn run(&mut self) -> Result<(), JobError>;
}

struct Entry {
    name: String,
    every: Duration,
    next: Instant,
    job: Box<dyn Job>,
}

/// Runs named jobs at fixed intervals, one at a time, from a single task.
///
/// Every job fires as soon as the scheduler starts and then every `every` after that.
/// A run that takes longer than its interval delays the next firing rather than causing
/// runs to overlap or pile up. Shutdown is only observed between runs, so a job that is
/// in progress always finishes.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<(String, Duration, Box<dyn Job>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Intervals shorter than a millisecond are rounded up to one.
    pub fn add_job<S, J>(&mut self, name: S, every: Duration, job: J) -> &mut Self
    where
        S: Into<String>,
        J: Job + 'static,
    {
        let name = name.into();
        let every = every.max(Duration::from_millis(1));
        tracing::info!(message = "registered job", job = %name, interval_secs = every.as_secs_f64());
        self.entries.push((name, every, Box::new(job)));
        self
    }

    /// Run jobs until `shutdown` changes or its sender is dropped.
    ///
    /// Returns an error, without running anything further, if a job fails.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) -> Result<(), SchedulerError> {
        let start = Instant::now();
        let mut entries: Vec<Entry> = self
            .entries
            .into_iter()
            .map(|(name, every, job)| Entry {
                name,
                every,
                next: start,
                job,
            })
            .collect();

        if entries.is_empty() {
            tracing::warn!("no jobs registered, waiting for shutdown");
            let _ = shutdown.changed().await;
            return Ok(());
        }

        tracing::info!(message = "scheduler started", jobs = entries.len());

        loop {
            // Ties go to the job registered first.
            let idx = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.next)
                .map(|(i, _)| i)
                .unwrap_or_default();
            let deadline = entries[idx].next;

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            let entry = &mut entries[idx];
            tracing::debug!(message = "running job", job = %entry.name);
            if let Err(e) = entry.job.run().await {
                tracing::error!(message = "job failed, stopping scheduler", job = %entry.name, error = %e);
                return Err(SchedulerError::JobFailed {
                    job: entry.name.clone(),
                    source: e,
                });
            }

            entry.next = (deadline + entry.every).max(Instant::now());
        }

        tracing::info!("scheduler stopped");
        Ok(())
    }
}
