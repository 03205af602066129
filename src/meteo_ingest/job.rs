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

use crate::client::Fetch;
use crate::metrics::{FetchResult, IngestMetrics};
use crate::publisher::Publish;
use crate::scheduler::{Job, JobError};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

/// What to do when an observation could not be published even after retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the scheduler so a sustained broker outage ends the process.
    #[default]
    Exit,
    /// Log the failure and wait for the next tick.
    Skip,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit => write!(f, "exit"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exit" => Ok(Self::Exit),
            "skip" => Ok(Self::Skip),
            _ => Err(format!("unknown failure policy '{}', expected 'exit' or 'skip'", s)),
        }
    }
}

/// Fetch the current weather and publish it, once per tick.
///
/// A failed fetch only skips the tick. A failed publish is handled per `FailurePolicy`.
pub struct CollectionJob<F, P> {
    fetcher: F,
    publisher: P,
    metrics: IngestMetrics,
    policy: FailurePolicy,
}

impl<F: Fetch, P: Publish> CollectionJob<F, P> {
    pub fn new(fetcher: F, publisher: P, metrics: IngestMetrics, policy: FailurePolicy) -> Self {
        CollectionJob {
            fetcher,
            publisher,
            metrics,
            policy,
        }
    }

    pub async fn collect(&self) -> Result<(), JobError> {
        let obs = match self.fetcher.fetch().await {
            Ok(obs) => obs,
            Err(e) => {
                self.metrics.fetch(FetchResult::from(e.kind()));
                tracing::error!(message = "failed to fetch current weather, skipping publish", kind = ?e.kind(), error = %e);
                return Ok(());
            }
        };

        self.metrics.fetch(FetchResult::Success);
        tracing::info!(
            message = "fetched current weather",
            time = %obs.current.time,
            temperature = obs.current.temperature_2m,
        );

        let temperature = obs.current.temperature_2m;
        match self.publisher.publish(obs).await {
            Ok(delivery) => {
                self.metrics.published(temperature, delivery.attempts);
                Ok(())
            }
            Err(failure) => {
                self.metrics.publish_failed(failure.attempts);
                match self.policy {
                    FailurePolicy::Exit => Err(JobError::new(failure)),
                    FailurePolicy::Skip => {
                        tracing::error!(message = "dropping observation after publish failure", error = %failure);
                        Ok(())
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<F: Fetch, P: Publish> Job for CollectionJob<F, P> {
    async fn run(&mut self) -> Result<(), JobError> {
        self.collect().await
    }
}
