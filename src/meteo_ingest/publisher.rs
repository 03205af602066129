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

use crate::client::WeatherObservation;
use async_trait::async_trait;
use std::error;
use std::fmt;
use std::time::Duration;

pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug)]
pub enum PublishError {
    Encode(String),
    Connection(BoxError),
    Channel(BoxError),
}

impl PublishError {
    /// True only for failures to reach the broker.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "unable to encode observation: {}", msg),
            Self::Connection(e) => write!(f, "unable to connect to broker: {}", e),
            Self::Channel(e) => write!(f, "broker channel error: {}", e),
        }
    }
}

impl error::Error for PublishError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Connection(e) => Some(e.as_ref()),
            Self::Channel(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Publishing gave up: either retries ran out or the error could not be retried.
#[derive(Debug)]
pub struct PermanentFailure {
    pub attempts: u32,
    pub cause: PublishError,
}

impl fmt::Display for PermanentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publish failed after {} attempt(s): {}", self.attempts, self.cause)
    }
}

impl error::Error for PermanentFailure {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub attempts: u32,
}

/// Something that can open sessions to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new connection. Errors here are `PublishError::Connection` and are retried.
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, PublishError>;
}

/// A single open broker connection.
#[async_trait]
pub trait BrokerSession: Send {
    /// Declare a durable queue, a no-op if it already exists.
    async fn declare_durable_queue(&mut self, queue: &str) -> Result<(), PublishError>;

    /// Publish a message that must survive a broker restart and wait for the broker to accept it.
    async fn publish_persistent(&mut self, queue: &str, body: &[u8], content_type: &str) -> Result<(), PublishError>;

    async fn close(self: Box<Self>) -> Result<(), PublishError>;
}

/// Anything that can hand off an observation for downstream consumers.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, observation: WeatherObservation) -> Result<Delivery, PermanentFailure>;
}

/// Publishes observations to a durable queue, retrying connection failures with
/// exponential backoff.
///
/// A fresh connection is opened for every attempt and closed afterwards. Delivery
/// is at-least-once: a confirmation lost after the broker accepted a message can
/// result in a duplicate on the next attempt.
#[derive(Debug)]
pub struct QueuePublisher<B> {
    broker: B,
    queue: String,
    attempts: u32,
    base_delay: Duration,
}

impl<B: Broker> QueuePublisher<B> {
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

    pub fn new<S: Into<String>>(broker: B, queue: S) -> Self {
        QueuePublisher {
            broker,
            queue: queue.into(),
            attempts: Self::DEFAULT_ATTEMPTS,
            base_delay: Self::DEFAULT_BASE_DELAY,
        }
    }

    /// Set the total number of attempts, at least one is always made.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait before the retry following failed attempt `attempt` (0-indexed): 1x, 2x, 4x... the base delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn publish_once(&self, body: &[u8]) -> Result<(), PublishError> {
        let mut session = self.broker.connect().await?;
        let sent = match session.declare_durable_queue(&self.queue).await {
            Ok(()) => session.publish_persistent(&self.queue, body, CONTENT_TYPE_JSON).await,
            Err(e) => Err(e),
        };

        // A confirmed message stays delivered even if closing the connection fails.
        if let Err(e) = session.close().await {
            match sent {
                Ok(()) => tracing::warn!(message = "unable to close broker connection after publish", error = %e),
                Err(_) => tracing::debug!(message = "unable to close broker connection", error = %e),
            }
        }

        sent
    }
}

#[async_trait]
impl<B: Broker> Publish for QueuePublisher<B> {
    async fn publish(&self, observation: WeatherObservation) -> Result<Delivery, PermanentFailure> {
        let body = encode(&observation).map_err(|cause| PermanentFailure { attempts: 0, cause })?;

        let mut attempt = 0;
        loop {
            match self.publish_once(&body).await {
                Ok(()) => {
                    tracing::info!(message = "published observation", queue = %self.queue, time = %observation.current.time);
                    return Ok(Delivery { attempts: attempt + 1 });
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        message = "publish attempt failed, retrying",
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    let failure = PermanentFailure {
                        attempts: attempt + 1,
                        cause: e,
                    };
                    tracing::error!(message = "giving up on publishing observation", queue = %self.queue, error = %failure);
                    return Err(failure);
                }
            }
        }
    }
}

/// Serialize an observation to JSON.
///
/// Non-finite floats have no JSON representation and are an `Encode` error.
pub fn encode(observation: &WeatherObservation) -> Result<Vec<u8>, PublishError> {
    let c = &observation.current;
    let floats = [
        ("latitude", observation.latitude),
        ("longitude", observation.longitude),
        ("temperature_2m", c.temperature_2m),
        ("apparent_temperature", c.apparent_temperature),
        ("precipitation", c.precipitation),
        ("wind_speed_10m", c.wind_speed_10m),
        ("wind_gusts_10m", c.wind_gusts_10m),
    ];

    if let Some((field, v)) = floats.iter().find(|(_, v)| !v.is_finite()) {
        return Err(PublishError::Encode(format!("{} is not finite: {}", field, v)));
    }

    serde_json::to_vec(observation).map_err(|e| PublishError::Encode(e.to_string()))
}
