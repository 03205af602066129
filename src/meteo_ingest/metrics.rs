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

use crate::client::FetchErrorKind;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::atomic::AtomicU64;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum FetchResult {
    Success,
    Transport,
    Status,
    Mapping,
}

impl FetchResult {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Transport => "transport",
            Self::Status => "status",
            Self::Mapping => "mapping",
        }
    }
}

impl EncodeLabelValue for FetchResult {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), fmt::Error> {
        EncodeLabelValue::encode(&self.as_str(), encoder)
    }
}

impl From<FetchErrorKind> for FetchResult {
    fn from(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Transport => Self::Transport,
            FetchErrorKind::Status => Self::Status,
            FetchErrorKind::Mapping => Self::Mapping,
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum PublishResult {
    Success,
    Failure,
}

impl EncodeLabelValue for PublishResult {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), fmt::Error> {
        let value = match self {
            Self::Success => "success",
            Self::Failure => "failure",
        };
        EncodeLabelValue::encode(&value, encoder)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct FetchLabels {
    result: FetchResult,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PublishLabels {
    result: PublishResult,
}

/// Counters describing the health of the ingestion pipeline.
///
/// All metrics are created and registered upon call to `IngestMetrics::new()` and share
/// the prefix "meteo_". Each is cheap to clone and safe to update from any task.
#[derive(Debug, Clone, Default)]
pub struct IngestMetrics {
    fetches: Family<FetchLabels, Counter>,
    publishes: Family<PublishLabels, Counter>,
    publish_attempts: Counter,
    temperature: Gauge<f64, AtomicU64>,
}

impl IngestMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        reg.register(
            "meteo_fetches",
            "Weather provider requests by result",
            metrics.fetches.clone(),
        );
        reg.register(
            "meteo_publishes",
            "Observations handed to the broker by result",
            metrics.publishes.clone(),
        );
        reg.register(
            "meteo_publish_attempts",
            "Broker connection attempts, including retries",
            metrics.publish_attempts.clone(),
        );
        reg.register(
            "meteo_temperature_degrees",
            "Temperature of the last published observation in celsius",
            metrics.temperature.clone(),
        );

        metrics
    }

    pub fn fetch(&self, result: FetchResult) {
        self.fetches.get_or_create(&FetchLabels { result }).inc();
    }

    /// Record a delivered observation and its `temperature_2m`.
    pub fn published(&self, temperature: f64, attempts: u32) {
        self.publishes
            .get_or_create(&PublishLabels {
                result: PublishResult::Success,
            })
            .inc();
        self.publish_attempts.inc_by(u64::from(attempts));
        self.temperature.set(temperature);
    }

    pub fn publish_failed(&self, attempts: u32) {
        self.publishes
            .get_or_create(&PublishLabels {
                result: PublishResult::Failure,
            })
            .inc();
        self.publish_attempts.inc_by(u64::from(attempts));
    }

    pub fn fetch_count(&self, result: FetchResult) -> u64 {
        self.fetches.get_or_create(&FetchLabels { result }).get()
    }

    pub fn publish_count(&self, result: PublishResult) -> u64 {
        self.publishes.get_or_create(&PublishLabels { result }).get()
    }

    pub fn publish_attempt_count(&self) -> u64 {
        self.publish_attempts.get()
    }

    pub fn last_temperature(&self) -> f64 {
        self.temperature.get()
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchResult, IngestMetrics};
    use crate::client::FetchErrorKind;
    use prometheus_client::encoding::text::encode;
    use prometheus_client::registry::Registry;

    #[test]
    fn test_fetch_result_from_kind() {
        assert_eq!(FetchResult::Mapping, FetchResult::from(FetchErrorKind::Mapping));
        assert_eq!(FetchResult::Status, FetchResult::from(FetchErrorKind::Status));
    }

    #[test]
    fn test_encoded_names() {
        let mut reg = Registry::default();
        let metrics = IngestMetrics::new(&mut reg);
        metrics.fetch(FetchResult::Success);
        metrics.publish_failed(3);

        let mut buf = String::new();
        encode(&mut buf, &reg).unwrap();

        assert!(buf.contains("meteo_fetches_total{result=\"success\"} 1"), "{}", buf);
        assert!(buf.contains("meteo_publishes_total{result=\"failure\"} 1"), "{}", buf);
        assert!(buf.contains("meteo_publish_attempts_total 3"), "{}", buf);
        assert!(buf.contains("meteo_temperature_degrees"), "{}", buf);
    }
}
