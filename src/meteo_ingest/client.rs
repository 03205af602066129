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

use crate::config::ProviderConfig;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;

/// Variables requested for the `current` block of each forecast request.
pub const CURRENT_VARIABLES: [&str; 9] = [
    "temperature_2m",
    "is_day",
    "relative_humidity_2m",
    "apparent_temperature",
    "weather_code",
    "precipitation",
    "wind_speed_10m",
    "wind_direction_10m",
    "wind_gusts_10m",
];

const FORECAST_DAYS: u8 = 1;

#[derive(Debug)]
pub enum FetchError {
    Transport(reqwest::Error),
    Status(StatusCode, Url),
    Mapping(serde_json::Error),
    Invalid { field: &'static str, reason: String },
}

/// Coarse category of a `FetchError`, used for log fields and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Transport,
    Status,
    Mapping,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Transport(_) => FetchErrorKind::Transport,
            Self::Status(_, _) => FetchErrorKind::Status,
            Self::Mapping(_) | Self::Invalid { .. } => FetchErrorKind::Mapping,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::Status(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Mapping(e) => write!(f, "unable to map response: {}", e),
            Self::Invalid { field, reason } => write!(f, "invalid value for {}: {}", field, reason),
        }
    }
}

impl error::Error for FetchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Mapping(e) => Some(e),
            _ => None,
        }
    }
}

/// Source of a single current weather observation.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self) -> Result<WeatherObservation, FetchError>;
}

/// Client for the Open-Meteo forecast API, configured for a single location.
///
/// Each call to `fetch()` makes exactly one request. Failures are not retried here,
/// the next scheduled run is the retry.
#[derive(Debug)]
pub struct OpenMeteoClient {
    client: Client,
    config: ProviderConfig,
}

impl OpenMeteoClient {
    const USER_AGENT: &'static str = "meteo_ingest (https://github.com/56quarters/meteo_ingest)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, config: ProviderConfig) -> Self {
        OpenMeteoClient { client, config }
    }

    /// Full request URL including every query parameter.
    pub fn request_url(&self) -> Url {
        let coords = &self.config.coordinates;
        let mut url = self.config.base_url.clone();
        url.query_pairs_mut()
            .append_pair("latitude", &coords.latitude().to_string())
            .append_pair("longitude", &coords.longitude().to_string())
            .append_pair("timezone", coords.timezone())
            .append_pair("forecast_days", &FORECAST_DAYS.to_string())
            .append_pair("current", &CURRENT_VARIABLES.join(","));

        url
    }
}

#[async_trait]
impl Fetch for OpenMeteoClient {
    async fn fetch(&self) -> Result<WeatherObservation, FetchError> {
        let request_url = self.request_url();
        tracing::debug!(message = "making current weather request", url = %request_url);

        let res = self
            .client
            .get(request_url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status(status, request_url));
        }

        let body = res.bytes().await.map_err(FetchError::Transport)?;
        tracing::trace!(message = "current weather response", status = %status, num_bytes = body.len());
        WeatherObservation::from_slice(&body)
    }
}

/// One current weather reading for a fixed location, as reported by the provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WeatherObservation {
    pub latitude: f64,
    pub longitude: f64,
    pub current: CurrentReading,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CurrentReading {
    pub time: String,
    pub interval: i64,
    pub temperature_2m: f64,
    pub is_day: i64,
    pub relative_humidity_2m: i64,
    pub apparent_temperature: f64,
    pub weather_code: i64,
    pub precipitation: f64,
    pub wind_speed_10m: f64,
    pub wind_direction_10m: i64,
    pub wind_gusts_10m: f64,
}

impl WeatherObservation {
    /// Parse and validate a provider response body.
    ///
    /// Every field must be present with the correct type: integer fields reject fractional
    /// numbers and nothing is defaulted. Values are kept exactly as reported.
    pub fn from_slice(body: &[u8]) -> Result<Self, FetchError> {
        let obs: WeatherObservation = serde_json::from_slice(body).map_err(FetchError::Mapping)?;
        obs.validate()?;
        Ok(obs)
    }

    /// Check domain ranges of fields that are already known to be present and well typed.
    pub fn validate(&self) -> Result<(), FetchError> {
        let c = &self.current;

        check_finite("latitude", self.latitude)?;
        check_finite("longitude", self.longitude)?;
        check_finite("current.temperature_2m", c.temperature_2m)?;
        check_finite("current.apparent_temperature", c.apparent_temperature)?;
        check_finite("current.precipitation", c.precipitation)?;
        check_finite("current.wind_speed_10m", c.wind_speed_10m)?;
        check_finite("current.wind_gusts_10m", c.wind_gusts_10m)?;

        check_range("latitude", self.latitude, -90.0, 90.0)?;
        check_range("longitude", self.longitude, -180.0, 180.0)?;
        check_range("current.relative_humidity_2m", c.relative_humidity_2m, 0, 100)?;
        check_range("current.wind_direction_10m", c.wind_direction_10m, 0, 360)?;

        if c.is_day != 0 && c.is_day != 1 {
            return Err(invalid("current.is_day", format!("expected 0 or 1, got {}", c.is_day)));
        }
        if c.interval <= 0 {
            return Err(invalid("current.interval", format!("expected positive, got {}", c.interval)));
        }
        if c.time.trim().is_empty() {
            return Err(invalid("current.time", "empty timestamp".to_owned()));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> FetchError {
    FetchError::Invalid { field, reason }
}

fn check_finite(field: &'static str, v: f64) -> Result<(), FetchError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, format!("expected finite number, got {}", v)))
    }
}

fn check_range<T: PartialOrd + fmt::Display>(field: &'static str, v: T, min: T, max: T) -> Result<(), FetchError> {
    if v < min || v > max {
        Err(invalid(field, format!("{} outside of range {} to {}", v, min, max)))
    } else {
        Ok(())
    }
}
