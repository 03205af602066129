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

use reqwest::Url;
use std::error;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Latitude(f64),
    Longitude(f64),
    Empty(&'static str),
    Port(u16),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latitude(v) => write!(f, "latitude {} outside of range -90 to 90", v),
            Self::Longitude(v) => write!(f, "longitude {} outside of range -180 to 180", v),
            Self::Empty(field) => write!(f, "{} must not be empty", field),
            Self::Port(p) => write!(f, "invalid port {}", p),
        }
    }
}

impl error::Error for ConfigError {}

/// Location and timezone that every weather request is made for.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCoordinates {
    latitude: f64,
    longitude: f64,
    timezone: String,
}

impl QueryCoordinates {
    pub fn new<S: Into<String>>(latitude: f64, longitude: f64, timezone: S) -> Result<Self, ConfigError> {
        let timezone = timezone.into();
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ConfigError::Latitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ConfigError::Longitude(longitude));
        }
        if timezone.trim().is_empty() {
            return Err(ConfigError::Empty("timezone"));
        }

        Ok(Self {
            latitude,
            longitude,
            timezone,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }
}

/// Where to fetch current weather from.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: Url,
    pub coordinates: QueryCoordinates,
}

impl ProviderConfig {
    pub fn new(base_url: Url, coordinates: QueryCoordinates) -> Self {
        Self { base_url, coordinates }
    }
}

/// Connection settings for the RabbitMQ broker and the queue observations are published to.
#[derive(Clone)]
pub struct BrokerConfig {
    host: String,
    port: u16,
    user: String,
    password: String,
    queue: String,
}

impl BrokerConfig {
    pub const DEFAULT_QUEUE: &'static str = "weather_data_queue";

    pub fn new<S: Into<String>>(host: S, port: u16, user: S, password: S, queue: S) -> Result<Self, ConfigError> {
        let host = host.into();
        let queue = queue.into();

        if host.trim().is_empty() {
            return Err(ConfigError::Empty("broker host"));
        }
        if port == 0 {
            return Err(ConfigError::Port(port));
        }
        if queue.trim().is_empty() {
            return Err(ConfigError::Empty("queue name"));
        }

        Ok(Self {
            host,
            port,
            user: user.into(),
            password: password.into(),
            queue,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

// Written by hand so the password never ends up in logs.
impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"********")
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{BrokerConfig, ConfigError, QueryCoordinates};

    #[test]
    fn test_coordinates_in_range() {
        let coords = QueryCoordinates::new(-3.7172, -38.5431, "America/Sao_Paulo").unwrap();
        assert_eq!(-3.7172, coords.latitude());
        assert_eq!(-38.5431, coords.longitude());
        assert_eq!("America/Sao_Paulo", coords.timezone());
    }

    #[test]
    fn test_coordinates_boundaries_allowed() {
        assert!(QueryCoordinates::new(90.0, 180.0, "UTC").is_ok());
        assert!(QueryCoordinates::new(-90.0, -180.0, "UTC").is_ok());
    }

    #[test]
    fn test_coordinates_out_of_range() {
        assert_eq!(
            ConfigError::Latitude(90.5),
            QueryCoordinates::new(90.5, 0.0, "UTC").unwrap_err()
        );
        assert_eq!(
            ConfigError::Longitude(-181.0),
            QueryCoordinates::new(0.0, -181.0, "UTC").unwrap_err()
        );
        assert_eq!(
            ConfigError::Latitude(f64::NAN).to_string(),
            QueryCoordinates::new(f64::NAN, 0.0, "UTC").unwrap_err().to_string()
        );
    }

    #[test]
    fn test_coordinates_empty_timezone() {
        assert_eq!(
            ConfigError::Empty("timezone"),
            QueryCoordinates::new(0.0, 0.0, " ").unwrap_err()
        );
    }

    #[test]
    fn test_broker_config_validation() {
        assert!(BrokerConfig::new("localhost", 5672, "guest", "secret", "weather_data_queue").is_ok());
        assert_eq!(
            ConfigError::Port(0),
            BrokerConfig::new("localhost", 0, "guest", "secret", "q").unwrap_err()
        );
        assert_eq!(
            ConfigError::Empty("queue name"),
            BrokerConfig::new("localhost", 5672, "guest", "secret", "").unwrap_err()
        );
        assert_eq!(
            ConfigError::Empty("broker host"),
            BrokerConfig::new("", 5672, "guest", "secret", "q").unwrap_err()
        );
    }

    #[test]
    fn test_broker_config_debug_hides_password() {
        let cfg = BrokerConfig::new("localhost", 5672, "guest", "hunter2", "q").unwrap();
        let out = format!("{:?}", cfg);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("localhost"));
    }
}
