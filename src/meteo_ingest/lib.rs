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

//! Publish Open-Meteo weather observations to RabbitMQ
//!
//! ## Features
//!
//! `meteo_ingest` fetches the current weather for a single location from the [Open-Meteo] forecast
//! API on a fixed interval and publishes each observation as a JSON message to a durable [RabbitMQ]
//! queue for downstream consumers. Each message has the following shape, with every field always
//! present.
//!
//! ```json
//! {
//!   "latitude": -3.7172,
//!   "longitude": -38.5431,
//!   "current": {
//!     "time": "2024-01-01T12:00",
//!     "interval": 900,
//!     "temperature_2m": 28.5,
//!     "is_day": 1,
//!     "relative_humidity_2m": 60,
//!     "apparent_temperature": 30.1,
//!     "weather_code": 1,
//!     "precipitation": 0.0,
//!     "wind_speed_10m": 12.3,
//!     "wind_direction_10m": 180,
//!     "wind_gusts_10m": 20.0
//!   }
//! }
//! ```
//!
//! A failed weather request is not retried, the next tick simply tries again. Publishing is retried
//! when the broker can't be reached, waiting 1s, 2s, ... between attempts. When every attempt fails
//! the process exits with a non-zero status by default (`--on-publish-failure exit`) so that a
//! sustained broker outage is noticed. Use `--on-publish-failure skip` to drop the observation and
//! keep running instead.
//!
//! [Open-Meteo]: https://open-meteo.com/en/docs
//! [RabbitMQ]: https://www.rabbitmq.com/
//!
//! ## Build
//!
//! `meteo_ingest` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/meteo_ingest.git && cd meteo_ingest
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! Every option can be given as a flag or an environment variable, and a `.env` file in the working
//! directory is read at startup. The broker password has no default and must be provided.
//!
//! ```text
//! export RABBITMQ_PASS=guest
//! ./meteo_ingest \
//!     --weather-base-url https://api.open-meteo.com/v1/forecast \
//!     --latitude -3.7172 \
//!     --longitude -38.5431 \
//!     --timezone America/Sao_Paulo
//! ```
//!
//! ### Metrics
//!
//! Prometheus metrics about the pipeline itself are exposed on port `9784` at `/metrics`.
//!
//! * `meteo_fetches_total{result=success|transport|status|mapping}` - Weather requests by result.
//! * `meteo_publishes_total{result=success|failure}` - Observations handed to the broker by result.
//! * `meteo_publish_attempts_total` - Broker connection attempts including retries.
//! * `meteo_temperature_degrees` - Temperature of the last published observation, in degrees celsius.
//!

pub mod amqp;
pub mod client;
pub mod config;
pub mod http;
pub mod job;
pub mod metrics;
pub mod publisher;
pub mod scheduler;
