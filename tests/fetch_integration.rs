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

//! Tests for the Open-Meteo client against a local HTTP server standing in for the provider.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use meteo_ingest::client::{CurrentReading, Fetch, FetchError, FetchErrorKind, OpenMeteoClient, WeatherObservation};
use meteo_ingest::config::{ProviderConfig, QueryCoordinates};
use meteo_ingest::job::{CollectionJob, FailurePolicy};
use meteo_ingest::metrics::{FetchResult, IngestMetrics};
use meteo_ingest::publisher::{Delivery, PermanentFailure, Publish};
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn provider_body() -> Value {
    json!({
        "latitude": -3.7172,
        "longitude": -38.5431,
        "generationtime_ms": 0.03,
        "utc_offset_seconds": -10800,
        "timezone": "America/Sao_Paulo",
        "timezone_abbreviation": "GMT-3",
        "elevation": 21.0,
        "current_units": {"time": "iso8601", "interval": "seconds", "temperature_2m": "°C"},
        "current": {
            "time": "2024-01-01T12:00",
            "interval": 900,
            "temperature_2m": 28.5,
            "is_day": 1,
            "relative_humidity_2m": 60,
            "apparent_temperature": 30.1,
            "weather_code": 1,
            "precipitation": 0.0,
            "wind_speed_10m": 12.3,
            "wind_direction_10m": 180,
            "wind_gusts_10m": 20.0
        }
    })
}

async fn forecast(Query(params): Query<HashMap<String, String>>) -> Result<Json<Value>, (StatusCode, String)> {
    let expected = [
        ("latitude", "-3.7172"),
        ("longitude", "-38.5431"),
        ("timezone", "America/Sao_Paulo"),
        ("forecast_days", "1"),
    ];

    for (key, value) in expected {
        if params.get(key).map(String::as_str) != Some(value) {
            return Err((StatusCode::BAD_REQUEST, format!("bad {}: {:?}", key, params.get(key))));
        }
    }

    let current: Vec<&str> = params.get("current").map(|c| c.split(',').collect()).unwrap_or_default();
    if current.len() != 9 {
        return Err((StatusCode::BAD_REQUEST, format!("bad current: {:?}", current)));
    }

    Ok(Json(provider_body()))
}

fn router() -> Router {
    Router::new()
        .route("/v1/forecast", get(forecast))
        .route("/broken", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "internal error") }))
        .route("/html", get(|| async { "<html>maintenance</html>" }))
        .route(
            "/partial",
            get(|| async {
                let mut body = provider_body();
                body["current"].as_object_mut().unwrap().remove("wind_gusts_10m");
                Json(body)
            }),
        )
}

async fn serve() -> SocketAddr {
    let server = axum::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(router().into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

fn client_for(base: &str) -> OpenMeteoClient {
    let coords = QueryCoordinates::new(-3.7172, -38.5431, "America/Sao_Paulo").unwrap();
    let http = Client::builder().timeout(Duration::from_secs(5)).build().unwrap();
    OpenMeteoClient::new(http, ProviderConfig::new(Url::parse(base).unwrap(), coords))
}

#[tokio::test]
async fn test_fetch_valid_response() {
    let addr = serve().await;
    let client = client_for(&format!("http://{}/v1/forecast", addr));

    let obs = client.fetch().await.unwrap();

    let expected = WeatherObservation {
        latitude: -3.7172,
        longitude: -38.5431,
        current: CurrentReading {
            time: "2024-01-01T12:00".to_owned(),
            interval: 900,
            temperature_2m: 28.5,
            is_day: 1,
            relative_humidity_2m: 60,
            apparent_temperature: 30.1,
            weather_code: 1,
            precipitation: 0.0,
            wind_speed_10m: 12.3,
            wind_direction_10m: 180,
            wind_gusts_10m: 20.0,
        },
    };
    assert_eq!(expected, obs);
}

#[tokio::test]
async fn test_fetch_server_error() {
    let addr = serve().await;
    let client = client_for(&format!("http://{}/broken", addr));

    let err = client.fetch().await.unwrap_err();
    match &err {
        FetchError::Status(status, _) => assert_eq!(500, status.as_u16()),
        other => panic!("expected status error, got {:?}", other),
    }
    assert_eq!(FetchErrorKind::Status, err.kind());
}

#[tokio::test]
async fn test_fetch_not_json() {
    let addr = serve().await;
    let client = client_for(&format!("http://{}/html", addr));

    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::Mapping(_)), "{:?}", err);
}

#[tokio::test]
async fn test_fetch_missing_field() {
    let addr = serve().await;
    let client = client_for(&format!("http://{}/partial", addr));

    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::Mapping(_)), "{:?}", err);
}

#[tokio::test]
async fn test_fetch_connection_refused() {
    // Grab a free port and release it so nothing is listening there.
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let client = client_for(&format!("http://{}/v1/forecast", addr));

    let err = client.fetch().await.unwrap_err();
    assert_eq!(FetchErrorKind::Transport, err.kind());
}

struct CountingPublisher {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Publish for CountingPublisher {
    async fn publish(&self, _observation: WeatherObservation) -> Result<Delivery, PermanentFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Delivery { attempts: 1 })
    }
}

#[tokio::test]
async fn test_job_skips_broker_on_server_error() {
    let addr = serve().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let metrics = IngestMetrics::default();
    let job = CollectionJob::new(
        client_for(&format!("http://{}/broken", addr)),
        CountingPublisher { calls: calls.clone() },
        metrics.clone(),
        FailurePolicy::Exit,
    );

    job.collect().await.unwrap();

    assert_eq!(0, calls.load(Ordering::SeqCst));
    assert_eq!(1, metrics.fetch_count(FetchResult::Status));
}

#[tokio::test]
async fn test_job_publishes_on_success() {
    let addr = serve().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let job = CollectionJob::new(
        client_for(&format!("http://{}/v1/forecast", addr)),
        CountingPublisher { calls: calls.clone() },
        IngestMetrics::default(),
        FailurePolicy::Exit,
    );

    job.collect().await.unwrap();
    assert_eq!(1, calls.load(Ordering::SeqCst));
}
