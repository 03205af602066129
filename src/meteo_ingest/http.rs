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

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const TEXT_FORMAT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// State shared by every request to the metrics server.
#[derive(Debug)]
pub struct RequestContext {
    registry: Registry,
}

impl RequestContext {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }
}

/// Router exposing `GET /metrics` in the OpenMetrics text format.
///
/// Axum answers other methods on `/metrics` with a 405 and unknown paths with a 404.
pub fn app(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/metrics", get(text_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn text_metrics(State(context): State<Arc<RequestContext>>) -> Response {
    let mut buf = String::new();

    match encode(&mut buf, &context.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            ([(CONTENT_TYPE, TEXT_FORMAT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{app, RequestContext};
    use crate::metrics::{FetchResult, IngestMetrics};
    use prometheus_client::registry::Registry;
    use std::net::SocketAddr;
    use std::sync::Arc;

    async fn serve(registry: Registry) -> SocketAddr {
        let router = app(Arc::new(RequestContext::new(registry)));
        let server = axum::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(router.into_make_service());
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let mut registry = Registry::default();
        let metrics = IngestMetrics::new(&mut registry);
        metrics.fetch(FetchResult::Status);
        let addr = serve(registry).await;

        let res = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(reqwest::StatusCode::OK, res.status());
        assert!(res.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/openmetrics-text"));

        let body = res.text().await.unwrap();
        assert!(body.contains("meteo_fetches_total{result=\"status\"} 1"), "{}", body);
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let addr = serve(Registry::default()).await;
        let client = reqwest::Client::new();

        let res = client.get(format!("http://{}/", addr)).send().await.unwrap();
        assert_eq!(reqwest::StatusCode::NOT_FOUND, res.status());

        let res = client.post(format!("http://{}/metrics", addr)).send().await.unwrap();
        assert_eq!(reqwest::StatusCode::METHOD_NOT_ALLOWED, res.status());
    }
}
