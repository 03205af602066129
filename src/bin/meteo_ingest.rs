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

use clap::{Parser, ValueEnum};
use meteo_ingest::amqp::AmqpBroker;
use meteo_ingest::client::OpenMeteoClient;
use meteo_ingest::config::{BrokerConfig, ProviderConfig, QueryCoordinates};
use meteo_ingest::http::RequestContext;
use meteo_ingest::job::{CollectionJob, FailurePolicy};
use meteo_ingest::metrics::IngestMetrics;
use meteo_ingest::publisher::QueuePublisher;
use meteo_ingest::scheduler::Scheduler;
use prometheus_client::registry::Registry;
use reqwest::{Client, Url};
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::watch;
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9784);
const DEFAULT_INTERVAL_SECS: u64 = 4;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_BROKER_HOST: &str = "localhost";
const DEFAULT_BROKER_PORT: u16 = 5672;
const DEFAULT_BROKER_USER: &str = "guest";
const JOB_NAME: &str = "collect_weather";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[clap(name = "meteo_ingest", version = clap::crate_version!())]
struct MeteoIngestApplication {
    /// Open-Meteo forecast endpoint, e.g. https://api.open-meteo.com/v1/forecast
    #[clap(long, env = "WEATHER_BASE_URL")]
    weather_base_url: Url,

    /// Latitude of the location to fetch weather for (-90 to 90)
    #[clap(long, env = "LATITUDE", allow_negative_numbers = true)]
    latitude: f64,

    /// Longitude of the location to fetch weather for (-180 to 180)
    #[clap(long, env = "LONGITUDE", allow_negative_numbers = true)]
    longitude: f64,

    /// Timezone that provider timestamps are reported in, e.g. America/Sao_Paulo
    #[clap(long, env = "TIMEZONE", default_value_t = DEFAULT_TIMEZONE.into())]
    timezone: String,

    /// RabbitMQ host
    #[clap(long, env = "RABBITMQ_HOST", default_value_t = DEFAULT_BROKER_HOST.into())]
    rabbitmq_host: String,

    /// RabbitMQ port
    #[clap(long, env = "RABBITMQ_PORT", default_value_t = DEFAULT_BROKER_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    rabbitmq_port: u16,

    /// RabbitMQ user
    #[clap(long, env = "RABBITMQ_USER", default_value_t = DEFAULT_BROKER_USER.into())]
    rabbitmq_user: String,

    /// RabbitMQ password. Required, there is no default.
    #[clap(long, env = "RABBITMQ_PASS", hide_env_values = true)]
    rabbitmq_pass: String,

    /// Durable queue that observations are published to
    #[clap(long, env = "RABBITMQ_QUEUE", default_value_t = BrokerConfig::DEFAULT_QUEUE.into())]
    rabbitmq_queue: String,

    /// Fetch and publish the current weather at this interval, in seconds.
    #[clap(long, env = "INTERVAL_SECS", default_value_t = DEFAULT_INTERVAL_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    interval_secs: u64,

    /// Timeout for fetching the current weather, in milliseconds.
    #[clap(long, env = "TIMEOUT_MILLIS", default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Total number of attempts to publish an observation when the broker can't be reached.
    #[clap(long, env = "PUBLISH_ATTEMPTS", default_value_t = QueuePublisher::<AmqpBroker>::DEFAULT_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    publish_attempts: u32,

    /// What to do when an observation can't be published after every attempt. Allowed values
    /// are 'exit' (stop with a non-zero exit code) and 'skip' (drop the observation and continue).
    #[clap(long, env = "ON_PUBLISH_FAILURE", default_value_t = FailurePolicy::default())]
    on_publish_failure: FailurePolicy,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, env = "LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Logging output format.
    #[clap(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Address to bind the metrics server to.
    #[clap(long, env = "BIND", default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // A missing .env file is fine, everything can come from the environment or flags.
    let _ = dotenv::dotenv();
    let opts = MeteoIngestApplication::parse();

    match opts.log_format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            tracing_subscriber::FmtSubscriber::builder()
                .with_max_level(opts.log_level)
                .finish(),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::FmtSubscriber::builder()
                .with_max_level(opts.log_level)
                .json()
                .finish(),
        ),
    }
    .expect("failed to set tracing subscriber");

    let coordinates =
        QueryCoordinates::new(opts.latitude, opts.longitude, opts.timezone.clone()).unwrap_or_else(|e| {
            tracing::error!(message = "invalid location", error = %e);
            process::exit(1)
        });

    let broker_config = BrokerConfig::new(
        opts.rabbitmq_host.clone(),
        opts.rabbitmq_port,
        opts.rabbitmq_user.clone(),
        opts.rabbitmq_pass.clone(),
        opts.rabbitmq_queue.clone(),
    )
    .unwrap_or_else(|e| {
        tracing::error!(message = "invalid broker configuration", error = %e);
        process::exit(1)
    });

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let mut registry = Registry::default();
    let metrics = IngestMetrics::new(&mut registry);

    let fetcher = OpenMeteoClient::new(
        http_client,
        ProviderConfig::new(opts.weather_base_url.clone(), coordinates),
    );
    let broker = AmqpBroker::new(&broker_config);
    tracing::info!(
        message = "weather collection configured",
        api_url = %opts.weather_base_url,
        broker = %broker.address(),
        queue = %broker_config.queue(),
        interval_secs = opts.interval_secs,
        on_publish_failure = %opts.on_publish_failure,
    );

    let publisher = QueuePublisher::new(broker, broker_config.queue()).with_attempts(opts.publish_attempts);
    let job = CollectionJob::new(fetcher, publisher, metrics, opts.on_publish_failure);

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        // Wait for either SIGTERM or SIGINT to shutdown
        tokio::select! {
            _ = sigterm() => {}
            _ = sigint() => {}
        }

        tracing::info!("received shutdown signal, finishing current work");
        let _ = shutdown_tx.send(());
    });

    let context = Arc::new(RequestContext::new(registry));
    let builder = axum::Server::try_bind(&opts.bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
        process::exit(1)
    });
    let server = builder.serve(meteo_ingest::http::app(context).into_make_service());
    tracing::info!(message = "server started", address = %server.local_addr());

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(server.with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    }));

    let mut scheduler = Scheduler::new();
    scheduler.add_job(JOB_NAME, Duration::from_secs(opts.interval_secs), job);

    if let Err(e) = scheduler.run(shutdown_rx).await {
        tracing::error!(message = "weather collection stopped", error = %e);
        process::exit(1)
    }

    if let Err(e) = server.await? {
        tracing::warn!(message = "metrics server error during shutdown", error = %e);
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
