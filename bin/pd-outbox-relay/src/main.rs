//! Podium Outbox Relay
//!
//! Polls the outbox table for pending event records, claims them under a
//! lease, and publishes their envelopes to SQS. Safe to run as multiple
//! instances against the same database.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PD_DATABASE_URL` | - | Postgres connection URL (required) |
//! | `PD_QUEUE_URL` | - | SQS queue URL (required) |
//! | `PD_WORKER_ID` | `relay-<uuid>` | Identity written into claim leases |
//! | `PD_POLL_INTERVAL_MS` | `1000` | Poll interval in milliseconds |
//! | `PD_BATCH_SIZE` | `100` | Max records claimed per batch |
//! | `PD_LEASE_SECONDS` | `30` | Claim lease duration |
//! | `PD_MAX_ATTEMPTS` | `8` | Publish attempts before dead-lettering |
//! | `PD_BACKOFF_BASE_SECS` | `2` | First retry delay, doubles per attempt |
//! | `PD_BACKOFF_CAP_SECS` | `300` | Retry delay ceiling |
//! | `PD_PUBLISH_TIMEOUT_MS` | `10000` | Per-record broker I/O bound |
//! | `PD_METRICS_PORT` | `9090` | Metrics/health port |
//! | `RUST_LOG` | `info` | Log level |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pd_common::EventEnvelope;
use pd_outbox::postgres::PostgresOutboxRepository;
use pd_outbox::{EventPublisher, OutboxRelay, RelayConfig};
use pd_store::TenantPool;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} environment variable is required", key))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting Podium Outbox Relay");

    let database_url = env_required("PD_DATABASE_URL")?;
    let queue_url = env_required("PD_QUEUE_URL")?;
    let metrics_port: u16 = env_or_parse("PD_METRICS_PORT", 9090);

    let relay_config = RelayConfig {
        worker_id: env_or("PD_WORKER_ID", &format!("relay-{}", uuid::Uuid::new_v4())),
        poll_interval: Duration::from_millis(env_or_parse("PD_POLL_INTERVAL_MS", 1000)),
        batch_size: env_or_parse("PD_BATCH_SIZE", 100),
        lease_duration: Duration::from_secs(env_or_parse("PD_LEASE_SECONDS", 30)),
        max_attempts: env_or_parse("PD_MAX_ATTEMPTS", 8),
        backoff_base: Duration::from_secs(env_or_parse("PD_BACKOFF_BASE_SECS", 2)),
        backoff_cap: Duration::from_secs(env_or_parse("PD_BACKOFF_CAP_SECS", 300)),
        publish_timeout: Duration::from_millis(env_or_parse("PD_PUBLISH_TIMEOUT_MS", 10000)),
    };

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pg_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;
    pd_store::schema::init_schema(&pg_pool).await?;
    let pool = TenantPool::new(pg_pool);
    let repository = Arc::new(PostgresOutboxRepository::new(pool));
    info!("outbox repository initialized");

    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let sqs_client = aws_sdk_sqs::Client::new(&config);
    let publisher = Arc::new(SqsPublisher::new(sqs_client, queue_url.clone()));
    info!("SQS publisher initialized: {}", queue_url);

    let worker_id = relay_config.worker_id.clone();
    let relay = OutboxRelay::new(repository, publisher, relay_config);
    let relay_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = relay.start() => {}
                _ = shutdown_rx.recv() => {
                    info!("outbox relay shutting down; live claims expire by lease");
                }
            }
        })
    };

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    info!("metrics server listening on http://{}/metrics", metrics_addr);

    let metrics_app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || {
                let prometheus = prometheus.clone();
                async move { prometheus.render() }
            }),
        )
        .route("/health", axum::routing::get(health_handler))
        .route("/ready", axum::routing::get(ready_handler));

    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    let metrics_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(metrics_listener, metrics_app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    info!(worker_id = %worker_id, "Podium Outbox Relay started");

    shutdown_signal().await;
    info!("shutdown signal received...");

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = relay_handle.await;
        let _ = metrics_handle.await;
    })
    .await;

    info!("Podium Outbox Relay shutdown complete");
    Ok(())
}

// SQS publisher: the routing key rides in a message attribute, the FIFO
// message group keeps per-aggregate order, and the dedup id is the event id
// so the broker collapses lease-race double publishes where it can.
struct SqsPublisher {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsPublisher {
    fn new(client: aws_sdk_sqs::Client, queue_url: String) -> Self {
        Self { client, queue_url }
    }
}

#[async_trait]
impl EventPublisher for SqsPublisher {
    async fn publish(
        &self,
        routing_key: &str,
        envelope: &EventEnvelope,
    ) -> pd_common::Result<()> {
        let body = serde_json::to_string(envelope)?;

        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .message_attributes(
                "event_type",
                aws_sdk_sqs::types::MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(routing_key)
                    .build()
                    .map_err(|e| pd_common::CoreError::PublishTransient(e.to_string()))?,
            )
            .message_group_id(envelope.message_group())
            .message_deduplication_id(envelope.event_id.to_string())
            .send()
            .await
            .map_err(|e| pd_common::CoreError::PublishTransient(format!("SQS send error: {}", e)))?;

        Ok(())
    }
}

async fn health_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "READY"
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
