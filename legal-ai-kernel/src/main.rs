/**
 * KERNEL LEGAL AI - Point d'entrée du serveur de progression d'entraînement
 *
 * RÔLE :
 * Assemble config, canal MQTT, producteur de progression, résumés de runs,
 * téléchargements de datasets, santé et API REST.
 *
 * ARCHITECTURE :
 * - producteur → MqttSink → `legal-ai/channel/events@v1` → dashboards
 * - dashboards → `legal-ai/channel/commands@v1` → listener → producteur
 * - REST pour l'administration
 */

mod config;
mod datasets;
mod health;
mod http;
mod mqtt;
mod producer;
mod state;
mod summaries;

use crate::config::load_config;
use crate::datasets::DatasetDownloads;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::mqtt::MqttSink;
use crate::producer::{EventSink, ProducerSettings, ProgressProducer};
use crate::summaries::SummaryLog;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    let summaries = match SummaryLog::load(&cfg.summaries_file).await {
        Ok(log) => log,
        Err(e) => {
            warn!("[kernel] failed to load run summaries, keeping them in memory: {e}");
            SummaryLog::in_memory()
        }
    };

    let (mqtt_client, eventloop) = mqtt::create_mqtt_client(&cfg);
    let sink: Arc<dyn EventSink> = Arc::new(MqttSink::new(mqtt_client.clone()));

    let producer = Arc::new(ProgressProducer::new(
        sink.clone(),
        ProducerSettings { epoch_delay: cfg.training.epoch_delay() },
        summaries.clone(),
    ));
    let downloads = DatasetDownloads::new(sink, cfg.datasets.chunk_bytes, cfg.datasets.chunk_delay());
    let health = HealthTracker::new();

    mqtt::spawn_mqtt_listener(mqtt_client.clone(), eventloop, producer.clone(), health.clone());
    health.spawn_health_publisher(mqtt_client, producer.clone(), summaries.clone(), Duration::from_secs(30));

    let app = http::build_router(AppState { producer, health, summaries, downloads });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!("[kernel] listening on http://{}", cfg.http.bind);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
