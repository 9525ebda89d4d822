use crate::producer::{ProgressProducer, RunState};
use crate::summaries::SummaryLog;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;
use tracing::{debug, warn};

pub const HEALTH_TOPIC: &str = "legal-ai/kernel/health@v1";

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub training_state: RunState,
    pub runs_recorded: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    pub fn get_health(&self, producer: &ProgressProducer, summaries: &SummaryLog) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            training_state: producer.status().state,
            runs_recorded: summaries.len() as u32,
        }
    }

    /// Publishes the kernel health every `every` on the shared MQTT client.
    pub fn spawn_health_publisher(
        &self,
        client: AsyncClient,
        producer: Arc<ProgressProducer>,
        summaries: SummaryLog,
        every: Duration,
    ) {
        let tracker = self.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let health = tracker.get_health(&producer, &summaries);
                let payload = match serde_json::to_string(&health) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("[health] failed to serialize health: {e}");
                        continue;
                    }
                };
                match client.publish(HEALTH_TOPIC, QoS::AtLeastOnce, false, payload).await {
                    Ok(()) => debug!(
                        "[health] published kernel health (uptime: {}s, training: {:?})",
                        health.uptime_seconds, health.training_state
                    ),
                    Err(e) => warn!("[health] failed to publish: {e:?}"),
                }
            }
        });
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{pid}/status")) {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::ProducerSettings;
    use legal_ai_contracts::TrainingConfig;
    use tokio::sync::mpsc;

    #[test]
    fn health_reflects_mqtt_and_training_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let summaries = SummaryLog::in_memory();
        let producer = ProgressProducer::new(Arc::new(tx), ProducerSettings::default(), summaries.clone());
        let tracker = HealthTracker::new();

        let health = tracker.get_health(&producer, &summaries);
        assert_eq!(health.mqtt_status, "connecting");
        assert_eq!(health.training_state, RunState::Uninitialized);

        tracker.increment_reconnects();
        tracker.increment_reconnects();
        assert_eq!(tracker.mqtt_status(), "reconnecting");
        tracker.mark_mqtt_connected();
        producer.initialize(&TrainingConfig::default()).unwrap();

        let health = tracker.get_health(&producer, &summaries);
        assert_eq!(health.mqtt_reconnects, 2);
        assert_eq!(health.mqtt_status, "connected");
        assert_eq!(health.training_state, RunState::Idle);
    }
}
