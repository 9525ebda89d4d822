use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub training: TrainingConf,
    pub datasets: DatasetsConf,
    /// Run summaries are appended here (JSON array).
    pub summaries_file: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub bind: String, // ex: "0.0.0.0:8080"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrainingConf {
    /// Simulated duration of one epoch.
    pub epoch_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatasetsConf {
    pub chunk_bytes: u64,
    pub chunk_delay_ms: u64,
}

fn default_client_id() -> String {
    "legal-ai-kernel".into()
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf { host: "localhost".into(), port: 1883, client_id: default_client_id() },
            http: HttpConf { bind: "0.0.0.0:8080".into() },
            training: TrainingConf { epoch_delay_ms: 1000 },
            datasets: DatasetsConf { chunk_bytes: 256 * 1024, chunk_delay_ms: 200 },
            summaries_file: PathBuf::from("./data/training-summaries.json"),
        }
    }
}

impl TrainingConf {
    pub fn epoch_delay(&self) -> Duration {
        Duration::from_millis(self.epoch_delay_ms)
    }
}

impl DatasetsConf {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("LEGAL_AI_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(&path).await
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> KernelConfig {
    let path = path.as_ref();
    if !path.exists() {
        warn!("[kernel] no {}, using default config", path.display());
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    match serde_yaml::from_str(&txt) {
        Ok(cfg) => {
            info!("[kernel] config loaded from {}", path.display());
            cfg
        }
        Err(e) => {
            warn!("[kernel] invalid config {}: {e}", path.display());
            KernelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(dir.path().join("absent.yaml")).await;
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.training.epoch_delay_ms, 1000);
    }

    #[tokio::test]
    async fn partial_yaml_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        std::fs::write(&path, "training:\n  epoch_delay_ms: 50\nmqtt:\n  host: broker\n  port: 1884\n").unwrap();
        let cfg = load_config_from(&path).await;
        assert_eq!(cfg.training.epoch_delay(), Duration::from_millis(50));
        assert_eq!(cfg.mqtt.host, "broker");
        assert_eq!(cfg.mqtt.client_id, "legal-ai-kernel");
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn invalid_yaml_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        std::fs::write(&path, "mqtt: [not, a, map").unwrap();
        let cfg = load_config_from(&path).await;
        assert_eq!(cfg.mqtt.host, "localhost");
    }
}
