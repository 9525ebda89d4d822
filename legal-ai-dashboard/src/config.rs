//! Dashboard configuration from the environment (`.env` honoured by main).

use crate::channel::{ChannelConfig, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub token: Option<String>,
    pub reconnect_base: Duration,
    pub reconnect_attempts: u32,
    /// Overrides the prefs location under the OS config dir.
    pub prefs_path: Option<PathBuf>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: format!("legal-ai-dashboard-{}", uuid::Uuid::new_v4().simple()),
            token: None,
            reconnect_base: DEFAULT_BASE_DELAY,
            reconnect_attempts: DEFAULT_MAX_ATTEMPTS,
            prefs_path: None,
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or empty keys keep the default; unparsable ones are logged and
    /// ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(host) = get("LEGAL_AI_BROKER_HOST") {
            cfg.broker_host = host;
        }
        if let Some(port) = parsed(&get, "LEGAL_AI_BROKER_PORT") {
            cfg.broker_port = port;
        }
        if let Some(id) = get("LEGAL_AI_CLIENT_ID") {
            cfg.client_id = id;
        }
        cfg.token = get("LEGAL_AI_TOKEN");
        if let Some(ms) = parsed::<u64>(&get, "LEGAL_AI_RECONNECT_BASE_MS") {
            cfg.reconnect_base = Duration::from_millis(ms);
        }
        if let Some(n) = parsed(&get, "LEGAL_AI_RECONNECT_ATTEMPTS") {
            cfg.reconnect_attempts = n;
        }
        cfg.prefs_path = get("LEGAL_AI_PREFS_FILE").map(PathBuf::from);
        cfg
    }

    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            base_delay: self.reconnect_base,
            max_attempts: self.reconnect_attempts,
            token: self.token.clone(),
        }
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("[config] ignoring invalid {key}={raw}");
            None
        }
    }
}
