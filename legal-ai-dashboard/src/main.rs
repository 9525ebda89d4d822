//! Headless Legal AI dashboard.
//!
//! Follows training runs from the kernel over MQTT and logs what a dashboard
//! view would show. Commands are read from stdin, one per line:
//! `start <dataset-id>...`, `pause`, `resume`, `stop`, `theme light|dark`,
//! `sidebar`, `hide`, `show`, `offline`, `online`, `quit`.

use anyhow::Result;
use legal_ai_contracts::{StartCommand, TrainingCommand, TrainingConfig, TrainingData};
use legal_ai_dashboard::bindings;
use legal_ai_dashboard::config::DashboardConfig;
use legal_ai_dashboard::prefs::{PersistedPrefs, Theme};
use legal_ai_dashboard::selectors::{connection_badge, downloads_to_rows, snapshot_to_cards};
use legal_ai_dashboard::store::now_ms;
use legal_ai_dashboard::{ChannelClient, MqttTransport, Network, Store, Visibility};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = DashboardConfig::from_env();
    let prefs_path = prefs_path(&cfg);
    let prefs = match &prefs_path {
        Some(path) => PersistedPrefs::load(path).await.unwrap_or_else(|e| {
            warn!("[dashboard] ignoring prefs file {}: {e}", path.display());
            PersistedPrefs::default()
        }),
        None => PersistedPrefs::default(),
    };

    let store = Arc::new(Store::new(prefs));
    let transport = MqttTransport::new(&cfg.broker_host, cfg.broker_port, &cfg.client_id);
    let client = ChannelClient::spawn(transport, cfg.channel());
    let _subscriptions = bindings::bind(&client, store.clone());

    tokio::spawn(render(store.clone()));

    info!("[dashboard] connecting to {}:{}", cfg.broker_host, cfg.broker_port);
    let state = client.connect().await;
    if !state.connected {
        warn!("[dashboard] first connection attempt failed, retrying in background");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&client, &store, line.trim()).await {
                        break;
                    }
                }
                None => {
                    // stdin closed, keep following until ctrl-c
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    info!("[dashboard] shutting down");
    client.disconnect().await;
    if let Some(path) = &prefs_path {
        if let Err(e) = store.persisted().save(path).await {
            warn!("[dashboard] failed to save prefs: {e}");
        }
    }
    Ok(())
}

fn prefs_path(cfg: &DashboardConfig) -> Option<PathBuf> {
    if let Some(path) = &cfg.prefs_path {
        return Some(path.clone());
    }
    match PersistedPrefs::default_path() {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("[dashboard] prefs will not be saved: {e}");
            None
        }
    }
}

/// Returns false when the user asked to quit.
async fn handle_line(client: &ChannelClient, store: &Store, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let command = match words.next() {
        Some(word) => word,
        None => return true,
    };

    let sent = match command {
        "start" => {
            let dataset_ids: Vec<String> = words.map(str::to_string).collect();
            Some(client.emit(TrainingCommand::Start(StartCommand {
                data: TrainingData { dataset_ids, samples: Vec::new() },
                config: Some(TrainingConfig::default()),
            })))
        }
        "pause" => Some(client.emit(TrainingCommand::Pause)),
        "resume" => Some(client.emit(TrainingCommand::Resume)),
        "stop" => Some(client.emit(TrainingCommand::Stop)),
        "theme" => {
            match words.next() {
                Some("dark") => store.set_theme(Theme::Dark),
                Some("light") => store.set_theme(Theme::Light),
                _ => warn!("[dashboard] usage: theme light|dark"),
            }
            None
        }
        "sidebar" => {
            store.toggle_sidebar();
            None
        }
        "hide" => {
            client.set_visibility(Visibility::Hidden);
            None
        }
        "show" => {
            client.set_visibility(Visibility::Visible);
            None
        }
        "offline" => {
            client.set_network(Network::Offline);
            None
        }
        "online" => {
            client.set_network(Network::Online);
            None
        }
        "connect" => {
            client.connect().await;
            None
        }
        "quit" | "exit" => return false,
        other => {
            warn!("[dashboard] unknown command '{other}'");
            None
        }
    };

    if sent == Some(false) {
        warn!("[dashboard] '{command}' not sent: channel disconnected");
    }
    true
}

async fn render(store: Arc<Store>) {
    let mut rx = store.subscribe();
    let mut shown: HashSet<String> = HashSet::new();
    let mut last_badge = None;

    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();

        let badge = connection_badge(&state.connection);
        if last_badge.as_ref() != Some(&badge) {
            info!("[view] connection: {badge:?}");
            last_badge = Some(badge);
        }

        if let Some(snapshot) = &state.active_training {
            let cards: Vec<String> = snapshot_to_cards(Some(snapshot))
                .iter()
                .map(|c| format!("{}={:.2}", c.key, c.value))
                .collect();
            info!("[view] {} {}", snapshot.model_id, cards.join(" "));
        }

        for row in downloads_to_rows(&state.downloads).iter().filter(|r| !r.done) {
            info!("[view] dataset {} {:.0}%", row.id, row.percent);
        }

        for n in store.visible_notifications(now_ms()) {
            if shown.insert(n.id.clone()) {
                info!("[view] {:?}: {}", n.kind, n.message);
            }
        }
    }
}
