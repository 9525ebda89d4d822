//! Shared state store of the dashboard.
//!
//! Every mutation goes through an action on [`Store`]; views read a cloned
//! [`DashboardState`] or subscribe to changes. Actions are synchronous and
//! atomic (one `send_if_modified` each), and only notify when something
//! actually changed.

use crate::channel::ChannelError;
use crate::prefs::{PersistedPrefs, Theme};
use legal_ai_contracts::{DownloadProgressPayload, MetricsPoint, ProgressPayload};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

pub const MAX_NOTIFICATIONS: usize = 10;
pub const NOTIFICATION_TTL_MS: i64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub message: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl Notification {
    pub fn is_visible(&self, now_ms: i64) -> bool {
        now_ms - self.timestamp < NOTIFICATION_TTL_MS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSnapshot {
    pub model_id: String,
    /// 0..=100
    pub progress: f64,
    pub epoch: u32,
    pub loss: f64,
    pub accuracy: f64,
}

impl From<&ProgressPayload> for TrainingSnapshot {
    fn from(p: &ProgressPayload) -> Self {
        Self {
            model_id: p.model_id.clone(),
            progress: p.completion_percentage,
            epoch: p.epoch,
            loss: p.loss,
            accuracy: p.accuracy,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionView {
    pub connected: bool,
    pub reconnect_attempt: u32,
    pub error: Option<ChannelError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub connection: ConnectionView,
    pub active_training: Option<TrainingSnapshot>,
    pub notifications: Vec<Notification>,
    pub metrics_history: Vec<MetricsPoint>,
    /// Set once the run behind `metrics_history` has ended.
    pub run_ended: bool,
    /// Downloads still in flight. Finished ones are evicted.
    pub downloads: Vec<DownloadProgressPayload>,
    pub prefs: PersistedPrefs,
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub struct Store {
    tx: watch::Sender<DashboardState>,
}

impl Store {
    /// Session state starts empty; only `prefs` carries over from disk.
    pub fn new(prefs: PersistedPrefs) -> Self {
        let (tx, _) = watch::channel(DashboardState {
            prefs,
            ..DashboardState::default()
        });
        Self { tx }
    }

    pub fn snapshot(&self) -> DashboardState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.tx.subscribe()
    }

    pub fn persisted(&self) -> PersistedPrefs {
        self.tx.borrow().prefs.clone()
    }

    /// Updates the link flags and keeps the current error. The attempt
    /// counter is forced to 0 when connected.
    pub fn set_connection_state(&self, connected: bool, reconnect_attempt: u32) {
        let attempt = if connected { 0 } else { reconnect_attempt };
        self.tx.send_if_modified(|s| {
            let changed = s.connection.connected != connected || s.connection.reconnect_attempt != attempt;
            s.connection.connected = connected;
            s.connection.reconnect_attempt = attempt;
            changed
        });
    }

    /// Replaces the whole connection view. The attempt counter reads 0 while
    /// connected.
    pub fn set_connection(&self, mut view: ConnectionView) {
        if view.connected {
            view.reconnect_attempt = 0;
        }
        self.tx.send_if_modified(|s| {
            if s.connection == view {
                return false;
            }
            s.connection = view;
            true
        });
    }

    /// Replaces the snapshot wholesale; `None` clears it.
    pub fn set_active_training(&self, snapshot: Option<TrainingSnapshot>) {
        self.tx.send_if_modified(|s| {
            if s.active_training == snapshot {
                return false;
            }
            s.active_training = snapshot;
            true
        });
    }

    pub fn add_notification(&self, kind: NotificationKind, message: impl Into<String>) -> String {
        self.add_notification_at(kind, message, now_ms())
    }

    /// Appends a notification stamped `timestamp`, evicting the oldest past
    /// [`MAX_NOTIFICATIONS`]. Returns its id.
    pub fn add_notification_at(
        &self,
        kind: NotificationKind,
        message: impl Into<String>,
        timestamp: i64,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let notification = Notification {
            id: id.clone(),
            kind,
            message: message.into(),
            timestamp,
        };
        self.tx.send_modify(|s| {
            s.notifications.push(notification);
            let overflow = s.notifications.len().saturating_sub(MAX_NOTIFICATIONS);
            s.notifications.drain(..overflow);
        });
        id
    }

    pub fn remove_notification(&self, id: &str) -> bool {
        self.tx.send_if_modified(|s| {
            let before = s.notifications.len();
            s.notifications.retain(|n| n.id != id);
            s.notifications.len() != before
        })
    }

    pub fn clear_notifications(&self) {
        self.tx.send_if_modified(|s| {
            let had = !s.notifications.is_empty();
            s.notifications.clear();
            had
        });
    }

    pub fn visible_notifications(&self, now_ms: i64) -> Vec<Notification> {
        self.tx
            .borrow()
            .notifications
            .iter()
            .filter(|n| n.is_visible(now_ms))
            .cloned()
            .collect()
    }

    /// Clears the snapshot and marks the run as over, so the next metrics
    /// point starts a new history.
    pub fn finish_run(&self) {
        self.tx.send_if_modified(|s| {
            let changed = s.active_training.is_some() || !s.run_ended;
            s.active_training = None;
            s.run_ended = true;
            changed
        });
    }

    /// Appends one point of the current run.
    ///
    /// History only ever holds one run: after [`Store::finish_run`], or when
    /// the epoch does not follow the last stored one, the point starts a
    /// fresh history instead. Returns true when older points were discarded.
    pub fn append_metrics(&self, point: MetricsPoint) -> bool {
        let mut restarted = false;
        self.tx.send_modify(|s| {
            let stale = s.metrics_history.last().is_some_and(|last| point.epoch <= last.epoch);
            if s.run_ended || stale {
                if stale {
                    debug!(
                        "[store] epoch {} after stored epoch {}, starting a new history",
                        point.epoch,
                        s.metrics_history.last().map_or(0, |p| p.epoch)
                    );
                }
                restarted = !s.metrics_history.is_empty();
                s.metrics_history.clear();
                s.run_ended = false;
            }
            s.metrics_history.push(point);
        });
        restarted
    }

    /// Empties the history for a run that is starting.
    pub fn clear_metrics(&self) {
        self.tx.send_if_modified(|s| {
            let changed = !s.metrics_history.is_empty() || s.run_ended;
            s.metrics_history.clear();
            s.run_ended = false;
            changed
        });
    }

    /// Replaces the entry of `progress.id`, or appends it if new. A finished
    /// download is removed.
    pub fn set_download_progress(&self, progress: DownloadProgressPayload) {
        let finished = progress.total > 0 && progress.downloaded >= progress.total;
        self.tx.send_if_modified(|s| {
            let slot = s.downloads.iter().position(|d| d.id == progress.id);
            match slot {
                Some(i) if finished => {
                    s.downloads.remove(i);
                    true
                }
                None if finished => false,
                Some(i) if s.downloads[i] == progress => false,
                Some(i) => {
                    s.downloads[i] = progress;
                    true
                }
                None => {
                    s.downloads.push(progress);
                    true
                }
            }
        });
    }

    pub fn set_theme(&self, theme: Theme) {
        self.tx.send_if_modified(|s| {
            if s.prefs.theme == theme {
                return false;
            }
            s.prefs.theme = theme;
            true
        });
    }

    pub fn toggle_sidebar(&self) {
        self.tx.send_modify(|s| s.prefs.sidebar_open = !s.prefs.sidebar_open);
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(PersistedPrefs::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(epoch: u32) -> MetricsPoint {
        MetricsPoint {
            epoch,
            loss: 1.0 / epoch as f64,
            accuracy: 0.1 * epoch as f64,
            val_loss: None,
            val_accuracy: None,
        }
    }

    #[test]
    fn notifications_keep_the_ten_most_recent() {
        let store = Store::default();
        let ids: Vec<String> = (0..15)
            .map(|i| store.add_notification_at(NotificationKind::Info, format!("n{i}"), i))
            .collect();

        let kept = store.snapshot().notifications;
        assert_eq!(kept.len(), MAX_NOTIFICATIONS);
        let kept_ids: Vec<&str> = kept.iter().map(|n| n.id.as_str()).collect();
        let expected: Vec<&str> = ids[5..].iter().map(String::as_str).collect();
        assert_eq!(kept_ids, expected);
        assert_eq!(kept[0].message, "n5");
    }

    #[test]
    fn notifications_expire_from_view_but_stay_listed() {
        let store = Store::default();
        store.add_notification_at(NotificationKind::Success, "old", 1_000);
        store.add_notification_at(NotificationKind::Error, "new", 4_000);

        let visible = store.visible_notifications(7_000);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].message, "new");
        assert_eq!(store.snapshot().notifications.len(), 2);
    }

    #[test]
    fn remove_and_clear_notifications() {
        let store = Store::default();
        let id = store.add_notification(NotificationKind::Warning, "w");
        store.add_notification(NotificationKind::Info, "i");

        assert!(store.remove_notification(&id));
        assert!(!store.remove_notification(&id));
        assert_eq!(store.snapshot().notifications.len(), 1);
        store.clear_notifications();
        assert!(store.snapshot().notifications.is_empty());
    }

    #[test]
    fn snapshot_is_replaced_not_merged() {
        let store = Store::default();
        let first = TrainingSnapshot {
            model_id: "m1".into(),
            progress: 10.0,
            epoch: 1,
            loss: 0.9,
            accuracy: 0.1,
        };
        let second = TrainingSnapshot {
            model_id: "m2".into(),
            progress: 20.0,
            epoch: 2,
            loss: 0.8,
            accuracy: 0.2,
        };
        store.set_active_training(Some(first));
        store.set_active_training(Some(second.clone()));
        assert_eq!(store.snapshot().active_training, Some(second));
        store.set_active_training(None);
        assert_eq!(store.snapshot().active_training, None);
    }

    fn epochs(store: &Store) -> Vec<u32> {
        store.snapshot().metrics_history.iter().map(|p| p.epoch).collect()
    }

    #[test]
    fn history_epochs_stay_strictly_increasing() {
        let store = Store::default();
        assert!(!store.append_metrics(point(1)));
        assert!(!store.append_metrics(point(2)));
        assert!(!store.append_metrics(point(3)));
        assert_eq!(epochs(&store), vec![1, 2, 3]);

        // a lower epoch belongs to another run
        assert!(store.append_metrics(point(2)));
        assert_eq!(epochs(&store), vec![2]);
        assert!(store.append_metrics(point(2)));
        assert_eq!(epochs(&store), vec![2]);

        store.clear_metrics();
        assert!(!store.append_metrics(point(1)));
        assert_eq!(epochs(&store), vec![1]);
    }

    #[test]
    fn finished_run_is_replaced_by_the_next_points() {
        let store = Store::default();
        for epoch in 1..=3 {
            store.append_metrics(point(epoch));
        }
        store.finish_run();
        assert_eq!(epochs(&store), vec![1, 2, 3]);
        assert!(store.snapshot().run_ended);

        // higher epochs too: the history never mixes two runs
        assert!(store.append_metrics(point(4)));
        assert_eq!(epochs(&store), vec![4]);
        assert!(!store.snapshot().run_ended);
        assert!(!store.append_metrics(point(5)));
        assert_eq!(epochs(&store), vec![4, 5]);
    }

    #[test]
    fn connected_forces_attempt_to_zero() {
        let store = Store::default();
        store.set_connection_state(false, 3);
        assert_eq!(store.snapshot().connection.reconnect_attempt, 3);
        store.set_connection_state(true, 3);
        let conn = store.snapshot().connection;
        assert!(conn.connected);
        assert_eq!(conn.reconnect_attempt, 0);
    }

    #[test]
    fn connection_view_is_replaced_in_one_step() {
        let store = Store::default();
        let mut rx = store.subscribe();
        store.set_connection(ConnectionView {
            connected: false,
            reconnect_attempt: 3,
            error: Some(ChannelError::ExhaustedRetries { attempts: 3 }),
        });
        assert_eq!(store.snapshot().connection.reconnect_attempt, 3);
        rx.borrow_and_update();

        store.set_connection(ConnectionView { connected: true, reconnect_attempt: 3, error: None });
        let seen = rx.borrow_and_update().connection.clone();
        assert_eq!(seen, ConnectionView { connected: true, reconnect_attempt: 0, error: None });

        store.set_connection(ConnectionView { connected: true, reconnect_attempt: 0, error: None });
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn downloads_are_replaced_in_discovery_order() {
        let store = Store::default();
        let progress = |id: &str, downloaded| DownloadProgressPayload {
            id: id.into(),
            downloaded,
            total: 100,
        };
        store.set_download_progress(progress("a", 10));
        store.set_download_progress(progress("b", 5));
        store.set_download_progress(progress("a", 60));

        let downloads = store.snapshot().downloads;
        assert_eq!(downloads, vec![progress("a", 60), progress("b", 5)]);

        store.set_download_progress(progress("a", 100));
        assert_eq!(store.snapshot().downloads, vec![progress("b", 5)]);
        // a late duplicate of the final chunk does not bring it back
        store.set_download_progress(progress("a", 100));
        assert_eq!(store.snapshot().downloads, vec![progress("b", 5)]);
    }

    #[tokio::test]
    async fn subscribers_only_wake_on_change() {
        let store = Store::default();
        let mut rx = store.subscribe();

        store.clear_metrics();
        assert!(!rx.has_changed().unwrap());

        store.set_theme(Theme::Dark);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        store.set_theme(Theme::Dark);
        assert!(!rx.has_changed().unwrap());
        store.toggle_sidebar();
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.persisted(), PersistedPrefs { theme: Theme::Dark, sidebar_open: false });
    }
}
