//! Channel → store wiring.
//!
//! Each server event maps to one or two store actions; connection state
//! transitions are mirrored into the store's connection view. The end of a
//! run (completed, failed or stopped) closes its metrics history, so a client
//! that misses the next `training:started` still charts only the new run.

use crate::channel::{ChannelClient, ChannelError, ConnectionState, Subscription};
use crate::store::{ConnectionView, NotificationKind, Store, TrainingSnapshot};
use legal_ai_contracts::{ChannelEvent, EventName};
use std::sync::Arc;
use tracing::debug;

/// Registers the store handlers on `client`. The returned subscriptions can
/// be used to detach them again.
pub fn bind(client: &ChannelClient, store: Arc<Store>) -> Vec<Subscription> {
    let subscriptions: Vec<Subscription> = EventName::ALL
        .iter()
        .map(|&name| {
            let store = store.clone();
            client.on(name, move |event| apply_event(&store, event))
        })
        .collect();

    client.on_state_change(move |state| apply_connection(&store, state));
    subscriptions
}

pub fn apply_event(store: &Store, event: &ChannelEvent) {
    match event {
        ChannelEvent::TrainingStarted(p) => {
            debug!("[bindings] run {} started ({}, {} epochs)", p.model_id, p.model_type, p.epochs);
            store.clear_metrics();
        }
        ChannelEvent::TrainingProgress(p) => store.set_active_training(Some(TrainingSnapshot::from(p))),
        ChannelEvent::TrainingMetrics(point) => {
            if store.append_metrics(point.clone()) {
                debug!("[bindings] metrics epoch {} opened a new history", point.epoch);
            }
        }
        ChannelEvent::TrainingCompleted(p) => {
            store.finish_run();
            store.add_notification(
                NotificationKind::Success,
                format!("آموزش مدل {} با موفقیت به پایان رسید", p.model_id),
            );
        }
        ChannelEvent::TrainingFailed(p) => {
            store.finish_run();
            store.add_notification(NotificationKind::Error, p.error.clone());
        }
        ChannelEvent::TrainingStopped(p) => {
            store.finish_run();
            store.add_notification(
                NotificationKind::Warning,
                format!("آموزش مدل {} در دوره {} متوقف شد", p.model_id, p.epoch),
            );
        }
        ChannelEvent::DatasetDownloadProgress(p) => {
            let finished = p.downloaded >= p.total;
            store.set_download_progress(p.clone());
            if finished {
                store.add_notification(
                    NotificationKind::Info,
                    format!("دانلود مجموعه‌داده {} کامل شد", p.id),
                );
            }
        }
        ChannelEvent::AuthSuccess => debug!("[bindings] channel authenticated"),
        ChannelEvent::AuthFailed(p) => {
            store.add_notification(NotificationKind::Error, format!("احراز هویت ناموفق بود: {}", p.reason));
        }
    }
}

/// Mirrors the client's connection state. Exhausted retries also raise one
/// error notification.
pub fn apply_connection(store: &Store, state: &ConnectionState) {
    let was_exhausted = store
        .snapshot()
        .connection
        .error
        .as_ref()
        .is_some_and(|e| matches!(e, ChannelError::ExhaustedRetries { .. }));

    store.set_connection(ConnectionView {
        connected: state.connected,
        reconnect_attempt: state.reconnect_attempt,
        error: state.error.clone(),
    });

    if state.is_exhausted() && !was_exhausted {
        store.add_notification(NotificationKind::Error, "اتصال به سرور برقرار نشد");
    }
}
