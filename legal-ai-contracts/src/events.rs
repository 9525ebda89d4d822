/**
 * CHANNEL EVENTS - Typed payloads carried on the Legal AI event channel
 *
 * ROLE:
 * Single definition of every event exchanged between the kernel (producer)
 * and the dashboards (channel clients). Both sides depend on this crate so a
 * payload shape mismatch is a compile error, not a silent `undefined`.
 *
 * WIRE FORMAT:
 * Adjacently tagged JSON envelope: `{"event": "training:progress", "payload": {...}}`.
 * Payload fields are camelCase.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One point of the metrics history of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPoint {
    pub epoch: u32,
    pub loss: f64,
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub model_id: String,
    pub epoch: u32,
    /// 0..=100
    pub completion_percentage: f64,
    pub loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedPayload {
    pub model_id: String,
    pub model_type: String,
    pub epochs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPayload {
    pub model_id: String,
    #[serde(default)]
    pub history: Vec<MetricsPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPayload {
    pub model_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedPayload {
    pub model_id: String,
    /// Last epoch whose events were emitted (0 if none).
    pub epoch: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgressPayload {
    pub id: String,
    pub downloaded: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFailedPayload {
    pub reason: String,
}

/// Every event a dashboard can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ChannelEvent {
    #[serde(rename = "training:started")]
    TrainingStarted(StartedPayload),
    #[serde(rename = "training:progress")]
    TrainingProgress(ProgressPayload),
    #[serde(rename = "training:metrics")]
    TrainingMetrics(MetricsPoint),
    #[serde(rename = "training:completed")]
    TrainingCompleted(CompletedPayload),
    #[serde(rename = "training:failed")]
    TrainingFailed(FailedPayload),
    #[serde(rename = "training:stopped")]
    TrainingStopped(StoppedPayload),
    #[serde(rename = "dataset:download:progress")]
    DatasetDownloadProgress(DownloadProgressPayload),
    #[serde(rename = "auth:success")]
    AuthSuccess,
    #[serde(rename = "auth:failed")]
    AuthFailed(AuthFailedPayload),
}

impl ChannelEvent {
    pub fn name(&self) -> EventName {
        match self {
            ChannelEvent::TrainingStarted(_) => EventName::TrainingStarted,
            ChannelEvent::TrainingProgress(_) => EventName::TrainingProgress,
            ChannelEvent::TrainingMetrics(_) => EventName::TrainingMetrics,
            ChannelEvent::TrainingCompleted(_) => EventName::TrainingCompleted,
            ChannelEvent::TrainingFailed(_) => EventName::TrainingFailed,
            ChannelEvent::TrainingStopped(_) => EventName::TrainingStopped,
            ChannelEvent::DatasetDownloadProgress(_) => EventName::DatasetDownloadProgress,
            ChannelEvent::AuthSuccess => EventName::AuthSuccess,
            ChannelEvent::AuthFailed(_) => EventName::AuthFailed,
        }
    }
}

/// Handler registration key. Mirrors the `event` tag of [`ChannelEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    TrainingStarted,
    TrainingProgress,
    TrainingMetrics,
    TrainingCompleted,
    TrainingFailed,
    TrainingStopped,
    DatasetDownloadProgress,
    AuthSuccess,
    AuthFailed,
}

impl EventName {
    pub const ALL: [EventName; 9] = [
        EventName::TrainingStarted,
        EventName::TrainingProgress,
        EventName::TrainingMetrics,
        EventName::TrainingCompleted,
        EventName::TrainingFailed,
        EventName::TrainingStopped,
        EventName::DatasetDownloadProgress,
        EventName::AuthSuccess,
        EventName::AuthFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::TrainingStarted => "training:started",
            EventName::TrainingProgress => "training:progress",
            EventName::TrainingMetrics => "training:metrics",
            EventName::TrainingCompleted => "training:completed",
            EventName::TrainingFailed => "training:failed",
            EventName::TrainingStopped => "training:stopped",
            EventName::DatasetDownloadProgress => "dataset:download:progress",
            EventName::AuthSuccess => "auth:success",
            EventName::AuthFailed => "auth:failed",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown event '{s}'"))
    }
}

/// Run configuration as sent by dashboards and the REST API.
/// Validation lives in the kernel; this is only the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingConfig {
    pub model_type: String,
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub max_sequence_length: u32,
    pub vocab_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Seeds the metric jitter so a run is reproducible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_type: "persian-bert".to_string(),
            epochs: 10,
            batch_size: 32,
            learning_rate: 2e-5,
            validation_split: 0.2,
            max_sequence_length: 512,
            vocab_size: 30_000,
            model_id: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub text: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingData {
    #[serde(default)]
    pub dataset_ids: Vec<String>,
    #[serde(default)]
    pub samples: Vec<TrainingSample>,
}

impl TrainingData {
    pub fn is_empty(&self) -> bool {
        self.dataset_ids.is_empty() && self.samples.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCommand {
    #[serde(default)]
    pub data: TrainingData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<TrainingConfig>,
}

/// Client → server commands (`training:<command>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum TrainingCommand {
    #[serde(rename = "training:start")]
    Start(StartCommand),
    #[serde(rename = "training:pause")]
    Pause,
    #[serde(rename = "training:resume")]
    Resume,
    #[serde(rename = "training:stop")]
    Stop,
}

impl TrainingCommand {
    pub fn name(&self) -> &'static str {
        match self {
            TrainingCommand::Start(_) => "training:start",
            TrainingCommand::Pause => "training:pause",
            TrainingCommand::Resume => "training:resume",
            TrainingCommand::Stop => "training:stop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_envelope_uses_event_tag_and_camel_case() {
        let event = ChannelEvent::TrainingProgress(ProgressPayload {
            model_id: "m-1".into(),
            epoch: 2,
            completion_percentage: 40.0,
            loss: 0.6,
            accuracy: 0.34,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "training:progress");
        assert_eq!(json["payload"]["modelId"], "m-1");
        assert_eq!(json["payload"]["completionPercentage"], 40.0);
    }

    #[test]
    fn metrics_without_validation_fields_parse() {
        let raw = r#"{"event":"training:metrics","payload":{"epoch":1,"loss":0.9,"accuracy":0.2}}"#;
        let event: ChannelEvent = serde_json::from_str(raw).unwrap();
        match event {
            ChannelEvent::TrainingMetrics(point) => {
                assert_eq!(point.epoch, 1);
                assert!(point.val_loss.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn event_names_round_trip_through_from_str() {
        for name in EventName::ALL {
            assert_eq!(name.as_str().parse::<EventName>().unwrap(), name);
        }
        assert!("training:unknown".parse::<EventName>().is_err());
    }

    #[test]
    fn unit_commands_serialize_without_payload() {
        let json = serde_json::to_value(TrainingCommand::Stop).unwrap();
        assert_eq!(json, serde_json::json!({"event": "training:stop"}));
    }

    #[test]
    fn empty_training_data() {
        assert!(TrainingData::default().is_empty());
        let data = TrainingData { dataset_ids: vec!["ds-1".into()], samples: vec![] };
        assert!(!data.is_empty());
    }
}
