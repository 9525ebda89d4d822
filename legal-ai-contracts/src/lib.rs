/**
 * LEGAL AI CONTRACTS - Shared contract of the training progress channel
 *
 * ROLE:
 * Topics, typed events and the JSON codec used by `legal-ai-kernel`
 * (publisher) and `legal-ai-dashboard` (channel client).
 *
 * TOPICS:
 * - `legal-ai/channel/events@v1`   server → clients, every ChannelEvent
 * - `legal-ai/channel/commands@v1` clients → server, TrainingCommand
 *
 * All events of a run go through one topic: the broker keeps per-topic
 * ordering, which is what gives the strictly increasing epoch order.
 */

pub mod events;

pub use events::{
    AuthFailedPayload, ChannelEvent, CompletedPayload, DownloadProgressPayload, EventName,
    FailedPayload, MetricsPoint, ProgressPayload, StartCommand, StartedPayload, StoppedPayload,
    TrainingCommand, TrainingConfig, TrainingData, TrainingSample,
};

pub const EVENTS_TOPIC: &str = "legal-ai/channel/events@v1";
pub const COMMANDS_TOPIC: &str = "legal-ai/channel/commands@v1";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not UTF-8")]
    NotUtf8,
}

pub fn encode_event(event: &ChannelEvent) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(event)?)
}

pub fn decode_event(payload: &[u8]) -> Result<ChannelEvent, CodecError> {
    let txt = std::str::from_utf8(payload).map_err(|_| CodecError::NotUtf8)?;
    Ok(serde_json::from_str(txt)?)
}

pub fn encode_command(command: &TrainingCommand) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(command)?)
}

pub fn decode_command(payload: &[u8]) -> Result<TrainingCommand, CodecError> {
    let txt = std::str::from_utf8(payload).map_err(|_| CodecError::NotUtf8)?;
    Ok(serde_json::from_str(txt)?)
}

/// Contract name carried by a topic.
/// Ex: "legal-ai/channel/events@v1" -> "events@v1"
pub fn contract_name(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_name() {
        assert_eq!(contract_name(EVENTS_TOPIC), "events@v1");
        assert_eq!(contract_name(COMMANDS_TOPIC), "commands@v1");
        assert_eq!(contract_name("events@v1"), "events@v1");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode_event(&[0xff, 0xfe]), Err(CodecError::NotUtf8)));
        assert!(matches!(decode_event(b"{\"event\":\"nope\"}"), Err(CodecError::Json(_))));
    }

    #[test]
    fn start_command_decodes_with_defaults() {
        let raw = br#"{"event":"training:start","payload":{"data":{"datasetIds":["ds-7"]}}}"#;
        match decode_command(raw).unwrap() {
            TrainingCommand::Start(start) => {
                assert_eq!(start.data.dataset_ids, vec!["ds-7".to_string()]);
                assert!(start.config.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn completed_event_survives_codec() {
        let event = ChannelEvent::TrainingCompleted(CompletedPayload {
            model_id: "m-9".into(),
            history: vec![MetricsPoint {
                epoch: 1,
                loss: 0.5,
                accuracy: 0.4,
                val_loss: Some(0.55),
                val_accuracy: Some(0.37),
            }],
        });
        let bytes = encode_event(&event).unwrap();
        assert_eq!(decode_event(&bytes).unwrap(), event);
    }
}
