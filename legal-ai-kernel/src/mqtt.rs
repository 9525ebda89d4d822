/**
 * CANAL MQTT - Côté kernel du canal d'événements Legal AI
 *
 * FONCTIONNEMENT :
 * - `MqttSink` publie les ChannelEvent sur le topic d'événements
 *   (`try_publish` non bloquant, le producteur n'attend jamais le broker)
 * - `spawn_mqtt_listener` fait tourner l'event loop rumqttc : (ré)abonnement
 *   au topic de commandes à chaque ConnAck, routage des messages
 *   `training:<commande>` vers le producteur
 */

use crate::config::KernelConfig;
use crate::health::HealthTracker;
use crate::producer::{EventSink, ProgressProducer, SinkError};
use legal_ai_contracts::{
    decode_command, encode_event, ChannelEvent, TrainingCommand, COMMANDS_TOPIC, EVENTS_TOPIC,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::{debug, error, info, warn};

/// Request channel capacity of the rumqttc client. Events are small and
/// spaced by the epoch delay; this only absorbs bursts.
const REQUEST_CAPACITY: usize = 64;

pub fn create_mqtt_client(cfg: &KernelConfig) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, REQUEST_CAPACITY)
}

pub struct MqttSink {
    client: AsyncClient,
}

impl MqttSink {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl EventSink for MqttSink {
    fn publish(&self, event: ChannelEvent) -> Result<(), SinkError> {
        let payload = encode_event(&event).map_err(|e| SinkError::Publish(e.to_string()))?;
        self.client
            .try_publish(EVENTS_TOPIC, QoS::AtLeastOnce, false, payload)
            .map_err(|e| SinkError::Publish(e.to_string()))
    }
}

pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    producer: Arc<ProgressProducer>,
    health: HealthTracker,
) {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("[mqtt] connected, subscribing to {COMMANDS_TOPIC}");
                    health.mark_mqtt_connected();
                    if let Err(e) = client.try_subscribe(COMMANDS_TOPIC, QoS::AtLeastOnce) {
                        error!("[mqtt] subscribe failed: {e:?}");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == COMMANDS_TOPIC => {
                    match decode_command(&p.payload) {
                        Ok(command) => handle_command(&producer, command),
                        Err(e) => warn!("[mqtt] invalid command payload: {e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[mqtt] connection error: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Applies a dashboard command. Failures are logged: the channel has no
/// reply path for commands, the resulting events are the reply.
pub fn handle_command(producer: &Arc<ProgressProducer>, command: TrainingCommand) {
    debug!("[mqtt] command {}", command.name());
    match command {
        TrainingCommand::Start(start) => {
            if let Some(cfg) = start.config.as_ref() {
                if let Err(e) = producer.initialize(cfg) {
                    warn!("[mqtt] training:start rejected: {e}");
                    return;
                }
            }
            if let Err(e) = producer.start_training(start.data, None) {
                warn!("[mqtt] training:start rejected: {e}");
            }
        }
        TrainingCommand::Pause => {
            if !producer.pause_training() {
                debug!("[mqtt] training:pause ignored, no active run");
            }
        }
        TrainingCommand::Resume => {
            if !producer.resume_training() {
                debug!("[mqtt] training:resume ignored, no active run");
            }
        }
        TrainingCommand::Stop => {
            producer.stop_training();
        }
    }
}
