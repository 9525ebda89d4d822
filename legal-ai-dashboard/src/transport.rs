//! Link layer of the event channel.
//!
//! A [`Transport`] opens one [`Link`]: a stream of inbound [`LinkEvent`]s and
//! a sender for outbound commands. The channel client owns reconnection, so a
//! transport never retries on its own. A link that dies reports
//! `LinkEvent::Closed` once and then goes quiet.

use crate::channel::ChannelError;
use legal_ai_contracts::{
    decode_event, encode_command, ChannelEvent, TrainingCommand, COMMANDS_TOPIC, EVENTS_TOPIC,
};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, Incoming, MqttOptions, QoS,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Event(ChannelEvent),
    Closed(String),
}

#[derive(Debug)]
pub struct Link {
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
    pub outbound: mpsc::UnboundedSender<TrainingCommand>,
}

pub trait Transport: Send + Sync + 'static {
    /// Opens a link, presenting `credentials` if any. Resolves once the
    /// server acknowledged the connection.
    fn open(
        &self,
        credentials: Option<String>,
    ) -> impl Future<Output = Result<Link, ChannelError>> + Send;
}

#[derive(Debug, Clone)]
pub struct MqttTransport {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub connect_timeout: Duration,
}

impl MqttTransport {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    fn options(&self, credentials: Option<String>) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.host, self.port);
        opts.set_keep_alive(Duration::from_secs(15));
        opts.set_clean_session(true);
        if let Some(token) = credentials {
            opts.set_credentials(&self.client_id, token);
        }
        opts
    }
}

fn refused(code: ConnectReturnCode) -> ChannelError {
    match code {
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            ChannelError::Auth(format!("{code:?}"))
        }
        other => ChannelError::Connection(format!("refused: {other:?}")),
    }
}

impl Transport for MqttTransport {
    async fn open(&self, credentials: Option<String>) -> Result<Link, ChannelError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(credentials), 32);

        let acked = tokio::time::timeout(self.connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => return Ok(ack.code),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match acked {
            Err(_) => {
                return Err(ChannelError::Connection(format!(
                    "no ConnAck from {}:{} within {:?}",
                    self.host, self.port, self.connect_timeout
                )))
            }
            Ok(Err(ConnectionError::ConnectionRefused(code))) => return Err(refused(code)),
            Ok(Err(e)) => return Err(ChannelError::Connection(e.to_string())),
            Ok(Ok(ConnectReturnCode::Success)) => {}
            Ok(Ok(code)) => return Err(refused(code)),
        }

        client
            .try_subscribe(EVENTS_TOPIC, QoS::AtLeastOnce)
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        info!("[mqtt] connected to {}:{}, listening on {EVENTS_TOPIC}", self.host, self.port);

        let (in_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, mut out_rx) = mpsc::unbounded_channel::<TrainingCommand>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    polled = eventloop.poll() => match polled {
                        Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == EVENTS_TOPIC => {
                            match decode_event(&p.payload) {
                                Ok(event) => {
                                    if in_tx.send(LinkEvent::Event(event)).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("[mqtt] dropping malformed event: {e}"),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let _ = in_tx.send(LinkEvent::Closed(e.to_string()));
                            break;
                        }
                    },
                    command = out_rx.recv() => match command {
                        Some(command) => match encode_command(&command) {
                            Ok(payload) => {
                                if let Err(e) = client.try_publish(COMMANDS_TOPIC, QoS::AtLeastOnce, false, payload) {
                                    warn!("[mqtt] failed to publish {}: {e}", command.name());
                                }
                            }
                            Err(e) => warn!("[mqtt] failed to encode {}: {e}", command.name()),
                        },
                        // the client dropped the link
                        None => break,
                    },
                }
            }
            let _ = client.try_disconnect();
            debug!("[mqtt] link pump stopped");
        });

        Ok(Link { inbound, outbound })
    }
}

pub mod mock {
    //! Scripted transport for running the channel client without a broker.

    use super::{Link, LinkEvent, Transport};
    use crate::channel::ChannelError;
    use legal_ai_contracts::{ChannelEvent, TrainingCommand};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[derive(Debug, Clone)]
    pub struct OpenAttempt {
        pub at: Instant,
        pub credentials: Option<String>,
    }

    #[derive(Default)]
    struct MockState {
        script: VecDeque<Result<(), ChannelError>>,
        fallback: Option<ChannelError>,
        attempts: Vec<OpenAttempt>,
        inbound: Option<mpsc::UnboundedSender<LinkEvent>>,
        outbound: Option<mpsc::UnboundedReceiver<TrainingCommand>>,
        sent: Vec<TrainingCommand>,
    }

    /// Opens succeed unless scripted otherwise. Cloning shares the script.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues the outcome of the next unscripted open.
        pub fn push_outcome(&self, outcome: Result<(), ChannelError>) {
            self.state.lock().script.push_back(outcome);
        }

        /// Every open past the script fails with `err`.
        pub fn fail_all(&self, err: ChannelError) {
            self.state.lock().fallback = Some(err);
        }

        pub fn accept_all(&self) {
            self.state.lock().fallback = None;
        }

        pub fn attempts(&self) -> Vec<OpenAttempt> {
            self.state.lock().attempts.clone()
        }

        /// Simulates a server event on the live link.
        pub fn deliver(&self, event: ChannelEvent) -> bool {
            self.state
                .lock()
                .inbound
                .as_ref()
                .is_some_and(|tx| tx.send(LinkEvent::Event(event)).is_ok())
        }

        /// Simulates the server side closing the live link.
        pub fn drop_link(&self, reason: &str) -> bool {
            let tx = self.state.lock().inbound.take();
            tx.is_some_and(|tx| tx.send(LinkEvent::Closed(reason.to_string())).is_ok())
        }

        /// True while the client still holds the live link.
        pub fn link_open(&self) -> bool {
            self.state.lock().inbound.as_ref().is_some_and(|tx| !tx.is_closed())
        }

        /// Commands the client emitted on any link so far.
        pub fn sent_commands(&self) -> Vec<TrainingCommand> {
            let mut state = self.state.lock();
            if let Some(mut rx) = state.outbound.take() {
                while let Ok(cmd) = rx.try_recv() {
                    state.sent.push(cmd);
                }
                state.outbound = Some(rx);
            }
            state.sent.clone()
        }
    }

    impl Transport for MockTransport {
        async fn open(&self, credentials: Option<String>) -> Result<Link, ChannelError> {
            let mut state = self.state.lock();
            state.attempts.push(OpenAttempt { at: Instant::now(), credentials });

            let outcome = match state.script.pop_front() {
                Some(outcome) => outcome,
                None => match &state.fallback {
                    Some(err) => Err(err.clone()),
                    None => Ok(()),
                },
            };
            outcome?;

            // keep what the previous link sent before replacing it
            if let Some(mut rx) = state.outbound.take() {
                while let Ok(cmd) = rx.try_recv() {
                    state.sent.push(cmd);
                }
            }
            let (in_tx, inbound) = mpsc::unbounded_channel();
            let (outbound, out_rx) = mpsc::unbounded_channel();
            state.inbound = Some(in_tx);
            state.outbound = Some(out_rx);
            Ok(Link { inbound, outbound })
        }
    }
}
