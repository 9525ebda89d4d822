//! Event channel client.
//!
//! One persistent link to the kernel, owned by a supervisor task. The
//! [`ChannelClient`] handle only sends control messages to it and reads the
//! published [`ConnectionState`]; handler registration is shared with the
//! supervisor through a small registry.
//!
//! Reconnection: after a failed open or an unexpected close the supervisor
//! waits `base_delay * 2^(attempt-1)` and retries, up to `max_attempts`.
//! Past that the state carries [`ChannelError::ExhaustedRetries`] and only an
//! explicit `connect()` starts over.

use crate::transport::{Link, LinkEvent, Transport};
use legal_ai_contracts::{AuthFailedPayload, ChannelEvent, EventName, TrainingCommand};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("network offline")]
    Offline,
    #[error("gave up after {attempts} reconnect attempts")]
    ExhaustedRetries { attempts: u32 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    pub connected: bool,
    pub connecting: bool,
    pub error: Option<ChannelError>,
    pub reconnect_attempt: u32,
}

impl ConnectionState {
    pub fn is_exhausted(&self) -> bool {
        matches!(self.error, Some(ChannelError::ExhaustedRetries { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub base_delay: Duration,
    pub max_attempts: u32,
    /// Opaque auth token presented when the link is opened.
    pub token: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            token: None,
        }
    }
}

/// Delay before the `attempt`-th reconnect (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;
type StateListener = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

struct Registry {
    handlers: Mutex<HashMap<EventName, Vec<(HandlerId, Handler)>>>,
    listeners: Mutex<Vec<StateListener>>,
    next_id: AtomicU64,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<TrainingCommand>>>,
}

impl Registry {
    fn remove(&self, event: EventName, id: Option<HandlerId>) {
        let mut handlers = self.handlers.lock();
        match id {
            None => {
                handlers.remove(&event);
            }
            Some(id) => {
                if let Some(list) = handlers.get_mut(&event) {
                    list.retain(|(hid, _)| *hid != id);
                    if list.is_empty() {
                        handlers.remove(&event);
                    }
                }
            }
        }
    }

    // handlers run on a copy of the list, no lock held
    fn dispatch(&self, event: &ChannelEvent) {
        let name = event.name();
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .get(&name)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!("[channel] handler for {name} panicked");
            }
        }
    }

    fn publish_state(&self, next: &ConnectionState) {
        if *self.state.borrow() == *next {
            return;
        }
        self.state.send_replace(next.clone());
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(next))).is_err() {
                error!("[channel] connection state listener panicked");
            }
        }
    }
}

/// Handle on one registered handler. Dropping it keeps the handler
/// registered; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: HandlerId,
    event: EventName,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn event(&self) -> EventName {
        self.event
    }

    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.event, Some(self.id));
        }
    }
}

enum Control {
    Connect(oneshot::Sender<ConnectionState>),
    Disconnect(oneshot::Sender<()>),
    Visibility(Visibility),
    Network(Network),
}

#[derive(Clone)]
pub struct ChannelClient {
    control: mpsc::UnboundedSender<Control>,
    registry: Arc<Registry>,
}

impl ChannelClient {
    /// Starts the supervisor task on the current runtime. Nothing is opened
    /// until [`ChannelClient::connect`].
    pub fn spawn<T: Transport>(transport: T, config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        let registry = Arc::new(Registry {
            handlers: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            state,
            outbound: Mutex::new(None),
        });
        let (control, control_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            transport: Arc::new(transport),
            config,
            registry: registry.clone(),
            state: ConnectionState::default(),
            offline: false,
            opening: None,
            link: None,
            retry: None,
            waiting: Vec::new(),
        };
        tokio::spawn(supervisor.run(control_rx));

        Self { control, registry }
    }

    /// Opens the link unless already connected or connecting. Resolves with
    /// the state once the attempt settled: connected, or failed with a retry
    /// scheduled.
    pub async fn connect(&self) -> ConnectionState {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Connect(tx)).is_err() {
            return self.state();
        }
        rx.await.unwrap_or_else(|_| self.state())
    }

    /// Cancels any pending reconnect, closes the link and resets the state.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        let _ = self.control.send(Control::Visibility(visibility));
    }

    pub fn set_network(&self, network: Network) {
        let _ = self.control.send(Control::Network(network));
    }

    /// Sends a command to the kernel. `false` when not connected; nothing is
    /// queued for later.
    pub fn emit(&self, command: TrainingCommand) -> bool {
        let outbound = self.registry.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => {
                debug!("[channel] {} dropped, not connected", command.name());
                false
            }
        }
    }

    pub fn on<F>(&self, event: EventName, handler: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .handlers
            .lock()
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            event,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Removes one handler, or every handler of `event` when `id` is `None`.
    pub fn off(&self, event: EventName, id: Option<HandlerId>) {
        self.registry.remove(event, id);
    }

    pub fn handler_count(&self, event: EventName) -> usize {
        self.registry.handlers.lock().get(&event).map_or(0, Vec::len)
    }

    /// Called after every connection state transition, outside any lock.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.registry.listeners.lock().push(Arc::new(listener));
    }

    pub fn state(&self) -> ConnectionState {
        self.registry.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.registry.state.subscribe()
    }
}

type Opening = Pin<Box<dyn Future<Output = Result<Link, ChannelError>> + Send>>;

enum Step {
    Control(Control),
    Opened(Result<Link, ChannelError>),
    Link(Option<LinkEvent>),
    RetryDue,
}

struct Supervisor<T> {
    transport: Arc<T>,
    config: ChannelConfig,
    registry: Arc<Registry>,
    state: ConnectionState,
    offline: bool,
    opening: Option<Opening>,
    link: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    retry: Option<Pin<Box<Sleep>>>,
    waiting: Vec<oneshot::Sender<ConnectionState>>,
}

impl<T: Transport> Supervisor<T> {
    async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>) {
        loop {
            let step = {
                let has_opening = self.opening.is_some();
                let has_link = self.link.is_some();
                let has_retry = self.retry.is_some();
                let opening = &mut self.opening;
                let link = &mut self.link;
                let retry = &mut self.retry;

                tokio::select! {
                    command = control.recv() => match command {
                        Some(command) => Step::Control(command),
                        None => break,
                    },
                    opened = async move {
                        match opening {
                            Some(fut) => fut.await,
                            None => std::future::pending().await,
                        }
                    }, if has_opening => Step::Opened(opened),
                    received = async move {
                        match link {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    }, if has_link => Step::Link(received),
                    _ = async move {
                        match retry {
                            Some(sleep) => sleep.await,
                            None => std::future::pending().await,
                        }
                    }, if has_retry => Step::RetryDue,
                }
            };

            self.apply(step);
            self.registry.publish_state(&self.state);
            if self.opening.is_none() {
                for waiter in self.waiting.drain(..) {
                    let _ = waiter.send(self.state.clone());
                }
            }
        }

        debug!("[channel] client dropped, closing link");
        self.close_link();
    }

    fn apply(&mut self, step: Step) {
        match step {
            Step::Control(Control::Connect(ack)) => {
                self.waiting.push(ack);
                self.request_connect();
            }
            Step::Control(Control::Disconnect(ack)) => {
                info!("[channel] disconnecting");
                self.reset();
                let _ = ack.send(());
            }
            Step::Control(Control::Visibility(Visibility::Hidden)) => {
                info!("[channel] view hidden, suspending link");
                self.reset();
            }
            Step::Control(Control::Visibility(Visibility::Visible)) => self.request_connect(),
            Step::Control(Control::Network(Network::Offline)) => {
                warn!("[channel] network offline, dropping link");
                self.offline = true;
                self.reset();
                self.state.error = Some(ChannelError::Offline);
            }
            Step::Control(Control::Network(Network::Online)) => {
                self.offline = false;
                info!("[channel] network back online");
                self.request_connect();
            }
            Step::Opened(Ok(link)) => self.attach(link),
            Step::Opened(Err(err)) => {
                self.opening = None;
                self.fail(err);
            }
            Step::Link(Some(LinkEvent::Event(event))) => self.registry.dispatch(&event),
            Step::Link(Some(LinkEvent::Closed(reason))) => self.link_lost(reason),
            Step::Link(None) => self.link_lost("link dropped".to_string()),
            Step::RetryDue => {
                self.retry = None;
                self.start_open();
            }
        }
    }

    /// Explicit connects bypass the backoff and start a fresh attempt budget.
    fn request_connect(&mut self) {
        if self.state.connected || self.opening.is_some() {
            debug!("[channel] already connected or connecting");
            return;
        }
        if self.offline {
            debug!("[channel] offline, connect deferred until online");
            return;
        }
        self.retry = None;
        self.state.reconnect_attempt = 0;
        self.start_open();
    }

    fn start_open(&mut self) {
        let transport = self.transport.clone();
        let token = self.config.token.clone();
        self.opening = Some(Box::pin(async move { transport.open(token).await }));
        self.state.connecting = true;
    }

    fn attach(&mut self, link: Link) {
        self.opening = None;
        self.retry = None;
        *self.registry.outbound.lock() = Some(link.outbound);
        self.link = Some(link.inbound);
        self.state = ConnectionState {
            connected: true,
            ..ConnectionState::default()
        };
        info!("[channel] connected");
        if self.config.token.is_some() {
            self.registry.dispatch(&ChannelEvent::AuthSuccess);
        }
    }

    fn fail(&mut self, err: ChannelError) {
        warn!("[channel] connection failed: {err}");
        self.state.connected = false;
        self.state.connecting = false;
        if let ChannelError::Auth(reason) = &err {
            self.registry.dispatch(&ChannelEvent::AuthFailed(AuthFailedPayload {
                reason: reason.clone(),
            }));
        }
        self.state.error = Some(err);
        self.schedule_retry();
    }

    fn link_lost(&mut self, reason: String) {
        warn!("[channel] link closed: {reason}");
        self.close_link();
        self.state.connected = false;
        self.state.connecting = false;
        self.state.error = Some(ChannelError::Connection(reason));
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        if self.offline {
            return;
        }
        let max = self.config.max_attempts;
        let attempt = self.state.reconnect_attempt + 1;
        if attempt > max {
            warn!("[channel] giving up after {max} reconnect attempts");
            self.retry = None;
            self.state.error = Some(ChannelError::ExhaustedRetries { attempts: max });
            return;
        }
        self.state.reconnect_attempt = attempt;
        let delay = backoff_delay(self.config.base_delay, attempt);
        info!("[channel] reconnect attempt {attempt}/{max} in {delay:?}");
        self.retry = Some(Box::pin(tokio::time::sleep(delay)));
    }

    fn close_link(&mut self) {
        self.link = None;
        *self.registry.outbound.lock() = None;
    }

    fn reset(&mut self) {
        self.close_link();
        self.opening = None;
        self.retry = None;
        self.state = ConnectionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use legal_ai_contracts::ProgressPayload;
    use tokio::time::Instant;

    fn config(max_attempts: u32) -> ChannelConfig {
        ChannelConfig {
            base_delay: Duration::from_millis(100),
            max_attempts,
            token: None,
        }
    }

    async fn until(client: &ChannelClient, pred: impl FnMut(&ConnectionState) -> bool) -> ConnectionState {
        let mut rx = client.watch_state();
        let state = rx.wait_for(pred).await.expect("supervisor alive").clone();
        state
    }

    fn progress(epoch: u32) -> ChannelEvent {
        ChannelEvent::TrainingProgress(ProgressPayload {
            model_id: "m".into(),
            epoch,
            completion_percentage: epoch as f64 * 10.0,
            loss: 0.5,
            accuracy: 0.5,
        })
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_back_off_then_give_up() {
        let transport = MockTransport::new();
        transport.fail_all(ChannelError::Connection("refused".into()));
        let client = ChannelClient::spawn(transport.clone(), config(3));

        let first = client.connect().await;
        assert!(!first.connected);
        assert_eq!(first.reconnect_attempt, 1);

        let last = until(&client, |s| s.is_exhausted()).await;
        assert_eq!(
            last,
            ConnectionState {
                connected: false,
                connecting: false,
                error: Some(ChannelError::ExhaustedRetries { attempts: 3 }),
                reconnect_attempt: 3,
            }
        );

        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 4);
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1].at - w[0].at).collect();
        assert_eq!(
            gaps,
            vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.attempts().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_exhausted_retries_starts_over() {
        let transport = MockTransport::new();
        transport.fail_all(ChannelError::Connection("refused".into()));
        let client = ChannelClient::spawn(transport.clone(), config(2));

        client.connect().await;
        until(&client, |s| s.is_exhausted()).await;
        assert_eq!(transport.attempts().len(), 3);

        let asked_at = Instant::now();
        let again = client.connect().await;
        assert_eq!(again.reconnect_attempt, 1);
        assert_eq!(again.error, Some(ChannelError::Connection("refused".into())));
        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 4);
        assert_eq!(attempts[3].at, asked_at);

        // a whole new budget of two retries
        until(&client, |s| s.is_exhausted()).await;
        assert_eq!(transport.attempts().len(), 6);

        transport.accept_all();
        let state = client.connect().await;
        assert!(state.connected);
        assert_eq!(state.reconnect_attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_during_backoff_bypasses_delay() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push_outcome(Err(ChannelError::Connection("refused".into())));
        }
        let client = ChannelClient::spawn(transport.clone(), config(5));

        assert_eq!(client.connect().await.reconnect_attempt, 1);
        until(&client, |s| s.reconnect_attempt == 2 && !s.connecting).await;

        // the 200ms backoff is pending; connect opens right away
        let asked_at = Instant::now();
        let state = client.connect().await;
        assert_eq!(state.reconnect_attempt, 1);
        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[2].at, asked_at);

        let connected = until(&client, |s| s.connected).await;
        assert_eq!(connected.reconnect_attempt, 0);
        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 4);
        assert_eq!(attempts[3].at - attempts[2].at, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_the_counter() {
        let transport = MockTransport::new();
        transport.push_outcome(Err(ChannelError::Connection("boom".into())));
        let client = ChannelClient::spawn(transport.clone(), config(5));

        assert_eq!(client.connect().await.reconnect_attempt, 1);
        let state = until(&client, |s| s.connected).await;
        assert_eq!(state.reconnect_attempt, 0);
        assert_eq!(state.error, None);
        assert_eq!(transport.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let transport = MockTransport::new();
        let client = ChannelClient::spawn(transport.clone(), config(3));

        let (a, b) = tokio::join!(client.connect(), client.connect());
        assert!(a.connected && b.connected);
        assert!(client.connect().await.connected);
        assert_eq!(transport.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_safe_and_resets() {
        let transport = MockTransport::new();
        let client = ChannelClient::spawn(transport.clone(), config(3));

        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::default());

        client.connect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::default());
        assert!(!transport.link_open());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let transport = MockTransport::new();
        transport.fail_all(ChannelError::Connection("refused".into()));
        let client = ChannelClient::spawn(transport.clone(), config(5));

        client.connect().await;
        client.disconnect().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(transport.attempts().len(), 1);
        assert_eq!(client.state(), ConnectionState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_after_base_delay() {
        let transport = MockTransport::new();
        let client = ChannelClient::spawn(transport.clone(), config(3));
        client.connect().await;

        assert!(transport.drop_link("server restart"));
        let lost = until(&client, |s| !s.connected).await;
        assert_eq!(lost.error, Some(ChannelError::Connection("server restart".into())));
        assert_eq!(lost.reconnect_attempt, 1);

        until(&client, |s| s.connected).await;
        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].at - attempts[0].at, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_receive_events_until_unsubscribed() {
        let transport = MockTransport::new();
        let client = ChannelClient::spawn(transport.clone(), config(3));
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let (barrier_tx, mut barrier) = mpsc::unbounded_channel();

        let sub = client.on(EventName::TrainingProgress, move |e| {
            let _ = seen_tx.send(e.clone());
        });
        client.on(EventName::TrainingProgress, move |_| {
            let _ = barrier_tx.send(());
        });
        client.connect().await;

        assert!(transport.deliver(progress(1)));
        assert_eq!(seen.recv().await, Some(progress(1)));
        barrier.recv().await;

        sub.unsubscribe();
        assert_eq!(client.handler_count(EventName::TrainingProgress), 1);
        assert!(transport.deliver(progress(2)));
        barrier.recv().await;
        assert!(seen.try_recv().is_err());

        client.off(EventName::TrainingProgress, None);
        assert_eq!(client.handler_count(EventName::TrainingProgress), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_does_not_stop_dispatch() {
        let transport = MockTransport::new();
        let client = ChannelClient::spawn(transport.clone(), config(3));
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on(EventName::TrainingProgress, |_| panic!("view crashed"));
        client.on(EventName::TrainingProgress, move |e| {
            let _ = tx.send(e.clone());
        });
        client.connect().await;

        transport.deliver(progress(1));
        transport.deliver(progress(2));
        assert_eq!(rx.recv().await, Some(progress(1)));
        assert_eq!(rx.recv().await, Some(progress(2)));
        assert!(client.state().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn emit_requires_a_live_link() {
        let transport = MockTransport::new();
        let client = ChannelClient::spawn(transport.clone(), config(3));

        assert!(!client.emit(TrainingCommand::Pause));
        client.connect().await;
        assert!(client.emit(TrainingCommand::Pause));
        assert!(client.emit(TrainingCommand::Stop));
        assert_eq!(transport.sent_commands(), vec![TrainingCommand::Pause, TrainingCommand::Stop]);

        client.disconnect().await;
        assert!(!client.emit(TrainingCommand::Resume));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_drops_link_without_retrying() {
        let transport = MockTransport::new();
        let client = ChannelClient::spawn(transport.clone(), config(3));
        client.connect().await;

        client.set_network(Network::Offline);
        let state = until(&client, |s| s.error == Some(ChannelError::Offline)).await;
        assert!(!state.connected);
        assert!(!client.emit(TrainingCommand::Stop));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.attempts().len(), 1);

        client.set_network(Network::Online);
        let state = until(&client, |s| s.connected).await;
        assert_eq!(state.reconnect_attempt, 0);
        assert_eq!(transport.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_view_suspends_and_visible_resumes() {
        let transport = MockTransport::new();
        let client = ChannelClient::spawn(transport.clone(), config(3));
        client.connect().await;

        client.set_visibility(Visibility::Hidden);
        until(&client, |s| !s.connected).await;
        assert_eq!(client.state(), ConnectionState::default());

        client.set_visibility(Visibility::Visible);
        until(&client, |s| s.connected).await;
        client.set_visibility(Visibility::Visible);
        client.connect().await;
        assert_eq!(transport.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credentials_emit_auth_failed_then_retry() {
        let transport = MockTransport::new();
        transport.push_outcome(Err(ChannelError::Auth("NotAuthorized".into())));
        let client = ChannelClient::spawn(
            transport.clone(),
            ChannelConfig { token: Some("jwt-token".into()), ..config(3) },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        for name in [EventName::AuthFailed, EventName::AuthSuccess] {
            let tx = tx.clone();
            client.on(name, move |e| {
                let _ = tx.send(e.clone());
            });
        }

        let state = client.connect().await;
        assert_eq!(state.error, Some(ChannelError::Auth("NotAuthorized".into())));
        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::AuthFailed(AuthFailedPayload { reason: "NotAuthorized".into() }))
        );

        until(&client, |s| s.connected).await;
        assert_eq!(rx.recv().await, Some(ChannelEvent::AuthSuccess));
        assert!(transport
            .attempts()
            .iter()
            .all(|a| a.credentials.as_deref() == Some("jwt-token")));
    }

    #[tokio::test(start_paused = true)]
    async fn state_listeners_see_transitions() {
        let transport = MockTransport::new();
        let client = ChannelClient::spawn(transport.clone(), config(3));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.on_state_change(move |s| sink.lock().push(s.clone()));

        client.connect().await;
        client.disconnect().await;

        let seen = seen.lock();
        assert!(seen.iter().any(|s| s.connecting));
        assert!(seen.iter().any(|s| s.connected));
        assert_eq!(seen.last(), Some(&ConnectionState::default()));
    }
}
