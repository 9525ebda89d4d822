/**
 * PRODUCTEUR DE PROGRESSION - Entraînements simulés publiés sur le canal
 *
 * RÔLE :
 * Pilote une seule session d'entraînement simulée à la fois (par instance)
 * et publie sa cadence d'événements sur le canal :
 *   training:started → (training:metrics, training:progress) par époque →
 *   training:completed | training:failed | training:stopped
 *
 * FONCTIONNEMENT :
 * - `initialize()` valide la config et alloue l'état du modèle
 * - `start_training()` vérifie les préconditions puis lance la boucle
 * - la boucle attend `epoch_delay` par époque (coopératif, le serveur HTTP
 *   continue de répondre) et dérive loss/accuracy du ratio d'époque + jitter
 * - stop/pause sont des drapeaux lus aux frontières d'époque
 * - le slot de run est libéré avant l'événement terminal
 *
 * UTILITÉ :
 * 🎯 Alimente les dashboards en métriques fabriquées (aucun calcul réel)
 */

use crate::summaries::{RunOutcomeKind, RunSummary, SummaryLog};
use legal_ai_contracts::{
    ChannelEvent, CompletedPayload, FailedPayload, MetricsPoint, ProgressPayload, StartedPayload,
    StoppedPayload, TrainingConfig, TrainingData,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Amplitude of the uniform jitter added to loss and accuracy.
const JITTER: f64 = 0.05;
const LOSS_FLOOR: f64 = 0.1;
const ACCURACY_CEILING: f64 = 0.95;
const VAL_LOSS_OFFSET: f64 = 0.05;
const VAL_ACCURACY_OFFSET: f64 = 0.03;

// ============ ERRORS ============

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProducerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("producer not initialized")]
    NotInitialized,
    #[error("a training run is already in progress")]
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error("channel closed")]
    Closed,
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Failure inside the epoch loop. Never escapes the run task: it becomes a
/// `training:failed` event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeTrainingError {
    #[error("epoch {epoch}: non-finite {metric}")]
    NonFiniteMetric { epoch: u32, metric: &'static str },
    #[error("epoch {epoch}: {source}")]
    Sink { epoch: u32, source: SinkError },
}

// ============ SINK ============

/// Where channel events go. The kernel publishes on MQTT; tests collect
/// events through an mpsc channel.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ChannelEvent) -> Result<(), SinkError>;
}

impl EventSink for mpsc::UnboundedSender<ChannelEvent> {
    fn publish(&self, event: ChannelEvent) -> Result<(), SinkError> {
        self.send(event).map_err(|_| SinkError::Closed)
    }
}

// ============ CONFIG ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    PersianBert,
    Dora,
    QrAdaptor,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::PersianBert => "persian-bert",
            ModelType::Dora => "dora",
            ModelType::QrAdaptor => "qr-adaptor",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = ProducerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "persian-bert" => Ok(ModelType::PersianBert),
            "dora" => Ok(ModelType::Dora),
            "qr-adaptor" => Ok(ModelType::QrAdaptor),
            other => Err(ProducerError::Configuration(format!("unsupported model type '{other}'"))),
        }
    }
}

/// A `TrainingConfig` that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub model_type: ModelType,
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub max_sequence_length: u32,
    pub vocab_size: u32,
    pub seed: Option<u64>,
}

pub fn validate_config(cfg: &TrainingConfig) -> Result<ValidatedConfig, ProducerError> {
    let model_type: ModelType = cfg.model_type.parse()?;
    let invalid = |field: &str, why: &str| ProducerError::Configuration(format!("{field} {why}"));

    if cfg.epochs == 0 {
        return Err(invalid("epochs", "must be at least 1"));
    }
    if cfg.batch_size == 0 {
        return Err(invalid("batchSize", "must be at least 1"));
    }
    if !(cfg.learning_rate.is_finite() && cfg.learning_rate > 0.0) {
        return Err(invalid("learningRate", "must be a positive number"));
    }
    if !(0.0..1.0).contains(&cfg.validation_split) {
        return Err(invalid("validationSplit", "must be in [0, 1)"));
    }
    if cfg.max_sequence_length == 0 {
        return Err(invalid("maxSequenceLength", "must be at least 1"));
    }
    if cfg.vocab_size == 0 {
        return Err(invalid("vocabSize", "must be at least 1"));
    }

    Ok(ValidatedConfig {
        model_type,
        epochs: cfg.epochs,
        batch_size: cfg.batch_size,
        learning_rate: cfg.learning_rate,
        validation_split: cfg.validation_split,
        max_sequence_length: cfg.max_sequence_length,
        vocab_size: cfg.vocab_size,
        seed: cfg.seed,
    })
}

// ============ STATE ============

/// Stand-in for the model being "trained": identity and hyper-parameters only.
#[derive(Debug, Clone)]
struct ModelState {
    model_id: String,
    config: ValidatedConfig,
}

/// Cooperative control flags of the active run.
#[derive(Default)]
struct RunControl {
    stop: AtomicBool,
    paused: AtomicBool,
    wake: Notify,
}

impl RunControl {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    async fn wait_while_paused(&self) {
        while self.paused.load(Ordering::SeqCst) && !self.stop_requested() {
            self.wake.notified().await;
        }
    }
}

struct ActiveRun {
    run_id: String,
    model_id: String,
    model_type: ModelType,
    epochs: u32,
    epoch: u32,
    control: Arc<RunControl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Uninitialized,
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerStatus {
    pub state: RunState,
    pub model_id: Option<String>,
    pub model_type: Option<ModelType>,
    pub run_id: Option<String>,
    pub epoch: u32,
    pub epochs: u32,
}

/// Terminal result of one run, returned by the run task.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { history: Vec<MetricsPoint> },
    Failed { error: RuntimeTrainingError, epoch: u32 },
    Stopped { epoch: u32 },
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub epoch_delay: Duration,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self { epoch_delay: Duration::from_secs(1) }
    }
}

// ============ PRODUCER ============

pub struct ProgressProducer {
    sink: Arc<dyn EventSink>,
    settings: ProducerSettings,
    summaries: SummaryLog,
    model: Mutex<Option<ModelState>>,
    run: Mutex<Option<ActiveRun>>,
}

impl ProgressProducer {
    pub fn new(sink: Arc<dyn EventSink>, settings: ProducerSettings, summaries: SummaryLog) -> Self {
        Self {
            sink,
            settings,
            summaries,
            model: Mutex::new(None),
            run: Mutex::new(None),
        }
    }

    /// Validates `config` and allocates a fresh model state. Returns the model id.
    pub fn initialize(&self, config: &TrainingConfig) -> Result<String, ProducerError> {
        if self.run.lock().is_some() {
            return Err(ProducerError::AlreadyRunning);
        }
        let validated = validate_config(config)?;
        let model_id = config
            .model_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(
            "[producer] initialized {} model {} ({} epochs, lr {})",
            validated.model_type, model_id, validated.epochs, validated.learning_rate
        );
        *self.model.lock() = Some(ModelState { model_id: model_id.clone(), config: validated });
        Ok(model_id)
    }

    /// Starts a run in a background task.
    ///
    /// Preconditions are checked before anything is spawned or emitted; the
    /// returned handle resolves to the run outcome. `config`, when given,
    /// overrides the initialized hyper-parameters for this run only.
    pub fn start_training(
        self: &Arc<Self>,
        data: TrainingData,
        config: Option<TrainingConfig>,
    ) -> Result<JoinHandle<RunOutcome>, ProducerError> {
        let model = self.model.lock().clone().ok_or(ProducerError::NotInitialized)?;
        let run_config = match config.as_ref() {
            Some(cfg) => validate_config(cfg)?,
            None => model.config.clone(),
        };
        if data.is_empty() {
            return Err(ProducerError::Configuration("training data is empty".into()));
        }

        let control = Arc::new(RunControl::default());
        let run_id = Uuid::new_v4().to_string();
        {
            let mut run = self.run.lock();
            if run.is_some() {
                return Err(ProducerError::AlreadyRunning);
            }
            *run = Some(ActiveRun {
                run_id: run_id.clone(),
                model_id: model.model_id.clone(),
                model_type: run_config.model_type,
                epochs: run_config.epochs,
                epoch: 0,
                control: control.clone(),
            });
        }

        info!(
            "[producer] run {run_id} started for model {} ({} samples, {} datasets)",
            model.model_id,
            data.samples.len(),
            data.dataset_ids.len()
        );

        let producer = Arc::clone(self);
        let plan = RunPlan { run_id, model_id: model.model_id, config: run_config, control };
        Ok(tokio::spawn(async move { producer.run_loop(plan).await }))
    }

    /// Requests the active run to stop at the next epoch boundary. No-op when idle.
    pub fn stop_training(&self) -> bool {
        match self.run.lock().as_ref() {
            Some(run) => {
                run.control.stop.store(true, Ordering::SeqCst);
                run.control.wake.notify_one();
                info!("[producer] stop requested for run {}", run.run_id);
                true
            }
            None => false,
        }
    }

    pub fn pause_training(&self) -> bool {
        match self.run.lock().as_ref() {
            Some(run) => {
                run.control.paused.store(true, Ordering::SeqCst);
                info!("[producer] run {} paused", run.run_id);
                true
            }
            None => false,
        }
    }

    pub fn resume_training(&self) -> bool {
        match self.run.lock().as_ref() {
            Some(run) => {
                run.control.paused.store(false, Ordering::SeqCst);
                run.control.wake.notify_one();
                info!("[producer] run {} resumed", run.run_id);
                true
            }
            None => false,
        }
    }

    pub fn is_training(&self) -> bool {
        self.run.lock().is_some()
    }

    pub fn status(&self) -> ProducerStatus {
        let model = self.model.lock().clone();
        let run = self.run.lock();
        match (run.as_ref(), model) {
            (Some(run), _) => ProducerStatus {
                state: if run.control.paused.load(Ordering::SeqCst) {
                    RunState::Paused
                } else {
                    RunState::Running
                },
                model_id: Some(run.model_id.clone()),
                model_type: Some(run.model_type),
                run_id: Some(run.run_id.clone()),
                epoch: run.epoch,
                epochs: run.epochs,
            },
            (None, Some(model)) => ProducerStatus {
                state: RunState::Idle,
                model_id: Some(model.model_id),
                model_type: Some(model.config.model_type),
                run_id: None,
                epoch: 0,
                epochs: model.config.epochs,
            },
            (None, None) => ProducerStatus {
                state: RunState::Uninitialized,
                model_id: None,
                model_type: None,
                run_id: None,
                epoch: 0,
                epochs: 0,
            },
        }
    }

    async fn run_loop(self: Arc<Self>, plan: RunPlan) -> RunOutcome {
        let _slot = RunSlot { producer: Arc::clone(&self), run_id: plan.run_id.clone() };
        let mut rng = match plan.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut history: Vec<MetricsPoint> = Vec::with_capacity(plan.config.epochs as usize);

        self.publish_quiet(ChannelEvent::TrainingStarted(StartedPayload {
            model_id: plan.model_id.clone(),
            model_type: plan.config.model_type.to_string(),
            epochs: plan.config.epochs,
        }));

        let outcome = self.epochs(&plan, &mut rng, &mut history).await;

        let terminal = match &outcome {
            RunOutcome::Completed { history } => {
                info!("[producer] run {} completed ({} epochs)", plan.run_id, history.len());
                ChannelEvent::TrainingCompleted(CompletedPayload {
                    model_id: plan.model_id.clone(),
                    history: history.clone(),
                })
            }
            RunOutcome::Failed { error, .. } => {
                warn!("[producer] run {} failed: {error}", plan.run_id);
                ChannelEvent::TrainingFailed(FailedPayload {
                    model_id: plan.model_id.clone(),
                    error: error.to_string(),
                })
            }
            RunOutcome::Stopped { epoch } => {
                info!("[producer] run {} stopped after epoch {epoch}", plan.run_id);
                ChannelEvent::TrainingStopped(StoppedPayload {
                    model_id: plan.model_id.clone(),
                    epoch: *epoch,
                })
            }
        };
        // slot is free before the terminal event goes out
        self.release(&plan.run_id);
        self.publish_quiet(terminal);
        self.summaries.record(summarize(&plan, &outcome, &history));
        outcome
    }

    async fn epochs(
        &self,
        plan: &RunPlan,
        rng: &mut StdRng,
        history: &mut Vec<MetricsPoint>,
    ) -> RunOutcome {
        let control = &plan.control;
        let mut last_epoch = 0;

        for epoch in 1..=plan.config.epochs {
            if control.stop_requested() {
                return RunOutcome::Stopped { epoch: last_epoch };
            }
            tokio::time::sleep(self.settings.epoch_delay).await;
            // pause/stop requested during the delay apply before this epoch is emitted
            control.wait_while_paused().await;
            if control.stop_requested() {
                return RunOutcome::Stopped { epoch: last_epoch };
            }

            if let Err(error) = self.emit_epoch(plan, epoch, rng, history) {
                return RunOutcome::Failed { error, epoch };
            }
            last_epoch = epoch;
            if let Some(run) = self.run.lock().as_mut() {
                run.epoch = epoch;
            }
        }

        RunOutcome::Completed { history: history.clone() }
    }

    fn emit_epoch(
        &self,
        plan: &RunPlan,
        epoch: u32,
        rng: &mut StdRng,
        history: &mut Vec<MetricsPoint>,
    ) -> Result<(), RuntimeTrainingError> {
        let point = simulate_epoch(epoch, plan.config.epochs, rng);
        if !point.loss.is_finite() {
            return Err(RuntimeTrainingError::NonFiniteMetric { epoch, metric: "loss" });
        }
        if !point.accuracy.is_finite() {
            return Err(RuntimeTrainingError::NonFiniteMetric { epoch, metric: "accuracy" });
        }

        let sink_err = |source| RuntimeTrainingError::Sink { epoch, source };
        self.sink
            .publish(ChannelEvent::TrainingMetrics(point.clone()))
            .map_err(sink_err)?;
        self.sink
            .publish(ChannelEvent::TrainingProgress(ProgressPayload {
                model_id: plan.model_id.clone(),
                epoch,
                completion_percentage: 100.0 * epoch as f64 / plan.config.epochs as f64,
                loss: point.loss,
                accuracy: point.accuracy,
            }))
            .map_err(sink_err)?;

        debug!(
            "[producer] run {} epoch {epoch}/{} loss {:.4} acc {:.4}",
            plan.run_id, plan.config.epochs, point.loss, point.accuracy
        );
        history.push(point);
        Ok(())
    }

    /// Clears the run slot if it still holds `run_id`.
    fn release(&self, run_id: &str) {
        let mut run = self.run.lock();
        if run.as_ref().is_some_and(|r| r.run_id == run_id) {
            *run = None;
        }
    }

    fn publish_quiet(&self, event: ChannelEvent) {
        let name = event.name();
        if let Err(e) = self.sink.publish(event) {
            warn!("[producer] failed to publish {name}: {e}");
        }
    }
}

struct RunPlan {
    run_id: String,
    model_id: String,
    config: ValidatedConfig,
    control: Arc<RunControl>,
}

/// Frees the run slot if the run task panics before releasing it.
struct RunSlot {
    producer: Arc<ProgressProducer>,
    run_id: String,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.producer.release(&self.run_id);
    }
}

/// Fabricated metrics for `epoch` out of `epochs`.
pub fn simulate_epoch<R: Rng>(epoch: u32, epochs: u32, rng: &mut R) -> MetricsPoint {
    let progress = epoch as f64 / epochs as f64;
    let loss = (1.0 - progress + rng.random_range(-JITTER..JITTER)).max(LOSS_FLOOR);
    let accuracy = (progress * 0.85 + rng.random_range(-JITTER..JITTER))
        .min(ACCURACY_CEILING)
        .max(0.0);
    MetricsPoint {
        epoch,
        loss,
        accuracy,
        val_loss: Some(loss + VAL_LOSS_OFFSET),
        val_accuracy: Some((accuracy - VAL_ACCURACY_OFFSET).max(0.0)),
    }
}

fn summarize(plan: &RunPlan, outcome: &RunOutcome, history: &[MetricsPoint]) -> RunSummary {
    let (kind, error) = match outcome {
        RunOutcome::Completed { .. } => (RunOutcomeKind::Completed, None),
        RunOutcome::Failed { error, .. } => (RunOutcomeKind::Failed, Some(error.to_string())),
        RunOutcome::Stopped { .. } => (RunOutcomeKind::Stopped, None),
    };
    let last = history.last();
    RunSummary {
        run_id: plan.run_id.clone(),
        model_id: plan.model_id.clone(),
        model_type: plan.config.model_type.to_string(),
        epochs_planned: plan.config.epochs,
        epochs_completed: history.len() as u32,
        outcome: kind,
        final_loss: last.map(|p| p.loss),
        final_accuracy: last.map(|p| p.accuracy),
        error,
        finished_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
    }
}
