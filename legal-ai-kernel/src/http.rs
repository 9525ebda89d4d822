/**
 * API REST - Surface admin du kernel Legal AI
 *
 * ROUTES :
 * - GET  /health                    liveness, sans auth
 * - GET  /system/health             santé du kernel (uptime, mqtt, état d'entraînement)
 * - POST /training/initialize       valide la config + alloue le modèle
 * - POST /training/start            lance un run (409 si un run est actif)
 * - POST /training/pause|resume|stop
 * - GET  /training/status
 * - GET  /training/summaries        runs terminés (?offset=&limit=)
 * - POST /datasets/{id}/download    téléchargement simulé avec événements de progression
 * - GET  /datasets/downloads        ids en cours de téléchargement
 *
 * SÉCURITÉ :
 * - Header x-api-key égal à LEGAL_AI_API_KEY sur toutes les routes sauf /health
 * - Pas de clé configurée = tout sauf /health est refusé
 */

use crate::datasets::{DatasetDownloads, DownloadError};
use crate::health::{HealthTracker, KernelHealth};
use crate::producer::{ProducerError, ProducerStatus, ProgressProducer};
use crate::summaries::{RunSummary, SummaryLog, MAX_SUMMARIES};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use legal_ai_contracts::{TrainingConfig, TrainingData};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<ProgressProducer>,
    pub health: HealthTracker,
    pub summaries: SummaryLog,
    pub downloads: DatasetDownloads,
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("LEGAL_AI_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("[http] LEGAL_AI_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/training/initialize", post(initialize))
        .route("/training/start", post(start))
        .route("/training/pause", post(pause))
        .route("/training/resume", post(resume))
        .route("/training/stop", post(stop))
        .route("/training/status", get(status))
        .route("/training/summaries", get(summaries))
        .route("/datasets/{id}/download", post(download))
        .route("/datasets/downloads", get(active_downloads))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

pub fn status_for(err: &ProducerError) -> StatusCode {
    match err {
        ProducerError::Configuration(_) => StatusCode::BAD_REQUEST,
        ProducerError::NotInitialized => StatusCode::PRECONDITION_FAILED,
        ProducerError::AlreadyRunning => StatusCode::CONFLICT,
    }
}

fn reject(code: StatusCode, msg: impl ToString) -> (StatusCode, Json<Value>) {
    (code, Json(json!({ "ok": false, "error": msg.to_string() })))
}

fn producer_error(err: ProducerError) -> (StatusCode, Json<Value>) {
    reject(status_for(&err), err)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.producer, &app.summaries))
}

// POST /training/initialize
async fn initialize(State(app): State<AppState>, Json(cfg): Json<TrainingConfig>) -> ApiResult {
    let model_id = app.producer.initialize(&cfg).map_err(producer_error)?;
    Ok(Json(json!({ "ok": true, "modelId": model_id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBody {
    #[serde(default)]
    data: TrainingData,
    #[serde(default)]
    config: Option<TrainingConfig>,
}

// POST /training/start
async fn start(State(app): State<AppState>, Json(body): Json<StartBody>) -> ApiResult {
    // the run task outlives the request; its outcome goes out as channel events
    let _handle = app
        .producer
        .start_training(body.data, body.config)
        .map_err(producer_error)?;
    Ok(Json(json!({ "ok": true, "status": app.producer.status() })))
}

async fn pause(State(app): State<AppState>) -> Json<Value> {
    Json(json!({ "ok": app.producer.pause_training() }))
}

async fn resume(State(app): State<AppState>) -> Json<Value> {
    Json(json!({ "ok": app.producer.resume_training() }))
}

// stop is idempotent: 200 even without a run, `stopping` tells if one was signalled
async fn stop(State(app): State<AppState>) -> Json<Value> {
    Json(json!({ "ok": true, "stopping": app.producer.stop_training() }))
}

async fn status(State(app): State<AppState>) -> Json<ProducerStatus> {
    Json(app.producer.status())
}

const DEFAULT_PAGE: usize = 50;

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

impl PageQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE).min(MAX_SUMMARIES)
    }
}

// GET /training/summaries?offset=&limit=
async fn summaries(State(app): State<AppState>, Query(page): Query<PageQuery>) -> Json<Vec<RunSummary>> {
    Json(app.summaries.page(page.offset, page.limit()))
}

#[derive(Debug, Deserialize)]
struct DownloadBody {
    total: u64,
}

// POST /datasets/{id}/download
async fn download(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DownloadBody>,
) -> ApiResult {
    match app.downloads.start(&id, body.total) {
        Ok(_) => Ok(Json(json!({ "ok": true, "id": id }))),
        Err(e @ DownloadError::AlreadyDownloading(_)) => Err(reject(StatusCode::CONFLICT, e)),
        Err(e @ DownloadError::EmptyDataset) => Err(reject(StatusCode::BAD_REQUEST, e)),
    }
}

async fn active_downloads(State(app): State<AppState>) -> Json<Vec<String>> {
    Json(app.downloads.active())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_errors_map_to_http_codes() {
        assert_eq!(status_for(&ProducerError::Configuration("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ProducerError::NotInitialized), StatusCode::PRECONDITION_FAILED);
        assert_eq!(status_for(&ProducerError::AlreadyRunning), StatusCode::CONFLICT);
    }

    #[test]
    fn summary_page_defaults_and_clamps() {
        let page: PageQuery = serde_json::from_str("{}").unwrap();
        assert_eq!((page.offset, page.limit()), (0, DEFAULT_PAGE));
        let page = PageQuery { offset: 3, limit: Some(100_000) };
        assert_eq!(page.limit(), MAX_SUMMARIES);
    }

    #[test]
    fn start_body_accepts_missing_fields() {
        let body: StartBody = serde_json::from_str("{}").unwrap();
        assert!(body.data.is_empty());
        assert!(body.config.is_none());
        let body: StartBody =
            serde_json::from_str(r#"{"data":{"datasetIds":["d1"]},"config":{"modelType":"dora","epochs":2,"batchSize":8,"learningRate":0.001,"validationSplit":0.1,"maxSequenceLength":128,"vocabSize":1000}}"#)
                .unwrap();
        assert_eq!(body.config.unwrap().model_type, "dora");
    }
}
