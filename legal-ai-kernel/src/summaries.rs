/**
 * RÉSUMÉS DE RUNS - Journal durable des entraînements terminés
 *
 * RÔLE :
 * Collaborateur de persistance du producteur. Le producteur appelle seulement
 * `record()` sans jamais attendre le disque : l'écriture part dans une tâche
 * et un échec est journalisé, jamais propagé.
 *
 * STOCKAGE :
 * - un fichier JSON (tableau), réécrit en entier à chaque enregistrement
 * - borné aux MAX_SUMMARIES runs les plus récents (les plus anciens sont évincés)
 * - lecture paginée via `page(offset, limit)`
 */

use crate::state::{new_state, snapshot, Shared};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs kept in memory and on disk.
pub const MAX_SUMMARIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcomeKind {
    Completed,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub model_id: String,
    pub model_type: String,
    pub epochs_planned: u32,
    pub epochs_completed: u32,
    pub outcome: RunOutcomeKind,
    pub final_loss: Option<f64>,
    pub final_accuracy: Option<f64>,
    pub error: Option<String>,
    pub finished_at: String, // RFC3339
}

#[derive(Clone)]
pub struct SummaryLog {
    path: Option<PathBuf>,
    entries: Shared<Vec<RunSummary>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SummaryLog {
    /// In-memory only (tests, or when the data dir is unusable).
    pub fn in_memory() -> Self {
        Self { path: None, entries: new_state(Vec::new()), write_lock: Arc::default() }
    }

    /// Loads existing summaries from `path`, starting fresh if absent.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let mut list: Vec<RunSummary> = serde_json::from_str(&content)?;
            evict_oldest(&mut list);
            info!("[summaries] loaded {} run summaries from {}", list.len(), path.display());
            list
        } else {
            info!("[summaries] no existing summaries file, starting fresh");
            Vec::new()
        };
        Ok(Self { path: Some(path), entries: new_state(entries), write_lock: Arc::default() })
    }

    /// Fire-and-forget: appends in memory now, persists in the background.
    pub fn record(&self, summary: RunSummary) {
        debug!("[summaries] recording run {} ({:?})", summary.run_id, summary.outcome);
        {
            let mut entries = self.entries.lock();
            entries.push(summary);
            evict_oldest(&mut entries);
        }
        let Some(path) = self.path.clone() else { return };
        let entries = self.entries.clone();
        let write_lock = self.write_lock.clone();
        tokio::spawn(async move {
            // each writer dumps the latest list, so the last one to run wins with everything
            let _guard = write_lock.lock().await;
            let content = match serde_json::to_string_pretty(&snapshot(&entries)) {
                Ok(c) => c,
                Err(e) => {
                    warn!("[summaries] failed to serialize summaries: {e}");
                    return;
                }
            };
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!("[summaries] failed to create {}: {e}", parent.display());
                    return;
                }
            }
            if let Err(e) = tokio::fs::write(&path, content).await {
                warn!("[summaries] failed to write {}: {e}", path.display());
            }
        });
    }

    /// Up to `limit` summaries starting at `offset`, oldest first.
    pub fn page(&self, offset: usize, limit: usize) -> Vec<RunSummary> {
        self.entries.lock().iter().skip(offset).take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

fn evict_oldest(entries: &mut Vec<RunSummary>) {
    let overflow = entries.len().saturating_sub(MAX_SUMMARIES);
    entries.drain(..overflow);
}
