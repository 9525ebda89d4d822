/**
 * TÉLÉCHARGEMENTS DE DATASETS - Téléchargements simulés relayés en progression
 *
 * RÔLE :
 * Publie `dataset:download:progress` sur le canal pendant qu'un dataset est
 * "téléchargé" bloc par bloc. Un seul téléchargement par id à la fois.
 */

use crate::producer::EventSink;
use crate::state::{new_state, Shared};
use legal_ai_contracts::{ChannelEvent, DownloadProgressPayload};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DownloadError {
    #[error("dataset {0} is already downloading")]
    AlreadyDownloading(String),
    #[error("dataset size must be positive")]
    EmptyDataset,
}

#[derive(Clone)]
pub struct DatasetDownloads {
    sink: Arc<dyn EventSink>,
    chunk_bytes: u64,
    chunk_delay: Duration,
    active: Shared<HashSet<String>>,
}

impl DatasetDownloads {
    pub fn new(sink: Arc<dyn EventSink>, chunk_bytes: u64, chunk_delay: Duration) -> Self {
        Self {
            sink,
            chunk_bytes: chunk_bytes.max(1),
            chunk_delay,
            active: new_state(HashSet::new()),
        }
    }

    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Starts relaying progress for `id`. The task ends after the event with
    /// `downloaded == total`, or early if the channel refuses an event.
    pub fn start(&self, id: &str, total: u64) -> Result<JoinHandle<()>, DownloadError> {
        if total == 0 {
            return Err(DownloadError::EmptyDataset);
        }
        if !self.active.lock().insert(id.to_string()) {
            return Err(DownloadError::AlreadyDownloading(id.to_string()));
        }

        info!("[datasets] download {id} started ({total} bytes)");
        let this = self.clone();
        let id = id.to_string();
        Ok(tokio::spawn(async move {
            let mut downloaded = 0u64;
            while downloaded < total {
                tokio::time::sleep(this.chunk_delay).await;
                downloaded = (downloaded + this.chunk_bytes).min(total);
                let event = ChannelEvent::DatasetDownloadProgress(DownloadProgressPayload {
                    id: id.clone(),
                    downloaded,
                    total,
                });
                if let Err(e) = this.sink.publish(event) {
                    warn!("[datasets] download {id} aborted: {e}");
                    break;
                }
            }
            this.active.lock().remove(&id);
            info!("[datasets] download {id} finished");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotonic_and_ends_at_total() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let downloads = DatasetDownloads::new(Arc::new(tx), 40, Duration::from_millis(50));

        downloads.start("qavanin-1400", 100).unwrap().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(ChannelEvent::DatasetDownloadProgress(p)) = rx.try_recv() {
            assert_eq!(p.total, 100);
            seen.push(p.downloaded);
        }
        assert_eq!(seen, vec![40, 80, 100]);
        assert!(downloads.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_download_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let downloads = DatasetDownloads::new(Arc::new(tx), 10, Duration::from_millis(50));
        let handle = downloads.start("ds", 30).unwrap();
        assert_eq!(
            downloads.start("ds", 30).unwrap_err(),
            DownloadError::AlreadyDownloading("ds".into())
        );
        assert_eq!(downloads.active(), vec!["ds".to_string()]);
        handle.await.unwrap();
        assert!(downloads.start("ds", 30).is_ok());
    }

    #[test]
    fn zero_sized_dataset_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let downloads = DatasetDownloads::new(Arc::new(tx), 10, Duration::from_millis(50));
        assert_eq!(downloads.start("ds", 0).unwrap_err(), DownloadError::EmptyDataset);
    }
}
