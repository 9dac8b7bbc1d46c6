//! Background L3 Writer
//!
//! Bounded queue drained by a single worker task. Fetches enqueue with
//! `try_send` and never wait; a full queue drops the durable write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::key::Params;
use super::l3::DurableColumnarCache;
use super::metrics::{CacheMetrics, Counter};
use crate::table::Table;

/// One pending durable write
#[derive(Debug, Clone)]
pub struct WriteJob {
    pub namespace: String,
    pub params: Params,
    pub table: Arc<Table>,
}

enum Command {
    Write(WriteJob),
    Flush(oneshot::Sender<()>),
}

/// What to do with queued writes on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Finish every queued write
    #[default]
    Drain,
    /// Drop queued writes; an in-flight write still completes
    Abandon,
}

/// Why a job was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("write queue full")]
    Full,
    #[error("writer shut down")]
    Closed,
}

/// Bounded background writer for the durable tier
pub struct BackgroundWriter {
    tx: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    metrics: Arc<CacheMetrics>,
    capacity: usize,
    queued: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl BackgroundWriter {
    /// Spawn the worker on the current runtime
    pub fn spawn(cache: Arc<DurableColumnarCache>, capacity: usize, metrics: Arc<CacheMetrics>) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let queued = Arc::new(AtomicU64::new(0));
        let completed = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let worker = tokio::spawn(run_worker(
            cache,
            rx,
            cancel.clone(),
            Arc::clone(&metrics),
            Arc::clone(&completed),
            Arc::clone(&failed),
        ));

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            cancel,
            metrics,
            capacity,
            queued,
            completed,
            failed,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Command>> {
        self.tx.lock().clone()
    }

    /// Queue a write without waiting
    pub fn enqueue(&self, job: WriteJob) -> Result<(), EnqueueError> {
        let Some(tx) = self.sender() else {
            self.metrics.incr(Counter::L3WriteDropped);
            return Err(EnqueueError::Closed);
        };
        match tx.try_send(Command::Write(job)) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.incr(Counter::L3WriteDropped);
                Err(EnqueueError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.incr(Counter::L3WriteDropped);
                Err(EnqueueError::Closed)
            }
        }
    }

    /// Wait until every write queued before this call has been processed
    pub async fn flush(&self) {
        let Some(tx) = self.sender() else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Command::Flush(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Stop the worker
    pub async fn shutdown(&self, mode: ShutdownMode) {
        if mode == ShutdownMode::Abandon {
            self.cancel.cancel();
        }
        // Closing the channel lets a draining worker finish and exit
        drop(self.tx.lock().take());

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Background writer task failed");
            }
        }
        let stats = self.stats();
        info!(
            ?mode,
            queued = stats.queued,
            completed = stats.completed,
            failed = stats.failed,
            "Background writer stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().is_some()
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            capacity: self.capacity,
            queued: self.queued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BackgroundWriter {
    fn drop(&mut self) {
        // A dropped writer abandons; call `shutdown` to drain
        self.cancel.cancel();
    }
}

async fn run_worker(
    cache: Arc<DurableColumnarCache>,
    mut rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    metrics: Arc<CacheMetrics>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
) {
    loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = rx.recv() => command,
        };

        match command {
            Some(Command::Write(job)) => {
                match cache.set(&job.namespace, &job.params, job.table).await {
                    Ok(size) => {
                        metrics.incr(Counter::L3Write);
                        completed.fetch_add(1, Ordering::Relaxed);
                        debug!(namespace = %job.namespace, size, "Background write done");
                    }
                    Err(e) => {
                        metrics.incr(Counter::L3Error);
                        metrics.incr(Counter::Error);
                        failed.fetch_add(1, Ordering::Relaxed);
                        error!(namespace = %job.namespace, error = %e, "Background write failed");
                    }
                }
            }
            Some(Command::Flush(ack)) => {
                let _ = ack.send(());
            }
            None => break,
        }
    }
}

/// Background writer statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WriterStats {
    pub capacity: usize,
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Lookup;
    use crate::config::PersistentTierConfig;
    use crate::table::{Column, ColumnData};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn make_job(id: i64) -> WriteJob {
        WriteJob {
            namespace: "games".into(),
            params: Params::from([("id".to_string(), json!(id))]),
            table: Arc::new(
                Table::from_columns(vec![Column::new("n", ColumnData::Int64(vec![Some(id)]))])
                    .unwrap(),
            ),
        }
    }

    async fn make_cache(dir: &std::path::Path) -> Arc<DurableColumnarCache> {
        Arc::new(
            DurableColumnarCache::open(&PersistentTierConfig::new(dir))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_enqueue_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path()).await;
        let metrics = Arc::new(CacheMetrics::new());
        let writer = BackgroundWriter::spawn(Arc::clone(&cache), 8, Arc::clone(&metrics));

        for id in 0..3 {
            writer.enqueue(make_job(id)).unwrap();
        }
        writer.flush().await;

        assert_eq!(writer.stats().completed, 3);
        assert_eq!(metrics.snapshot().l3_writes, 3);
        let job = make_job(2);
        assert_matches!(cache.get(&job.namespace, &job.params).await, Lookup::Hit(_));
        writer.shutdown(ShutdownMode::Drain).await;
    }

    #[tokio::test]
    async fn test_failed_write_counts_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(CacheMetrics::new());
        let writer = BackgroundWriter::spawn(make_cache(dir.path()).await, 8, Arc::clone(&metrics));

        let mut job = make_job(0);
        job.namespace = "../escape".into();
        writer.enqueue(job).unwrap();
        writer.enqueue(make_job(1)).unwrap();
        writer.flush().await;

        let stats = writer.stats();
        assert_eq!((stats.completed, stats.failed), (1, 1));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.l3_errors, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.l3_writes, 1);
        writer.shutdown(ShutdownMode::Drain).await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_write() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(CacheMetrics::new());
        let writer = BackgroundWriter::spawn(make_cache(dir.path()).await, 1, Arc::clone(&metrics));

        // The worker cannot run until this task yields
        writer.enqueue(make_job(0)).unwrap();
        assert_eq!(writer.enqueue(make_job(1)), Err(EnqueueError::Full));
        assert_eq!(metrics.snapshot().l3_writes_dropped, 1);

        writer.shutdown(ShutdownMode::Drain).await;
        assert_eq!(writer.stats().completed, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_drain_finishes_queued_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path()).await;
        let writer = BackgroundWriter::spawn(Arc::clone(&cache), 16, Arc::new(CacheMetrics::new()));
        for id in 0..5 {
            writer.enqueue(make_job(id)).unwrap();
        }
        writer.shutdown(ShutdownMode::Drain).await;

        assert_eq!(writer.stats().completed, 5);
        assert_eq!(cache.list("games").await.unwrap().len(), 5);
        assert!(!writer.is_running());
        assert_eq!(writer.enqueue(make_job(9)), Err(EnqueueError::Closed));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_abandon_drops_queued_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path()).await;
        let writer = BackgroundWriter::spawn(Arc::clone(&cache), 16, Arc::new(CacheMetrics::new()));
        for id in 0..5 {
            writer.enqueue(make_job(id)).unwrap();
        }
        // Cancelled before the worker is ever polled
        writer.shutdown(ShutdownMode::Abandon).await;

        assert_eq!(writer.stats().completed, 0);
        assert!(cache.list("games").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_after_shutdown_returns() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BackgroundWriter::spawn(make_cache(dir.path()).await, 4, Arc::new(CacheMetrics::new()));
        writer.shutdown(ShutdownMode::Drain).await;
        writer.flush().await;
    }
}
