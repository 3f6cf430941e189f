use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{debug, error, info, warn};

use crate::conf::BulkConfig;
use crate::error::{Result, StorageError};
use crate::es_client::EsClient;
use crate::models::bulk::{BulkOperation, BulkResponse};

const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_RETRIES: usize = 3;
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Where batches land once they flush. The pipeline only needs this one
/// call, which keeps it runnable against an in-memory sink in tests.
#[async_trait]
pub trait BulkSink: Send + Sync + 'static {
    async fn submit_batch(&self, operations: &[BulkOperation]) -> Result<BulkResponse>;
}

#[async_trait]
impl BulkSink for EsClient {
    async fn submit_batch(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        self.bulk(operations).await
    }
}

/// Per-batch outcome published on the observer channel. Enqueue callers
/// never see these; logging and metrics consumers subscribe instead.
#[derive(Debug, Clone)]
pub enum BulkReport {
    /// Whole batch accepted by the store.
    Flushed {
        execution_id: u64,
        size: usize,
        took_ms: u64,
    },
    /// The submission went through but some documents were rejected.
    PartialFailure {
        execution_id: u64,
        size: usize,
        failed: usize,
    },
    /// Retries exhausted; the documents in this batch are dropped.
    Terminal {
        execution_id: u64,
        size: usize,
        reason: String,
    },
}

struct Batch {
    execution_id: u64,
    operations: Vec<BulkOperation>,
}

/// Asynchronous write pipeline: callers enqueue operations and return
/// immediately; a collector groups them into batches that flush when the
/// action threshold is reached or the flush interval elapses, and a fixed
/// set of workers submits batches with bounded exponential-backoff retry.
pub struct BulkProcessor {
    operations_tx: RwLock<Option<mpsc::Sender<BulkOperation>>>,
    reports_tx: broadcast::Sender<BulkReport>,
    collector: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BulkProcessor {
    pub fn spawn<S: BulkSink>(sink: Arc<S>, config: &BulkConfig) -> Self {
        let bulk_actions = config.get_bulk_actions().max(1);
        let concurrent_requests = config.get_concurrent_requests().max(1);
        let flush_interval = Duration::from_secs(config.get_flush_interval_seconds().max(1));

        let (operations_tx, operations_rx) = mpsc::channel(bulk_actions * 2);
        let (batches_tx, batches_rx) = mpsc::channel::<Batch>(concurrent_requests);
        let (reports_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        let collector = tokio::spawn(collect_batches(
            operations_rx,
            batches_tx,
            bulk_actions,
            flush_interval,
        ));

        let batches_rx = Arc::new(Mutex::new(batches_rx));
        let mut workers = Vec::with_capacity(concurrent_requests);
        for _ in 0..concurrent_requests {
            workers.push(tokio::spawn(run_worker(
                Arc::clone(&sink),
                Arc::clone(&batches_rx),
                reports_tx.clone(),
            )));
        }

        info!(
            "bulk pipeline started: {} actions per batch, {}s flush interval, {} concurrent requests",
            bulk_actions,
            flush_interval.as_secs(),
            concurrent_requests
        );

        Self {
            operations_tx: RwLock::new(Some(operations_tx)),
            reports_tx,
            collector: Mutex::new(Some(collector)),
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues one operation into the open batch. Waits only for queue
    /// space, never for network I/O; the write itself is best-effort.
    pub async fn submit(&self, operation: BulkOperation) -> Result<()> {
        let sender = self.operations_tx.read().clone();
        match sender {
            Some(sender) => sender
                .send(operation)
                .await
                .map_err(|_| StorageError::BulkTransport("bulk pipeline is shutting down".to_string())),
            None => Err(StorageError::BulkTransport(
                "bulk pipeline is shut down".to_string(),
            )),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BulkReport> {
        self.reports_tx.subscribe()
    }

    /// Stops accepting writes, flushes the partially filled open batch and
    /// waits for every in-flight submission before returning. Idempotent.
    pub async fn shutdown(&self) {
        drop(self.operations_tx.write().take());
        if let Some(collector) = self.collector.lock().await.take() {
            if let Err(e) = collector.await {
                error!("bulk collector task failed: {e}");
            }
        }
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            if let Err(e) = worker.await {
                error!("bulk worker task failed: {e}");
            }
        }
    }
}

async fn collect_batches(
    mut operations_rx: mpsc::Receiver<BulkOperation>,
    batches_tx: mpsc::Sender<Batch>,
    bulk_actions: usize,
    flush_interval: Duration,
) {
    let mut open: Vec<BulkOperation> = Vec::with_capacity(bulk_actions);
    let mut next_execution_id: u64 = 0;
    let mut interval = tokio::time::interval(flush_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick of a fresh interval completes immediately
    interval.reset();

    loop {
        tokio::select! {
            received = operations_rx.recv() => match received {
                Some(operation) => {
                    open.push(operation);
                    if open.len() >= bulk_actions {
                        if !dispatch(&mut open, &mut next_execution_id, &batches_tx).await {
                            return;
                        }
                        interval.reset();
                    }
                }
                None => break,
            },
            _ = interval.tick() => {
                if !open.is_empty() {
                    if !dispatch(&mut open, &mut next_execution_id, &batches_tx).await {
                        return;
                    }
                    interval.reset();
                }
            }
        }
    }

    // enqueue channel closed: drain whatever is still open
    if !open.is_empty() {
        let _ = dispatch(&mut open, &mut next_execution_id, &batches_tx).await;
    }
}

async fn dispatch(
    open: &mut Vec<BulkOperation>,
    next_execution_id: &mut u64,
    batches_tx: &mpsc::Sender<Batch>,
) -> bool {
    let batch = Batch {
        execution_id: *next_execution_id,
        operations: std::mem::take(open),
    };
    *next_execution_id += 1;
    debug!(
        "executing bulk [{}] with {} requests",
        batch.execution_id,
        batch.operations.len()
    );
    batches_tx.send(batch).await.is_ok()
}

async fn run_worker<S: BulkSink>(
    sink: Arc<S>,
    batches_rx: Arc<Mutex<mpsc::Receiver<Batch>>>,
    reports_tx: broadcast::Sender<BulkReport>,
) {
    loop {
        let batch = { batches_rx.lock().await.recv().await };
        match batch {
            Some(batch) => execute_batch(sink.as_ref(), batch, &reports_tx).await,
            None => break,
        }
    }
}

async fn execute_batch<S: BulkSink>(sink: &S, batch: Batch, reports_tx: &broadcast::Sender<BulkReport>) {
    let execution_id = batch.execution_id;
    let size = batch.operations.len();
    let attempts = AtomicUsize::new(0);

    // 100 ms, 200 ms, 400 ms between the four attempts
    let backoff = ExponentialBackoff::from_millis(2)
        .factor(INITIAL_BACKOFF_MS / 2)
        .take(MAX_RETRIES);

    let outcome = Retry::spawn(backoff, || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if attempt > 1 {
            warn!("bulk [{}] retrying, attempt {}", execution_id, attempt);
        }
        sink.submit_batch(&batch.operations)
    })
    .await;

    let report = match outcome {
        Ok(response) => {
            let failed = response.failed_items().len();
            if failed > 0 {
                warn!(
                    "bulk [{}] executed with {} failed documents out of {}",
                    execution_id, failed, size
                );
                BulkReport::PartialFailure {
                    execution_id,
                    size,
                    failed,
                }
            } else {
                info!(
                    "bulk [{}] completed in {} ms, size: {}",
                    execution_id, response.took, size
                );
                BulkReport::Flushed {
                    execution_id,
                    size,
                    took_ms: response.took,
                }
            }
        }
        Err(e) => {
            error!(
                "bulk [{}] dropped after {} attempts: {}",
                execution_id,
                attempts.load(Ordering::Relaxed),
                e
            );
            BulkReport::Terminal {
                execution_id,
                size,
                reason: e.to_string(),
            }
        }
    };
    // a send error only means nobody is subscribed right now
    let _ = reports_tx.send(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::PhysicalIndex;
    use serde_json::json;
    use tokio::time::Instant;

    enum SinkMode {
        Ok,
        AlwaysFail,
        PartialFailure,
    }

    struct FakeSink {
        mode: SinkMode,
        batch_sizes: parking_lot::Mutex<Vec<usize>>,
        call_instants: parking_lot::Mutex<Vec<Instant>>,
    }

    impl FakeSink {
        fn new(mode: SinkMode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                batch_sizes: parking_lot::Mutex::new(Vec::new()),
                call_instants: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batch_sizes.lock().clone()
        }

        fn call_count(&self) -> usize {
            self.call_instants.lock().len()
        }
    }

    #[async_trait]
    impl BulkSink for FakeSink {
        async fn submit_batch(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
            self.call_instants.lock().push(Instant::now());
            self.batch_sizes.lock().push(operations.len());
            match self.mode {
                SinkMode::Ok => Ok(serde_json::from_value(json!({
                    "took": 5, "errors": false, "items": []
                }))
                .unwrap()),
                SinkMode::AlwaysFail => {
                    Err(StorageError::BulkTransport("connection reset".to_string()))
                }
                SinkMode::PartialFailure => Ok(serde_json::from_value(json!({
                    "took": 5,
                    "errors": true,
                    "items": [
                        {"index": {"_index": "m", "_id": "ok", "status": 201}},
                        {"index": {"_index": "m", "_id": "bad", "status": 400,
                                   "error": {"type": "mapper_parsing_exception"}}}
                    ]
                }))
                .unwrap()),
            }
        }
    }

    fn operation(id: usize) -> BulkOperation {
        BulkOperation::insert(
            PhysicalIndex::from_store("prod_metrics"),
            format!("doc-{id}"),
            json!({"n": id}),
        )
    }

    #[tokio::test]
    async fn action_threshold_splits_the_stream_into_exact_batches() {
        let sink = FakeSink::new(SinkMode::Ok);
        let processor = BulkProcessor::spawn(Arc::clone(&sink), &BulkConfig::new(500, 3600, 2));

        for i in 0..1000 {
            processor.submit(operation(i)).await.unwrap();
        }
        processor.shutdown().await;

        assert_eq!(sink.batch_sizes(), vec![500, 500]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_interval_flushes_an_under_threshold_batch() {
        let sink = FakeSink::new(SinkMode::Ok);
        let processor = BulkProcessor::spawn(Arc::clone(&sink), &BulkConfig::new(1000, 2, 1));
        let mut reports = processor.subscribe();

        for i in 0..3 {
            processor.submit(operation(i)).await.unwrap();
        }

        let report = reports.recv().await.unwrap();
        match report {
            BulkReport::Flushed { size, .. } => assert_eq!(size, 3),
            other => panic!("expected a flushed report, got {other:?}"),
        }
        assert_eq!(sink.batch_sizes(), vec![3]);
        processor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_retries_three_times_with_doubling_delay() {
        let sink = FakeSink::new(SinkMode::AlwaysFail);
        let processor = BulkProcessor::spawn(Arc::clone(&sink), &BulkConfig::new(1, 3600, 1));
        let mut reports = processor.subscribe();

        processor.submit(operation(0)).await.unwrap();

        let report = reports.recv().await.unwrap();
        match report {
            BulkReport::Terminal { size, .. } => assert_eq!(size, 1),
            other => panic!("expected a terminal report, got {other:?}"),
        }

        let instants = sink.call_instants.lock().clone();
        assert_eq!(instants.len(), 1 + MAX_RETRIES);
        let delays: Vec<Duration> = instants.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );

        // exactly one report per dropped batch
        assert!(matches!(
            reports.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn rejected_documents_do_not_fail_the_batch() {
        let sink = FakeSink::new(SinkMode::PartialFailure);
        let processor = BulkProcessor::spawn(Arc::clone(&sink), &BulkConfig::new(2, 3600, 1));
        let mut reports = processor.subscribe();

        processor.submit(operation(0)).await.unwrap();
        processor.submit(operation(1)).await.unwrap();

        let report = reports.recv().await.unwrap();
        match report {
            BulkReport::PartialFailure { size, failed, .. } => {
                assert_eq!(size, 2);
                assert_eq!(failed, 1);
            }
            other => panic!("expected a partial-failure report, got {other:?}"),
        }
        // accepted as a whole, so no retry happened
        assert_eq!(sink.call_count(), 1);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_the_open_batch() {
        let sink = FakeSink::new(SinkMode::Ok);
        let processor = BulkProcessor::spawn(Arc::clone(&sink), &BulkConfig::new(100, 3600, 1));

        for i in 0..3 {
            processor.submit(operation(i)).await.unwrap();
        }
        processor.shutdown().await;

        assert_eq!(sink.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_refused() {
        let sink = FakeSink::new(SinkMode::Ok);
        let processor = BulkProcessor::spawn(Arc::clone(&sink), &BulkConfig::new(10, 3600, 1));
        processor.shutdown().await;

        let err = processor.submit(operation(0)).await.unwrap_err();
        assert!(matches!(err, StorageError::BulkTransport(_)));
        // a second shutdown is a no-op
        processor.shutdown().await;
    }
}
