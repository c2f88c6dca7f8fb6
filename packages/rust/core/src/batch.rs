//! Parallel document processing over a fixed set of workers.
//!
//! Each worker runs on tokio's blocking pool, owns one [`WorkerContext`] for
//! its whole life, and pulls documents from a shared queue until it is
//! empty. A worker that cannot obtain its engine handle stops pulling so the
//! remaining documents go to healthy workers.
//!
//! [`WorkerContext`]: senseindex_engine::WorkerContext

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use senseindex_engine::{EngineFactory, EngineHandlePool};
use senseindex_shared::{Document, Result, SenseIndexError};

use crate::fanout::FieldFanoutProcessor;

type Queue = Arc<Mutex<VecDeque<(usize, Document)>>>;

/// Progress callback for batch runs.
pub trait BatchProgress: Send + Sync {
    /// Called after each document, from whichever worker finished it.
    fn document_done(&self, completed: usize, total: usize, failed: bool);
}

/// No-op progress reporter.
pub struct SilentBatchProgress;

impl BatchProgress for SilentBatchProgress {
    fn document_done(&self, _completed: usize, _total: usize, _failed: bool) {}
}

/// Per-document results of a batch, in input order.
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<Result<Document>>,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Process `documents` with up to `workers` workers sharing `pool`.
///
/// Only a panicking worker fails the whole batch; every other failure is
/// reported against the document it happened on.
#[instrument(skip_all, fields(documents = documents.len(), workers = workers))]
pub async fn run_batch<F>(
    processor: Arc<FieldFanoutProcessor>,
    pool: EngineHandlePool<F>,
    documents: Vec<Document>,
    workers: usize,
    progress: Arc<dyn BatchProgress>,
) -> Result<BatchOutcome>
where
    F: EngineFactory + 'static,
{
    let start = Instant::now();
    let total = documents.len();
    let worker_count = workers.clamp(1, total.max(1));
    let queue: Queue = Arc::new(Mutex::new(documents.into_iter().enumerate().collect()));
    let completed = Arc::new(AtomicUsize::new(0));

    info!(total, workers = worker_count, "starting batch");

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let processor = Arc::clone(&processor);
        let pool = pool.clone();
        let queue = Arc::clone(&queue);
        let progress = Arc::clone(&progress);
        let completed = Arc::clone(&completed);

        handles.push(tokio::task::spawn_blocking(move || {
            let mut worker = pool.worker();
            let mut results = Vec::new();

            while let Some((index, doc)) = pop(&queue) {
                let result = processor.process(doc, &mut worker);
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                progress.document_done(done, total, result.is_err());

                let lost_handle = matches!(result, Err(SenseIndexError::Resource(_)));
                if let Err(e) = &result {
                    warn!(worker = worker.id(), document = index, error = %e, "document failed");
                }
                results.push((index, result));

                if lost_handle {
                    error!(worker = worker.id(), "worker has no engine handle, stopping");
                    break;
                }
            }
            results
        }));
    }

    let mut slots: Vec<Option<Result<Document>>> = (0..total).map(|_| None).collect();
    for handle in handles {
        let results = handle
            .await
            .map_err(|e| SenseIndexError::resource(format!("batch worker panicked: {e}")))?;
        for (index, result) in results {
            slots[index] = Some(result);
        }
    }

    // Left behind when every worker lost its handle.
    let stranded: Vec<(usize, Document)> = queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain(..)
        .collect();
    if !stranded.is_empty() {
        error!(count = stranded.len(), "documents left without a usable worker");
    }
    for (index, _) in stranded {
        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        progress.document_done(done, total, true);
        slots[index] = Some(Err(SenseIndexError::resource(
            "no worker with an engine handle remained",
        )));
    }

    let results: Vec<Result<Document>> = slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| Err(SenseIndexError::resource("document was never processed")))
        })
        .collect();

    let outcome = BatchOutcome {
        results,
        elapsed: start.elapsed(),
    };
    info!(
        succeeded = outcome.succeeded(),
        failed = outcome.failed(),
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "batch complete"
    );
    Ok(outcome)
}

fn pop(queue: &Queue) -> Option<(usize, Document)> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}
