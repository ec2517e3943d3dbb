//! Batch verification over a bounded pool of worker tasks.
//!
//! Workers pull jobs from a single mpmc queue and push finished results onto
//! a completion channel. The coordinator keeps at most `workers` references
//! in flight, polls the completion channel with a short timeout so it notices
//! cancellation promptly, and stores each result at its original index.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::Verifier;
use crate::{
    CheckStats, Config, CoreError, Discrepancy, ProgressEvent, Reference, VerificationResult,
};

/// Knobs for one batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub workers: usize,
    /// Budget for verifying a single reference, all sources included.
    pub unit_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 6,
            unit_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl From<&Config> for BatchOptions {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.max_concurrent_refs.max(1),
            unit_timeout: Duration::from_secs(config.ref_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }
}

/// Results in input order plus final counts.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: Vec<VerificationResult>,
    pub summary: CheckStats,
}

struct Job {
    index: usize,
    reference: Reference,
}

struct Done {
    index: usize,
    result: VerificationResult,
}

/// Verify `refs` with at most `options.workers` in flight.
///
/// Emits `checking` when a reference is handed to a worker and `result`,
/// `warning` (if sources failed), `progress` and `summary_update` as each
/// one completes, in completion order. Ends with exactly one of
/// `completed`, `cancelled` or `error`.
pub async fn run_batch(
    refs: Vec<Reference>,
    verifier: Arc<Verifier>,
    options: BatchOptions,
    progress: impl Fn(ProgressEvent) + Send + Sync,
    cancel: CancellationToken,
) -> Result<BatchReport, CoreError> {
    let total = refs.len();
    let mut summary = CheckStats::new(total);
    if total == 0 {
        progress(ProgressEvent::Completed {
            summary: summary.clone(),
        });
        return Ok(BatchReport {
            results: Vec::new(),
            summary,
        });
    }

    let (pool, mut done_rx) =
        WorkerPool::spawn(verifier, options, &cancel, options.workers.clamp(1, total));
    let mut slots: Vec<Option<VerificationResult>> = (0..total).map(|_| None).collect();

    let mut next = 0;
    while next < pool.workers {
        if let Err(e) = submit(&pool, &refs, next, &progress) {
            return Err(pool.fail(e, &progress));
        }
        next += 1;
    }

    while summary.completed < total {
        if cancel.is_cancelled() {
            pool.abort();
            log::info!("batch cancelled after {}/{} references", summary.completed, total);
            progress(ProgressEvent::Cancelled {
                message: format!(
                    "Cancelled after {} of {} references",
                    summary.completed, total
                ),
            });
            return Err(CoreError::Cancelled);
        }

        let done = match tokio::time::timeout(options.poll_interval, done_rx.recv()).await {
            Err(_) => continue,
            Ok(Some(done)) => done,
            Ok(None) => {
                if cancel.is_cancelled() {
                    continue;
                }
                let e = CoreError::Pool(format!(
                    "workers exited with {} of {} references outstanding",
                    total - summary.completed,
                    total
                ));
                return Err(pool.fail(e, &progress));
            }
        };

        let Done { index, result } = done;
        summary.record(result.status);
        progress(ProgressEvent::Result {
            index,
            total,
            result: Box::new(result.clone()),
        });
        if !result.failed_sources.is_empty() {
            progress(ProgressEvent::Warning {
                index,
                title: result.title.clone(),
                failed_sources: result.failed_sources.clone(),
                message: failure_note(&result),
            });
        }
        progress(ProgressEvent::Progress {
            current: summary.completed,
            total,
        });
        progress(ProgressEvent::SummaryUpdate {
            summary: summary.clone(),
        });
        slots[index] = Some(result);

        if next < total && !cancel.is_cancelled() {
            if let Err(e) = submit(&pool, &refs, next, &progress) {
                return Err(pool.fail(e, &progress));
            }
            next += 1;
        }
    }

    pool.shutdown().await;
    progress(ProgressEvent::Completed {
        summary: summary.clone(),
    });
    let results = slots.into_iter().flatten().collect();
    Ok(BatchReport { results, summary })
}

fn submit(
    pool: &WorkerPool,
    refs: &[Reference],
    index: usize,
    progress: &impl Fn(ProgressEvent),
) -> Result<(), CoreError> {
    let reference = refs[index].clone();
    progress(ProgressEvent::Checking {
        index,
        total: refs.len(),
        title: reference.title.clone(),
    });
    pool.submit(Job { index, reference })
}

fn failure_note(result: &VerificationResult) -> String {
    let outcome = match &result.source {
        Some(source) => format!("{} via {source}", result.status.label()),
        None => result.status.label().to_string(),
    };
    format!("{} failed; {outcome}", result.failed_sources.join(", "))
}

/// The worker tasks of one batch.
struct WorkerPool {
    job_tx: async_channel::Sender<Job>,
    handles: Vec<JoinHandle<()>>,
    workers: usize,
}

impl WorkerPool {
    fn spawn(
        verifier: Arc<Verifier>,
        options: BatchOptions,
        cancel: &CancellationToken,
        workers: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Done>) {
        let (job_tx, job_rx) = async_channel::unbounded::<Job>();
        let (done_tx, done_rx) = mpsc::unbounded_channel::<Done>();
        let handles = (0..workers)
            .map(|_| {
                tokio::spawn(worker_loop(
                    job_rx.clone(),
                    done_tx.clone(),
                    Arc::clone(&verifier),
                    options.unit_timeout,
                    cancel.clone(),
                ))
            })
            .collect();
        let pool = Self {
            job_tx,
            handles,
            workers,
        };
        (pool, done_rx)
    }

    fn submit(&self, job: Job) -> Result<(), CoreError> {
        self.job_tx
            .try_send(job)
            .map_err(|_| CoreError::Pool("job queue closed".into()))
    }

    fn abort(&self) {
        self.job_tx.close();
        for h in &self.handles {
            h.abort();
        }
    }

    fn fail(self, error: CoreError, progress: &impl Fn(ProgressEvent)) -> CoreError {
        log::error!("batch aborted: {error}");
        progress(ProgressEvent::Error {
            message: error.to_string(),
        });
        self.abort();
        error
    }

    /// Close the queue and wait for idle workers to exit.
    async fn shutdown(self) {
        self.job_tx.close();
        for h in self.handles {
            let _ = h.await;
        }
    }
}

async fn worker_loop(
    jobs: async_channel::Receiver<Job>,
    done: mpsc::UnboundedSender<Done>,
    verifier: Arc<Verifier>,
    unit_timeout: Duration,
    cancel: CancellationToken,
) {
    while let Ok(Job { index, reference }) = jobs.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        let Some(result) = run_unit(&verifier, &reference, unit_timeout, &cancel).await else {
            break;
        };
        if done.send(Done { index, result }).is_err() {
            break;
        }
    }
}

/// Verify one reference under the unit timeout. `None` means cancelled.
async fn run_unit(
    verifier: &Verifier,
    reference: &Reference,
    unit_timeout: Duration,
    cancel: &CancellationToken,
) -> Option<VerificationResult> {
    let unit = AssertUnwindSafe(verifier.verify(reference, cancel)).catch_unwind();
    match tokio::time::timeout(unit_timeout, unit).await {
        Ok(Ok(Ok(result))) => Some(result),
        Ok(Ok(Err(CoreError::Cancelled))) => None,
        Ok(Ok(Err(e))) => Some(VerificationResult::failed(
            reference,
            Discrepancy::check_failed(e.to_string()),
        )),
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            log::error!("verification of '{}' panicked: {message}", reference.title);
            Some(VerificationResult::failed(
                reference,
                Discrepancy::check_failed(message),
            ))
        }
        Err(_) => {
            log::warn!(
                "'{}' timed out after {}s",
                reference.title,
                unit_timeout.as_secs()
            );
            Some(VerificationResult::failed(
                reference,
                Discrepancy::timeout(unit_timeout),
            ))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
