//! Bounded worker pool.
//!
//! Admitted jobs wait in a FIFO queue; a dispatcher task starts at most
//! `max_concurrency` workers at a time. A job counts against
//! `queue_capacity` from admission until its worker reaches a terminal
//! state, so the capacity bounds outstanding (waiting + running) jobs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::{JOBS_REJECTED, JOBS_SUBMITTED};

use super::{
    JobDescriptor, JobOutcome, PoolConfig, PoolError, PoolStatus, TransferJobWorker,
    WorkerContext,
};

type OutcomeSender = oneshot::Sender<Result<JobOutcome, PoolError>>;

struct QueuedJob {
    descriptor: JobDescriptor,
    cancel: CancellationToken,
    outcome_tx: OutcomeSender,
}

struct PoolInner {
    config: PoolConfig,
    context: WorkerContext,
    /// Ids of every outstanding job.
    tracked: Mutex<HashSet<String>>,
    active: AtomicUsize,
    shutdown: CancellationToken,
}

impl PoolInner {
    fn tracked(&self) -> MutexGuard<'_, HashSet<String>> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, job_id: &str) {
        self.tracked().remove(job_id);
    }
}

/// A job holding a worker slot. Dropping it frees the slot, so the slot
/// is returned even when the worker task panics or is aborted.
struct RunningJob {
    inner: Arc<PoolInner>,
    job_id: String,
    outcome_tx: Option<OutcomeSender>,
    _permit: OwnedSemaphorePermit,
}

impl RunningJob {
    fn start(
        inner: Arc<PoolInner>,
        job_id: String,
        outcome_tx: OutcomeSender,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        inner.active.fetch_add(1, Ordering::SeqCst);
        Self {
            inner,
            job_id,
            outcome_tx: Some(outcome_tx),
            _permit: permit,
        }
    }

    /// Free the slot, then report the outcome, so a caller woken by the
    /// outcome can submit again.
    fn finish(mut self, outcome: JobOutcome) {
        let outcome_tx = self.outcome_tx.take();
        drop(self);
        if let Some(outcome_tx) = outcome_tx {
            let _ = outcome_tx.send(Ok(outcome));
        }
    }
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        self.inner.release(&self.job_id);
        self.inner.context.registry.remove(&self.job_id);
        self.inner.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(outcome_tx) = self.outcome_tx.take() {
            error!(job_id = %self.job_id, "Worker ended without an outcome");
            let _ = outcome_tx.send(Err(PoolError::WorkerAborted(self.job_id.clone())));
        }
    }
}

/// Handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    outcome_rx: oneshot::Receiver<Result<JobOutcome, PoolError>>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the worker's terminal outcome.
    ///
    /// Dropping the handle does not affect the job. A job dropped from the
    /// queue at shutdown yields `ShutDown`; a worker that panicked yields
    /// `WorkerAborted`.
    pub async fn wait(self) -> Result<JobOutcome, PoolError> {
        self.outcome_rx.await.map_err(|_| PoolError::ShutDown)?
    }
}

/// Bounded set of concurrent worker slots.
#[derive(Clone)]
pub struct JobPool {
    inner: Arc<PoolInner>,
    queue_tx: mpsc::UnboundedSender<QueuedJob>,
}

impl JobPool {
    /// Create a pool and spawn its dispatcher. Must be called inside a
    /// tokio runtime.
    pub fn new(config: PoolConfig, context: WorkerContext) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            config,
            context,
            tracked: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        });

        info!(
            max_concurrency = inner.config.max_concurrency,
            queue_capacity = inner.config.queue_capacity,
            poll_interval_secs = inner.config.poll_interval.as_secs_f64(),
            "Starting job pool"
        );
        tokio::spawn(dispatch(inner.clone(), queue_rx));

        Self { inner, queue_tx }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// True when the outstanding-job count is limited.
    pub fn is_bounded(&self) -> bool {
        self.inner.config.queue_capacity > 0
    }

    /// True when a submission would currently be admitted.
    pub fn can_submit(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
            && (!self.is_bounded()
                || self.inner.tracked().len() < self.inner.config.queue_capacity)
    }

    /// Whether a job id is outstanding in the pool.
    pub fn is_tracked(&self, job_id: &str) -> bool {
        self.inner.tracked().contains(job_id)
    }

    /// Admit a job. Never blocks: a full pool rejects with `QueueFull`.
    pub fn submit(&self, descriptor: JobDescriptor) -> Result<JobHandle, PoolError> {
        let result = self.admit(descriptor);
        match &result {
            Ok(handle) => {
                debug!(job_id = %handle.job_id, "Job admitted");
            }
            Err(e) => {
                JOBS_REJECTED.with_label_values(&[e.reason()]).inc();
            }
        }
        result
    }

    fn admit(&self, descriptor: JobDescriptor) -> Result<JobHandle, PoolError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(PoolError::ShutDown);
        }

        let job_id = descriptor.job_id.clone();
        let cancel = {
            let mut tracked = self.inner.tracked();
            if tracked.contains(&job_id) {
                return Err(PoolError::AlreadyTracked(job_id));
            }
            if self.is_bounded() && tracked.len() >= self.inner.config.queue_capacity {
                return Err(PoolError::QueueFull {
                    capacity: self.inner.config.queue_capacity,
                });
            }
            let cancel = self
                .inner
                .context
                .registry
                .register(&job_id)
                .map_err(|_| PoolError::AlreadyTracked(job_id.clone()))?;
            tracked.insert(job_id.clone());
            cancel
        };

        let origin = descriptor.origin;
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let queued = QueuedJob {
            descriptor,
            cancel,
            outcome_tx,
        };
        if self.queue_tx.send(queued).is_err() {
            self.inner.release(&job_id);
            self.inner.context.registry.remove(&job_id);
            return Err(PoolError::ShutDown);
        }

        JOBS_SUBMITTED.with_label_values(&[origin.as_str()]).inc();
        Ok(JobHandle { job_id, outcome_rx })
    }

    pub fn status(&self) -> PoolStatus {
        let outstanding = self.inner.tracked().len();
        let active = self.inner.active.load(Ordering::SeqCst);
        PoolStatus {
            active,
            queued: outstanding.saturating_sub(active),
            max_concurrency: self.inner.config.max_concurrency,
            queue_capacity: self.inner.config.queue_capacity,
        }
    }

    /// Stop starting new workers. Running workers are left alone; queued
    /// jobs are dropped and stay unfinished in the catalog.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Shutting down job pool");
            self.inner.shutdown.cancel();
        }
    }
}

/// Pull jobs in FIFO order and start each once a slot is free.
async fn dispatch(inner: Arc<PoolInner>, mut queue_rx: mpsc::UnboundedReceiver<QueuedJob>) {
    let slots = Arc::new(Semaphore::new(inner.config.max_concurrency));

    loop {
        let job = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            job = queue_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = inner.shutdown.cancelled() => {
                drop_queued(&inner, job);
                break;
            }
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    drop_queued(&inner, job);
                    break;
                }
            },
        };

        let QueuedJob {
            descriptor,
            cancel,
            outcome_tx,
        } = job;
        let running = RunningJob::start(
            inner.clone(),
            descriptor.job_id.clone(),
            outcome_tx,
            permit,
        );
        let worker = TransferJobWorker::new(
            descriptor,
            inner.context.clone(),
            cancel,
            inner.config.poll_interval,
        );
        tokio::spawn(async move {
            let outcome = worker.run().await;
            running.finish(outcome);
        });
    }

    queue_rx.close();
    while let Ok(job) = queue_rx.try_recv() {
        drop_queued(&inner, job);
    }
    debug!("Job pool dispatcher stopped");
}

fn drop_queued(inner: &PoolInner, job: QueuedJob) {
    let job_id = &job.descriptor.job_id;
    warn!(job_id = %job_id, "Dropping queued job, pool is shutting down");
    inner.release(job_id);
    inner.context.registry.remove(job_id);
}
