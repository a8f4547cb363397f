//! Worker pool: parallel execution host for catalog operations.
//!
//! Architecture: N plain OS threads (`worker`) fed by crossbeam inboxes,
//! one supervisor task (`supervisor`) owning every piece of bookkeeping,
//! and this thin handle layer translating async calls into supervisor
//! commands. Payload buffers move through the channels — dispatching a
//! request transfers ownership to the worker, and the reply moves the
//! result buffers back.

mod chunks;
mod protocol;
mod supervisor;
mod worker;

pub use protocol::WorkerInfo;

use cyto_cancel::CancelToken;
use cyto_catalog::{
    Backend, BackendState, CoreError, HistogramOutput, OpOutput, OperationId, Payload, StatsOutput,
};
use std::time::Duration;
use supervisor::{Command, Supervisor};
use tokio::sync::{mpsc, oneshot};

/// Pool construction parameters. Defaults mirror the production
/// configuration: `min(available_parallelism, 8)` workers, 30 s request
/// timeout, 30 s health scans, 60 s stuck threshold.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub workers: usize,
    pub queue_warn_depth: usize,
    pub stuck_after: Duration,
    pub health_interval: Duration,
    pub default_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            workers: hw.min(8),
            queue_warn_depth: 50,
            stuck_after: Duration::from_secs(60),
            health_interval: Duration::from_secs(30),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-request knobs. `timeout` falls back to the pool default.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub crashes: u64,
    pub stuck_restarts: u64,
    pub inline_fallbacks: u64,
    pub recycled: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub workers: usize,
    pub idle: usize,
    pub busy: usize,
    pub queued: usize,
    pub pending: usize,
    pub state: BackendState,
    pub counters: PoolCounters,
}

impl PoolStatus {
    fn unavailable() -> Self {
        Self {
            workers: 0,
            idle: 0,
            busy: 0,
            queued: 0,
            pending: 0,
            state: BackendState::Unavailable,
            counters: PoolCounters::default(),
        }
    }
}

/// `prune_idle_workers` outcome; `recycled + kept = considered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub recycled: usize,
    pub kept: usize,
    pub considered: usize,
}

/// Cheap-clone handle to one pool instance. Dropping every handle tears
/// the supervisor (and its workers) down.
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
}

impl WorkerPool {
    /// Spawn the supervisor task and its workers. Must be called from a
    /// tokio runtime context.
    pub fn spawn(options: PoolOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(options, rx, tx.clone());
        tokio::spawn(supervisor.run());
        Self { commands: tx }
    }

    fn closed() -> CoreError {
        CoreError::BackendUnavailable(Backend::Worker)
    }

    /// Execute one operation. The payload moves into the pool (and on to
    /// a worker); callers that need their buffers afterwards clone before
    /// submitting.
    pub async fn execute(
        &self,
        op: OperationId,
        payload: Payload,
        options: RequestOptions,
    ) -> Result<OpOutput, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Execute {
                op,
                payload,
                options,
                reply,
            })
            .map_err(|_| Self::closed())?;
        rx.await.map_err(|_| Self::closed())?
    }

    /// Execute many tasks, returning results aligned with the input
    /// order. All tasks are submitted before any result is awaited so
    /// they pipeline across workers.
    pub async fn execute_batch(
        &self,
        tasks: Vec<(OperationId, Payload)>,
        options: RequestOptions,
    ) -> Vec<Result<OpOutput, CoreError>> {
        let mut receivers = Vec::with_capacity(tasks.len());
        for (op, payload) in tasks {
            let (reply, rx) = oneshot::channel();
            let sent = self.commands.send(Command::Execute {
                op,
                payload,
                options: options.clone(),
                reply,
            });
            receivers.push(sent.map(|_| rx));
        }
        let mut results = Vec::with_capacity(receivers.len());
        for slot in receivers {
            let result = match slot {
                Err(_) => Err(Self::closed()),
                Ok(rx) => rx.await.unwrap_or_else(|_| Err(Self::closed())),
            };
            results.push(result);
        }
        results
    }

    /// Split a value vector into one contiguous chunk per worker,
    /// dispatch them in parallel, and recombine. Stats fold exactly
    /// (order statistics excepted), histograms sum over shared edges,
    /// anything else returns the first chunk's result unchanged.
    pub async fn distribute_by_chunks(
        &self,
        op: OperationId,
        values: Vec<f32>,
    ) -> Result<OpOutput, CoreError> {
        let workers = self.status().await.workers.max(1);
        let aligned_edges = match op {
            OperationId::ComputeHistogram => chunks::aligned_edges(&values),
            _ => None,
        };

        let parts = chunks::split_values(values, workers);
        if parts.len() == 1 && !matches!(op, OperationId::ComputeHistogram) {
            let payload = Payload::with_values(parts.into_iter().next().unwrap_or_default());
            return self.execute(op, payload, RequestOptions::default()).await;
        }

        let tasks: Vec<(OperationId, Payload)> = parts
            .into_iter()
            .map(|chunk| {
                let mut payload = Payload::with_values(chunk);
                payload.edges = aligned_edges.clone();
                (op, payload)
            })
            .collect();
        let results = self.execute_batch(tasks, RequestOptions::default()).await;

        match op {
            OperationId::ComputeStats => {
                let mut stats: Vec<StatsOutput> = Vec::with_capacity(results.len());
                for result in results {
                    match result?.into_stats() {
                        Some(s) => stats.push(s),
                        None => {
                            return Err(CoreError::Internal(
                                "stats fan-out returned a foreign result shape".into(),
                            ));
                        }
                    }
                }
                Ok(OpOutput::Stats(chunks::fold_stats(&stats)))
            }
            OperationId::ComputeHistogram => {
                let mut histograms: Vec<HistogramOutput> = Vec::with_capacity(results.len());
                for result in results {
                    match result?.into_histogram() {
                        Some(h) => histograms.push(h),
                        None => {
                            return Err(CoreError::Internal(
                                "histogram fan-out returned a foreign result shape".into(),
                            ));
                        }
                    }
                }
                chunks::fold_histograms(histograms).map(OpOutput::Histogram)
            }
            _ => results
                .into_iter()
                .next()
                .unwrap_or_else(|| Err(Self::closed())),
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Status { reply }).is_err() {
            return PoolStatus::unavailable();
        }
        rx.await.unwrap_or_else(|_| PoolStatus::unavailable())
    }

    /// Recycle idle workers by terminate-and-respawn, returning memory to
    /// the OS. Busy workers are untouched.
    pub async fn prune_idle_workers(
        &self,
        keep_at_least: usize,
        max_to_recycle: usize,
    ) -> Result<PruneReport, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Prune {
                keep_at_least,
                max_to_recycle,
                reply,
            })
            .map_err(|_| Self::closed())?;
        rx.await.map_err(|_| Self::closed())
    }

    /// `GET_WORKER_INFO` round trip through the addressed worker.
    pub async fn worker_info(&self, index: usize) -> Result<WorkerInfo, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::WorkerInfo { index, reply })
            .map_err(|_| Self::closed())?;
        rx.await.map_err(|_| Self::closed())?
    }

    /// Reject all pending requests and stop the supervisor. Subsequent
    /// calls on any handle observe an unavailable backend.
    pub async fn terminate(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Terminate { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Request cancellation by id is internal; callers cancel through the
    /// `CancelToken` they passed in `RequestOptions`.
    #[cfg(feature = "test-internals")]
    pub fn crash_worker(&self, index: usize) {
        let _ = self.commands.send(Command::CrashWorker { index });
    }

    #[cfg(feature = "test-internals")]
    pub fn stall_worker(&self, index: usize, duration: Duration) {
        let _ = self.commands.send(Command::StallWorker { index, duration });
    }
}
