//! Dispatcher: backend selection, typed fallback, metrics, health, and
//! memory-pressure cleanup.
//!
//! Selection order: explicit preference (when ready), accelerator (when
//! the op is accelerator-capable and the device is up), worker pool,
//! inline. Fallback chain on failure: accelerator → worker → inline →
//! surface; worker → inline → surface; inline → surface. Caller-visible
//! outcomes (invalid payload, timeout, cancellation) never fall back.
//!
//! Every successful execution returns an [`Envelope`] whose trailer
//! records the selected backend, the backend that actually produced the
//! result, whether fallback was used, and the elapsed time.
//!
//! The dispatcher is an explicit caller-owned object. Nothing here is a
//! process global; embedders that want a singleton wrap it themselves.

mod memory;
mod metrics;

pub use memory::{CleanupHandler, CleanupReason, LocalMemoryBroker, MemoryPressureBroker};
pub use metrics::{DispatchMetrics, DispatchMetricsSnapshot};

use cyto_accel::{AccelBackend, AccelError};
use cyto_cancel::CancelToken;
use cyto_catalog::{
    AggregateOutput, Backend, BackendState, BinSpec, ComputeTrailer, CoreError,
    CorrelationOutput, DifferentialOutput, Envelope, ExtractOutput, HistogramOutput, Method,
    OpOutput, OperationId, Payload, StatsOutput, TransformOutput,
};
use cyto_config::CoreConfig;
use cyto_markers::MarkerContext;
use cyto_pool::{PoolOptions, PoolStatus, RequestOptions, WorkerPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const BROKER_ID: &str = "cyto-dispatch";

/// Dispatcher construction parameters.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Construct (and probe) the accelerator backend.
    pub accelerator: bool,
    pub health_interval: Duration,
    /// Pending count with zero busy workers that triggers a pool re-init.
    pub restart_pending_threshold: usize,
    pub pool: PoolOptions,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            accelerator: true,
            health_interval: Duration::from_secs(30),
            restart_pending_threshold: 8,
            pool: PoolOptions::default(),
        }
    }
}

impl DispatchOptions {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            accelerator: config.file.dispatch.accelerator,
            health_interval: Duration::from_millis(config.file.dispatch.health_interval_ms),
            restart_pending_threshold: config.file.dispatch.restart_pending_threshold,
            pool: PoolOptions {
                workers: config.effective_workers,
                queue_warn_depth: config.file.pool.queue_warn_depth,
                stuck_after: Duration::from_millis(config.file.pool.stuck_after_ms),
                health_interval: Duration::from_millis(config.file.pool.health_interval_ms),
                default_timeout: Duration::from_millis(config.file.pool.request_timeout_ms),
            },
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub preferred_backend: Option<Backend>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStatus {
    pub accelerator: BackendState,
    pub worker: PoolStatus,
    pub inline: BackendState,
    pub pool_restarting: bool,
}

struct Inner {
    options: DispatchOptions,
    accel: Option<Mutex<AccelBackend>>,
    pool: RwLock<WorkerPool>,
    pool_restarting: AtomicBool,
    terminated: AtomicBool,
    inline_markers: Mutex<Option<MarkerContext>>,
    metrics: DispatchMetrics,
    broker: Option<Arc<dyn MemoryPressureBroker>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap-clone dispatcher handle.
#[derive(Clone)]
pub struct CoreDispatcher {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CoreDispatcher {
    /// Build a dispatcher (and its pool) from defaults. Must run inside a
    /// tokio runtime.
    pub fn new(options: DispatchOptions) -> Self {
        Self::build(options, None)
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(DispatchOptions::from_config(config))
    }

    /// Build and register the memory-pressure cleanup handler with the
    /// broker; the handler unregisters at `terminate`.
    pub fn with_broker(options: DispatchOptions, broker: Arc<dyn MemoryPressureBroker>) -> Self {
        Self::build(options, Some(broker))
    }

    fn build(options: DispatchOptions, broker: Option<Arc<dyn MemoryPressureBroker>>) -> Self {
        let accel = options.accelerator.then(|| {
            let mut accel = AccelBackend::new();
            // A probe failure leaves the backend unavailable; selection
            // skips it and the fallback chain covers stragglers.
            let _ = accel.init();
            Mutex::new(accel)
        });
        let pool = WorkerPool::spawn(options.pool.clone());
        let inner = Arc::new(Inner {
            options,
            accel,
            pool: RwLock::new(pool),
            pool_restarting: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            inline_markers: Mutex::new(None),
            metrics: DispatchMetrics::default(),
            broker,
            health_task: Mutex::new(None),
        });

        *lock(&inner.health_task) = Some(spawn_health_task(&inner));
        if let Some(broker) = inner.broker.clone() {
            register_cleanup(&inner, broker.as_ref());
        }
        info!(
            target: "dispatch.lifecycle",
            accelerator = inner.accel.is_some(),
            workers = inner.options.pool.workers,
            "dispatcher_started"
        );
        Self { inner }
    }

    fn pool_handle(&self) -> WorkerPool {
        match self.inner.pool.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    // -----------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------

    fn accel_ready(&self) -> bool {
        self.inner
            .accel
            .as_ref()
            .is_some_and(|accel| lock(accel).state() == BackendState::Available)
    }

    fn worker_selectable(&self, op: OperationId) -> bool {
        cyto_catalog::is_worker_capable(op)
            && !self.inner.pool_restarting.load(Ordering::SeqCst)
            && !self.inner.terminated.load(Ordering::SeqCst)
    }

    fn backend_ready(&self, backend: Backend, op: OperationId) -> bool {
        match backend {
            Backend::Accelerator => cyto_catalog::is_accelerator_capable(op) && self.accel_ready(),
            Backend::Worker => self.worker_selectable(op),
            Backend::Inline => true,
        }
    }

    fn select_backend(&self, op: OperationId, preferred: Option<Backend>) -> Backend {
        if let Some(preferred) = preferred {
            if self.backend_ready(preferred, op) {
                return preferred;
            }
        }
        if cyto_catalog::is_accelerator_capable(op) && self.accel_ready() {
            return Backend::Accelerator;
        }
        if self.worker_selectable(op) {
            return Backend::Worker;
        }
        Backend::Inline
    }

    // -----------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------

    /// Execute one operation with backend selection and typed fallback.
    pub async fn execute(
        &self,
        op: OperationId,
        payload: Payload,
        options: ExecuteOptions,
    ) -> Result<Envelope, CoreError> {
        let started = Instant::now();
        if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(CoreError::Cancelled);
        }
        cyto_catalog::validate(op, &payload)?;

        let selected = self.select_backend(op, options.preferred_backend);
        let mut actual = selected;
        let mut fallback_used = false;

        let result = match selected {
            Backend::Accelerator => match self.try_accelerator(op, &payload) {
                Ok(output) => Ok(output),
                Err(err) => {
                    fallback_used = true;
                    self.inner.metrics.record_fallback(Backend::Accelerator);
                    debug!(target: "dispatch.fallback", op = %op, error = %err, "accelerator_failed");
                    if self.worker_selectable(op) {
                        actual = Backend::Worker;
                        match self.try_worker(op, payload.clone(), &options).await {
                            Ok(output) => Ok(output),
                            Err(err) if err.fallback_eligible() => {
                                self.inner.metrics.record_fallback(Backend::Worker);
                                debug!(target: "dispatch.fallback", op = %op, error = %err, "worker_failed");
                                actual = Backend::Inline;
                                self.run_inline(op, &payload, options.cancel.as_ref())
                            }
                            Err(err) => Err(err),
                        }
                    } else {
                        actual = Backend::Inline;
                        self.run_inline(op, &payload, options.cancel.as_ref())
                    }
                }
            },
            Backend::Worker => match self.try_worker(op, payload.clone(), &options).await {
                Ok(output) => Ok(output),
                Err(err) if err.fallback_eligible() => {
                    fallback_used = true;
                    self.inner.metrics.record_fallback(Backend::Worker);
                    debug!(target: "dispatch.fallback", op = %op, error = %err, "worker_failed");
                    actual = Backend::Inline;
                    self.run_inline(op, &payload, options.cancel.as_ref())
                }
                Err(err) => Err(err),
            },
            Backend::Inline => self.run_inline(op, &payload, options.cancel.as_ref()),
        };

        let elapsed = started.elapsed();
        let output = result?;
        self.inner
            .metrics
            .record_execution(actual, elapsed.as_nanos() as u64);
        Ok(Envelope {
            output,
            compute: ComputeTrailer {
                op,
                selected_backend: selected,
                actual_backend: actual,
                fallback_used,
                elapsed_ms: elapsed.as_secs_f64() * 1_000.0,
            },
        })
    }

    /// Execute many tasks concurrently; results stay aligned with the
    /// input order. Each task carries the full fallback chain of
    /// `execute`, so a slot holds an error only when its inline downgrade
    /// failed too.
    pub async fn execute_batch(
        &self,
        tasks: Vec<(OperationId, Payload)>,
        options: ExecuteOptions,
    ) -> Vec<Result<Envelope, CoreError>> {
        let handles: Vec<JoinHandle<Result<Envelope, CoreError>>> = tasks
            .into_iter()
            .map(|(op, payload)| {
                let dispatcher = self.clone();
                let options = options.clone();
                tokio::spawn(async move { dispatcher.execute(op, payload, options).await })
            })
            .collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(
                handle
                    .await
                    .unwrap_or_else(|join| Err(CoreError::Internal(join.to_string()))),
            );
        }
        results
    }

    fn try_accelerator(&self, op: OperationId, payload: &Payload) -> Result<OpOutput, CoreError> {
        let Some(accel) = &self.inner.accel else {
            return Err(CoreError::BackendUnavailable(Backend::Accelerator));
        };
        lock(accel).execute(op, payload).map_err(|err| match err {
            AccelError::NotReady => CoreError::BackendUnavailable(Backend::Accelerator),
            other => CoreError::Internal(other.to_string()),
        })
    }

    async fn try_worker(
        &self,
        op: OperationId,
        payload: Payload,
        options: &ExecuteOptions,
    ) -> Result<OpOutput, CoreError> {
        if self.inner.pool_restarting.load(Ordering::SeqCst) {
            return Err(CoreError::BackendUnavailable(Backend::Worker));
        }
        self.pool_handle()
            .execute(
                op,
                payload,
                RequestOptions {
                    timeout: options.timeout,
                    cancel: options.cancel.clone(),
                },
            )
            .await
    }

    fn run_inline(
        &self,
        op: OperationId,
        payload: &Payload,
        cancel: Option<&CancelToken>,
    ) -> Result<OpOutput, CoreError> {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(CoreError::Cancelled);
        }
        let mut markers = lock(&self.inner.inline_markers);
        cyto_handlers::execute(op, payload, &mut markers)
    }

    // -----------------------------------------------------------------
    // Introspection & lifecycle
    // -----------------------------------------------------------------

    pub async fn get_status(&self) -> DispatcherStatus {
        let accelerator = self
            .inner
            .accel
            .as_ref()
            .map(|accel| lock(accel).state())
            .unwrap_or(BackendState::Unavailable);
        DispatcherStatus {
            accelerator,
            worker: self.pool_handle().status().await,
            inline: BackendState::Available,
            pool_restarting: self.inner.pool_restarting.load(Ordering::SeqCst),
        }
    }

    pub fn get_metrics(&self) -> DispatchMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }

    /// Routine cleanup: keep one warm idle worker, drop accelerator
    /// program caches.
    pub async fn cleanup_idle_resources(&self) {
        cleanup(&self.inner, CleanupReason::Periodic).await;
    }

    /// Tear down: unregister from the broker, stop health checks,
    /// terminate the pool, release the device.
    pub async fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(broker) = &self.inner.broker {
            broker.unregister(BROKER_ID);
        }
        if let Some(task) = lock(&self.inner.health_task).take() {
            task.abort();
        }
        self.pool_handle().terminate().await;
        if let Some(accel) = &self.inner.accel {
            lock(accel).dispose();
        }
        info!(target: "dispatch.lifecycle", "dispatcher_terminated");
    }

    // -----------------------------------------------------------------
    // Convenience entries
    // -----------------------------------------------------------------

    pub async fn compute_stats(&self, values: Vec<f32>) -> Result<StatsOutput, CoreError> {
        let env = self
            .execute(
                OperationId::ComputeStats,
                Payload::with_values(values),
                ExecuteOptions::default(),
            )
            .await?;
        env.output.into_stats().ok_or_else(shape_error)
    }

    pub async fn compute_histogram(
        &self,
        values: Vec<f32>,
        bins: Option<BinSpec>,
    ) -> Result<HistogramOutput, CoreError> {
        let payload = Payload {
            bins,
            ..Payload::with_values(values)
        };
        let env = self
            .execute(OperationId::ComputeHistogram, payload, ExecuteOptions::default())
            .await?;
        env.output.into_histogram().ok_or_else(shape_error)
    }

    pub async fn compute_correlation(
        &self,
        x_values: Vec<f32>,
        y_values: Vec<f32>,
        method: Method,
    ) -> Result<CorrelationOutput, CoreError> {
        let payload = Payload {
            x_values: Some(x_values),
            y_values: Some(y_values),
            method: Some(method),
            ..Payload::default()
        };
        let env = self
            .execute(OperationId::ComputeCorrelation, payload, ExecuteOptions::default())
            .await?;
        env.output.into_correlation().ok_or_else(shape_error)
    }

    pub async fn compute_differential(
        &self,
        group_a: Vec<f32>,
        group_b: Vec<f32>,
        method: Method,
    ) -> Result<DifferentialOutput, CoreError> {
        let payload = Payload {
            group_a_values: Some(group_a),
            group_b_values: Some(group_b),
            method: Some(method),
            ..Payload::default()
        };
        let env = self
            .execute(OperationId::ComputeDifferential, payload, ExecuteOptions::default())
            .await?;
        env.output.into_differential().ok_or_else(shape_error)
    }

    pub async fn log1p(&self, values: Vec<f32>) -> Result<TransformOutput, CoreError> {
        self.transform(OperationId::Log1p, values).await
    }

    pub async fn zscore(&self, values: Vec<f32>) -> Result<TransformOutput, CoreError> {
        self.transform(OperationId::Zscore, values).await
    }

    pub async fn minmax(&self, values: Vec<f32>) -> Result<TransformOutput, CoreError> {
        self.transform(OperationId::MinMax, values).await
    }

    async fn transform(
        &self,
        op: OperationId,
        values: Vec<f32>,
    ) -> Result<TransformOutput, CoreError> {
        let env = self
            .execute(op, Payload::with_values(values), ExecuteOptions::default())
            .await?;
        env.output.into_transform().ok_or_else(shape_error)
    }

    pub async fn extract_values(
        &self,
        cell_indices: Vec<u32>,
        raw_values: Vec<f32>,
    ) -> Result<ExtractOutput, CoreError> {
        let payload = Payload {
            cell_indices: Some(cell_indices),
            raw_values: Some(raw_values),
            ..Payload::default()
        };
        let env = self
            .execute(OperationId::ExtractValues, payload, ExecuteOptions::default())
            .await?;
        env.output.into_extract().ok_or_else(shape_error)
    }

    pub async fn aggregate_categories(
        &self,
        codes: Vec<i16>,
        categories: Vec<String>,
    ) -> Result<AggregateOutput, CoreError> {
        let payload = Payload {
            codes: Some(codes),
            categories: Some(categories),
            ..Payload::default()
        };
        let env = self
            .execute(OperationId::AggregateCategories, payload, ExecuteOptions::default())
            .await?;
        env.output.into_aggregate().ok_or_else(shape_error)
    }

    // -----------------------------------------------------------------
    // Test hooks
    // -----------------------------------------------------------------

    /// Arm a one-shot accelerator failure (fallback tests).
    #[cfg(feature = "test-internals")]
    pub fn inject_accelerator_failure(&self) {
        if let Some(accel) = &self.inner.accel {
            lock(accel).inject_failure();
        }
    }

    /// Terminate the worker backend mid-flight (fallback tests).
    #[cfg(feature = "test-internals")]
    pub async fn kill_worker_backend(&self) {
        self.pool_handle().terminate().await;
    }
}

fn shape_error() -> CoreError {
    CoreError::Internal("operation returned an unexpected result shape".into())
}

fn spawn_health_task(inner: &Arc<Inner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let period = inner.options.health_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.reset();
        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            if inner.terminated.load(Ordering::SeqCst) {
                break;
            }
            health_check(&inner).await;
        }
    })
}

/// Many pending requests with zero busy workers means the pool's
/// dispatch side has wedged: terminate and re-init it, routing new
/// requests inline meanwhile.
async fn health_check(inner: &Arc<Inner>) {
    let pool = match inner.pool.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    let status = pool.status().await;
    let wedged = status.workers > 0
        && status.busy == 0
        && status.pending >= inner.options.restart_pending_threshold;
    if !wedged {
        return;
    }
    warn!(
        target: "dispatch.health",
        pending = status.pending,
        "worker_backend_wedged_reinitializing"
    );
    inner.pool_restarting.store(true, Ordering::SeqCst);
    pool.terminate().await;
    let fresh = WorkerPool::spawn(inner.options.pool.clone());
    match inner.pool.write() {
        Ok(mut guard) => *guard = fresh,
        Err(poisoned) => *poisoned.into_inner() = fresh,
    }
    inner.pool_restarting.store(false, Ordering::SeqCst);
    inner.metrics.record_pool_restart();
}

fn register_cleanup(inner: &Arc<Inner>, broker: &dyn MemoryPressureBroker) {
    let weak = Arc::downgrade(inner);
    let runtime = tokio::runtime::Handle::current();
    broker.register(
        BROKER_ID,
        Box::new(move |reason| {
            let Some(inner) = weak.upgrade() else { return };
            runtime.spawn(async move {
                cleanup(&inner, reason).await;
            });
        }),
    );
}

async fn cleanup(inner: &Arc<Inner>, reason: CleanupReason) {
    let pool = match inner.pool.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    match reason {
        CleanupReason::Periodic => {
            let _ = pool.prune_idle_workers(1, usize::MAX).await;
            if let Some(accel) = &inner.accel {
                lock(accel).clear_cache();
            }
            debug!(target: "dispatch.memory", "periodic_cleanup_done");
        }
        CleanupReason::Pressure => {
            let _ = pool.prune_idle_workers(0, usize::MAX).await;
            if let Some(accel) = &inner.accel {
                lock(accel).clear_cache();
            }
            inner.metrics.reset();
            debug!(target: "dispatch.memory", "pressure_cleanup_done");
        }
    }
}
