//! Accelerator backend: element-wise transforms and reductions on a
//! GPU-like device.
//!
//! Lifecycle: `init` probes the device and marks the backend available;
//! `dispose` releases it; `clear_cache` drops the program cache (the
//! memory-pressure hook). One backend instance serves one process and is
//! owned by the dispatcher.
//!
//! Semantics match the inline handlers; precision does not have to. The
//! device runs f32 accumulation and interpolated percentiles, and the
//! dispatcher's documented tolerances cover the difference.

pub mod device;

use ahash::AHashMap;
use cyto_catalog::{
    BackendState, BinSpec, HistogramOutput, OpOutput, OperationId, Payload, StatsOutput,
    TransformOutput,
};
use cyto_numeric::histogram::adaptive_histogram;
use cyto_numeric::percentile::percentile_linear;
use device::{ComputeDevice, DeviceReduction, MapKernel, VectorDevice};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccelError {
    #[error("device probe failed: {0}")]
    Probe(String),
    #[error("accelerator not initialized")]
    NotReady,
    #[error("accelerator has no handler for {0}")]
    Unsupported(OperationId),
    #[error("accelerator payload invalid: {0}")]
    Payload(String),
    #[cfg(feature = "test-internals")]
    #[error("injected accelerator failure")]
    Injected,
}

/// Cached per-operation program. Compilation is cheap for the stock
/// device but the cache models the real substrate's pipeline objects, and
/// `clear_cache` gives memory-pressure cleanup something real to drop.
#[derive(Debug, Clone, Copy, Default)]
struct Program {
    launches: u64,
}

pub struct AccelBackend {
    device: Box<dyn ComputeDevice>,
    state: BackendState,
    programs: AHashMap<OperationId, Program>,
    #[cfg(feature = "test-internals")]
    fail_next: bool,
}

impl Default for AccelBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AccelBackend {
    pub fn new() -> Self {
        Self::with_device(Box::new(VectorDevice))
    }

    pub fn with_device(device: Box<dyn ComputeDevice>) -> Self {
        Self {
            device,
            state: BackendState::Unknown,
            programs: AHashMap::new(),
            #[cfg(feature = "test-internals")]
            fail_next: false,
        }
    }

    /// Probe capability and mark the backend available. Idempotent.
    pub fn init(&mut self) -> Result<(), AccelError> {
        if self.state == BackendState::Available {
            return Ok(());
        }
        match self.device.probe() {
            Ok(()) => {
                info!(target: "accel.device", device = self.device.name(), "accelerator_ready");
                self.state = BackendState::Available;
                Ok(())
            }
            Err(err) => {
                info!(target: "accel.device", device = self.device.name(), error = %err, "accelerator_unavailable");
                self.state = BackendState::Unavailable;
                Err(err)
            }
        }
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    /// Release device objects. The backend can be re-initialized later.
    pub fn dispose(&mut self) {
        self.programs.clear();
        self.state = BackendState::Unknown;
        debug!(target: "accel.device", "accelerator_disposed");
    }

    /// Drop program-derived caches; the device stays available.
    pub fn clear_cache(&mut self) {
        let dropped = self.programs.len();
        self.programs.clear();
        debug!(target: "accel.device", dropped, "program_cache_cleared");
    }

    pub fn cached_programs(&self) -> usize {
        self.programs.len()
    }

    /// Launch count of one operation's cached program (zero when the
    /// program has been evicted or never compiled).
    pub fn program_launches(&self, op: OperationId) -> u64 {
        self.programs.get(&op).map(|p| p.launches).unwrap_or(0)
    }

    /// Arm a one-shot failure for the next `execute` call.
    #[cfg(feature = "test-internals")]
    pub fn inject_failure(&mut self) {
        self.fail_next = true;
    }

    /// Run one accelerator-capable operation.
    pub fn execute(&mut self, op: OperationId, payload: &Payload) -> Result<OpOutput, AccelError> {
        if self.state != BackendState::Available {
            return Err(AccelError::NotReady);
        }
        #[cfg(feature = "test-internals")]
        if std::mem::take(&mut self.fail_next) {
            self.state = BackendState::Failed;
            return Err(AccelError::Injected);
        }
        if !cyto_catalog::is_accelerator_capable(op) {
            return Err(AccelError::Unsupported(op));
        }
        let program = self.programs.entry(op).or_default();
        program.launches += 1;

        let values = payload
            .values
            .as_deref()
            .ok_or_else(|| AccelError::Payload("values buffer required".into()))?;

        match op {
            OperationId::Log1p => Ok(OpOutput::Transform(TransformOutput::plain(
                self.device.map(MapKernel::Log1p, values),
            ))),
            OperationId::Zscore => Ok(OpOutput::Transform(self.zscore(values))),
            OperationId::MinMax => Ok(OpOutput::Transform(self.minmax(values))),
            OperationId::Scale => {
                let scale = payload
                    .scale
                    .ok_or_else(|| AccelError::Payload("scale factor required".into()))?;
                let offset = payload.offset.unwrap_or(0.0);
                Ok(OpOutput::Transform(TransformOutput::plain(
                    self.device.map(MapKernel::Affine { scale, offset }, values),
                )))
            }
            OperationId::Clamp => {
                let lo = payload.min.unwrap_or(f32::NEG_INFINITY);
                let hi = payload.max.unwrap_or(f32::INFINITY);
                if lo > hi {
                    return Err(AccelError::Payload(format!("clamp: min {lo} exceeds max {hi}")));
                }
                Ok(OpOutput::Transform(TransformOutput::plain(
                    self.device.map(MapKernel::Clamp { lo, hi }, values),
                )))
            }
            OperationId::ComputeStats => Ok(OpOutput::Stats(self.stats(values))),
            OperationId::ComputeHistogram => {
                // Integer bin counting carries no device-precision upside;
                // the host-side binning is reused verbatim.
                let rule = payload.bins.unwrap_or(BinSpec::Auto).into();
                let h = adaptive_histogram(values, rule);
                Ok(OpOutput::Histogram(HistogramOutput {
                    bins: h.bins(),
                    bin_width: h.bin_width,
                    valid_count: h.valid_count,
                    counts: h.counts,
                    edges: h.edges,
                }))
            }
            other => Err(AccelError::Unsupported(other)),
        }
    }

    fn zscore(&self, values: &[f32]) -> TransformOutput {
        let r = self.device.reduce(values);
        let std = r.variance().sqrt();
        let out = if r.count > 0 && std > 0.0 {
            self.device.map(
                MapKernel::Normalize {
                    sub: r.mean,
                    mul: 1.0 / std,
                },
                values,
            )
        } else {
            self.device.map(MapKernel::Zero, values)
        };
        TransformOutput {
            values: out,
            mean: Some(f64::from(r.mean)),
            std: Some(f64::from(std)),
            min: None,
            max: None,
        }
    }

    fn minmax(&self, values: &[f32]) -> TransformOutput {
        let r = self.device.reduce(values);
        let range = r.max - r.min;
        let out = if r.count > 0 && range > 0.0 {
            self.device.map(
                MapKernel::Normalize {
                    sub: r.min,
                    mul: 1.0 / range,
                },
                values,
            )
        } else {
            self.device.map(MapKernel::Zero, values)
        };
        TransformOutput {
            values: out,
            mean: None,
            std: None,
            min: Some(f64::from(r.min)),
            max: Some(f64::from(r.max)),
        }
    }

    /// Device-flavor stats: f32 reduction plus interpolated percentiles
    /// over a device-sorted copy.
    fn stats(&self, values: &[f32]) -> StatsOutput {
        let r: DeviceReduction = self.device.reduce(values);
        if r.count == 0 {
            return StatsOutput::empty();
        }
        let sorted = self.device.sorted_finite(values);
        let q1 = percentile_linear(&sorted, 25.0);
        let q3 = percentile_linear(&sorted, 75.0);
        let variance = f64::from(r.variance());
        StatsOutput {
            count: r.count as usize,
            min: f64::from(r.min),
            max: f64::from(r.max),
            mean: f64::from(r.mean),
            median: percentile_linear(&sorted, 50.0),
            std: variance.sqrt(),
            q1,
            q3,
            iqr: q3 - q1,
            sum: f64::from(r.sum),
            variance,
        }
    }
}
