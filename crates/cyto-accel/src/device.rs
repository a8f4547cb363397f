//! Device seam: the minimal set of primitives the backend composes into
//! operations. The stock implementation is a vectorized CPU device that
//! stands in for the GPU-like substrate; everything above the trait is
//! device-agnostic.
//!
//! Device arithmetic is f32 end to end. That is deliberate: it reproduces
//! the precision profile of the real substrate, so element-wise results
//! may differ from the f64 inline path by a ULP and reductions by the
//! usual accumulation-order noise.

use crate::AccelError;

/// Element-wise kernels. Parameters ride along in the variant so one
/// compiled program per shape can serve every launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapKernel {
    Log1p,
    /// `(v - sub) * mul` — serves z-score (`sub = mean, mul = 1/std`) and
    /// min-max (`sub = min, mul = 1/range`).
    Normalize { sub: f32, mul: f32 },
    /// `v * scale + offset`.
    Affine { scale: f32, offset: f32 },
    Clamp { lo: f32, hi: f32 },
    /// Used by the zero-spread / zero-range degenerate paths.
    Zero,
}

/// Single-pass f32 reduction produced by [`ComputeDevice::reduce`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceReduction {
    pub count: u32,
    pub sum: f32,
    pub mean: f32,
    /// Welford M2 in device precision.
    pub m2: f32,
    pub min: f32,
    pub max: f32,
}

impl DeviceReduction {
    pub fn variance(&self) -> f32 {
        if self.count == 0 { f32::NAN } else { self.m2 / self.count as f32 }
    }
}

pub trait ComputeDevice: Send {
    fn name(&self) -> &'static str;

    /// Probe device availability. Called once by backend init.
    fn probe(&self) -> Result<(), AccelError>;

    /// Element-wise map; non-finite lanes pass through as NaN.
    fn map(&self, kernel: MapKernel, input: &[f32]) -> Vec<f32>;

    /// Finite-lane reduction (count, sum, moments, extrema).
    fn reduce(&self, input: &[f32]) -> DeviceReduction;

    /// Sort + filter: the finite lanes of `input`, ascending. Backs the
    /// device-side percentile path.
    fn sorted_finite(&self, input: &[f32]) -> Vec<f32>;
}

/// Stock device: chunked f32 loops over host memory.
#[derive(Debug, Default)]
pub struct VectorDevice;

impl VectorDevice {
    #[inline]
    fn apply(kernel: MapKernel, v: f32) -> f32 {
        if !v.is_finite() {
            return f32::NAN;
        }
        match kernel {
            MapKernel::Log1p => v.ln_1p(),
            MapKernel::Normalize { sub, mul } => (v - sub) * mul,
            MapKernel::Affine { scale, offset } => v * scale + offset,
            MapKernel::Clamp { lo, hi } => v.clamp(lo, hi),
            MapKernel::Zero => 0.0,
        }
    }
}

impl ComputeDevice for VectorDevice {
    fn name(&self) -> &'static str {
        "vector-cpu"
    }

    fn probe(&self) -> Result<(), AccelError> {
        Ok(())
    }

    fn map(&self, kernel: MapKernel, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(input.len());
        // Four-lane groups keep the loop auto-vectorizable.
        let mut chunks = input.chunks_exact(4);
        for lane in chunks.by_ref() {
            out.push(Self::apply(kernel, lane[0]));
            out.push(Self::apply(kernel, lane[1]));
            out.push(Self::apply(kernel, lane[2]));
            out.push(Self::apply(kernel, lane[3]));
        }
        for &v in chunks.remainder() {
            out.push(Self::apply(kernel, v));
        }
        out
    }

    fn reduce(&self, input: &[f32]) -> DeviceReduction {
        let mut r = DeviceReduction {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            ..DeviceReduction::default()
        };
        for &v in input.iter().filter(|v| v.is_finite()) {
            r.count += 1;
            r.sum += v;
            let delta = v - r.mean;
            r.mean += delta / r.count as f32;
            r.m2 += delta * (v - r.mean);
            r.min = r.min.min(v);
            r.max = r.max.max(v);
        }
        if r.count == 0 {
            r.min = f32::NAN;
            r.max = f32::NAN;
            r.mean = f32::NAN;
            r.m2 = f32::NAN;
        }
        r
    }

    fn sorted_finite(&self, input: &[f32]) -> Vec<f32> {
        let mut out: Vec<f32> = input.iter().copied().filter(|v| v.is_finite()).collect();
        out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        out
    }
}
