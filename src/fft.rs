use crate::tensor::{RealTensor, SpectrumTensor};
use anyhow::Result;
use std::f32::consts::PI;

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;

/// Two-dimensional spectral transform over tracker tensors.
///
/// Implementations share one numeric contract and are selected once at
/// configuration time. Plans and device resources are allocated by
/// [SpectralTransform::init] for a fixed problem size and reused for every
/// frame; re-initialization with a new size replaces them. Backend failures
/// are fatal for the frame being processed: they propagate as errors and
/// are never retried.
pub trait SpectralTransform: Send + Sync {
    /// Prepares plans for the given spatial size, feature channel count and
    /// hypothesis count.
    fn init(&mut self, width: usize, height: usize, channels: usize, hypotheses: usize)
        -> Result<()>;

    /// Stores the window applied by [SpectralTransform::forward_window].
    fn set_window(&mut self, window: RealTensor);

    /// Full complex transform of single-channel input, one spectrum per
    /// batch entry.
    fn forward(&self, input: &RealTensor) -> Result<SpectrumTensor>;

    /// Windows every channel with the stored window, then transforms each
    /// channel independently.
    fn forward_window(&self, patch: &RealTensor) -> Result<SpectrumTensor>;

    /// Inverse transform with 1/N normalization; channels are inverted
    /// independently and reassembled in order.
    fn inverse(&self, spectrum: &SpectrumTensor) -> Result<RealTensor>;
}

/// Separable power-of-cosine (Hann) window as the outer product of two 1D
/// windows. A degenerate one-sample axis gets a flat window.
pub fn cosine_window(width: usize, height: usize) -> RealTensor {
    let axis = |n: usize| -> Vec<f32> {
        if n < 2 {
            return vec![1.0; n];
        }
        let n_inv = 1.0 / (n as f32 - 1.0);
        (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 * n_inv).cos()))
            .collect()
    };
    let wx = axis(width);
    let wy = axis(height);

    let mut out = RealTensor::zeros(1, 1, height, width);
    for y in 0..height {
        for x in 0..width {
            out.plane_mut(0, 0).set(y, x, wy[y] * wx[x]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EPS;

    #[test]
    fn cosine_window_is_zero_on_edges_and_peaks_inside() {
        let w = cosine_window(8, 8);
        let p = w.plane(0, 0);
        assert!(p.get(0, 0).abs() < EPS);
        assert!(p.get(0, 7).abs() < EPS);
        assert!(p.get(7, 0).abs() < EPS);
        let mid = p.get(4, 4);
        assert!(mid > 0.9);
        for v in p.iter() {
            assert!((0.0..=1.0 + EPS).contains(&v));
        }
    }

    #[test]
    fn cosine_window_degenerate_axis() {
        let w = cosine_window(1, 4);
        for y in 0..4 {
            let v = w.plane(0, 0).get(y, 0);
            assert!(v.is_finite());
        }
    }
}
