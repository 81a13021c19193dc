use crate::fft::SpectralTransform;
use crate::tensor::{RealTensor, SpectrumTensor};
use anyhow::Result;

/// Learned per-target state.
///
/// `yf` is the spectrum of the desired response and never changes after
/// init. `model_xf` is the exponentially averaged target spectrum and the
/// `alphaf` family is the ridge regression solution recomputed from it at
/// every training step.
#[derive(Debug, Clone)]
pub struct Model {
    /// Spectrum of the latest training patch.
    pub xf: SpectrumTensor,
    /// Exponentially averaged target spectrum.
    pub model_xf: SpectrumTensor,
    /// Desired response spectrum, fixed at init.
    pub yf: SpectrumTensor,
    pub alphaf_num: SpectrumTensor,
    pub alphaf_den: SpectrumTensor,
    /// Learned filter spectrum, `alphaf_num / alphaf_den`.
    pub alphaf: SpectrumTensor,
}

impl Model {
    pub fn new(
        fft: &dyn SpectralTransform,
        width: usize,
        height: usize,
        channels: usize,
        output_sigma: f32,
    ) -> Result<Self> {
        let labels = gaussian_labels(output_sigma, width, height);
        let yf = fft.forward(&labels)?;
        Ok(Self {
            xf: SpectrumTensor::zeros(1, channels, height, width),
            model_xf: SpectrumTensor::zeros(1, channels, height, width),
            yf,
            alphaf_num: SpectrumTensor::zeros(1, 1, height, width),
            alphaf_den: SpectrumTensor::zeros(1, 1, height, width),
            alphaf: SpectrumTensor::zeros(1, 1, height, width),
        })
    }
}

/// Gaussian-shaped label function with its maximum circularly shifted to
/// the top-left corner, as the periodicity of Fourier-domain correlation
/// requires.
pub fn gaussian_labels(sigma: f32, width: usize, height: usize) -> RealTensor {
    let sigma_sqr = sigma * sigma;
    let mut labels = RealTensor::zeros(1, 1, height, width);
    let x0 = -(width as i64) / 2;
    let y0 = -(height as i64) / 2;
    for j in 0..height {
        let y = (y0 + j as i64) as f32;
        for i in 0..width {
            let x = (x0 + i as i64) as f32;
            labels
                .plane_mut(0, 0)
                .set(j, i, (-0.5 * (y * y + x * x) / sigma_sqr).exp());
        }
    }

    let shifted = circshift(&labels, x0, y0);
    debug_assert!(shifted.plane(0, 0).get(0, 0) >= 1.0 - 1e-6);
    shifted
}

/// Circular shift of a single plane by `(dx, dy)` samples; negative values
/// rotate towards the origin.
pub fn circshift(plane: &RealTensor, dx: i64, dy: i64) -> RealTensor {
    assert_eq!(plane.batch(), 1);
    assert_eq!(plane.channels(), 1);
    let (w, h) = (plane.width() as i64, plane.height() as i64);
    let mut out = RealTensor::zeros(1, 1, plane.height(), plane.width());
    for y in 0..h {
        let ty = (y + dy).rem_euclid(h) as usize;
        for x in 0..w {
            let tx = (x + dx).rem_euclid(w) as usize;
            out.plane_mut(0, 0)
                .set(ty, tx, plane.plane(0, 0).get(y as usize, x as usize));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_peak_at_origin() {
        let labels = gaussian_labels(2.0, 16, 8);
        let p = labels.plane(0, 0);
        assert!((p.get(0, 0) - 1.0).abs() < 1e-6);
        for v in p.iter() {
            assert!(v <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn labels_wrap_symmetrically() {
        let labels = gaussian_labels(1.5, 8, 8);
        let p = labels.plane(0, 0);
        // one step right of the origin equals one step left across the wrap
        assert!((p.get(0, 1) - p.get(0, 7)).abs() < 1e-6);
        assert!((p.get(1, 0) - p.get(7, 0)).abs() < 1e-6);
    }

    #[test]
    fn circshift_moves_samples() {
        let mut t = RealTensor::zeros(1, 1, 3, 3);
        t.plane_mut(0, 0).set(1, 1, 1.0);
        let s = circshift(&t, -1, -1);
        assert_eq!(s.plane(0, 0).get(0, 0), 1.0);
        let s = circshift(&t, 1, 0);
        assert_eq!(s.plane(0, 0).get(1, 2), 1.0);
    }
}
