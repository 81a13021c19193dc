use crate::fft::SpectralTransform;
use crate::tensor::{RealTensor, SpectrumTensor};
use anyhow::Result;

/// Gaussian kernel correlation between two feature spectra, the core of
/// kernelized correlation filtering.
///
/// For spectra `X` (candidates, possibly batched) and `Y` (model, batch 1)
/// the kernel surface is `exp(-d / sigma^2)` where `d` is the per-sample
/// squared distance recovered from the cross-correlation, clamped at zero
/// before the exponential so floating-point cancellation can not produce
/// negative distances. The surface is returned in the spectral domain.
#[derive(Debug, Clone)]
pub struct GaussianCorrelation {
    sigma: f32,
}

impl GaussianCorrelation {
    pub fn new(sigma: f32) -> Self {
        assert!(sigma > 0.0);
        Self { sigma }
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    /// Kernelized correlation spectrum of `xf` against `yf`.
    ///
    /// With `auto_correlation` the `yf` argument is ignored and `xf` is
    /// correlated against itself (the training path); otherwise `yf` must be
    /// a single-batch model spectrum shared across all batch entries of
    /// `xf` (the tracking path).
    pub fn correlate(
        &self,
        fft: &dyn SpectralTransform,
        xf: &SpectrumTensor,
        yf: &SpectrumTensor,
        auto_correlation: bool,
    ) -> Result<SpectrumTensor> {
        let plane = xf.plane_len() as f32;

        let xf_sqr_norm = sqr_norms(xf, plane);
        let yf_sqr_norm = if auto_correlation {
            None
        } else {
            assert_eq!(yf.batch(), 1);
            Some(sqr_norms(yf, plane)[0])
        };

        let xy = if auto_correlation {
            xf.sqr_mag()
        } else {
            xf.mul(&yf.conj())
        };

        // ifft and sum over the channel axis, individual channels do not
        // matter past this point
        let xy_sum = xy.sum_over_channels();
        let cross = fft.inverse(&xy_sum)?;

        let numel_inv = 1.0 / (plane * xf.channels() as f32);
        let sigma_sqr_inv = 1.0 / (self.sigma * self.sigma);

        let mut surface = RealTensor::zeros(xf.batch(), 1, xf.height(), xf.width());
        for b in 0..xf.batch() {
            let x_norm = xf_sqr_norm[b];
            let y_norm = yf_sqr_norm.unwrap_or(x_norm);
            for (out, corr) in surface
                .batch_data_mut(b)
                .iter_mut()
                .zip(cross.batch_data(b).iter())
            {
                let d = ((x_norm + y_norm - 2.0 * corr) * numel_inv).max(0.0);
                *out = (-d * sigma_sqr_inv).exp();
            }
        }

        fft.forward(&surface)
    }
}

fn sqr_norms(spectrum: &SpectrumTensor, plane: f32) -> Vec<f32> {
    (0..spectrum.batch())
        .map(|b| {
            spectrum
                .batch_data(b)
                .iter()
                .map(|c| c.norm_sqr())
                .sum::<f32>()
                / plane
        })
        .collect()
}
