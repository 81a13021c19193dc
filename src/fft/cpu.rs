use crate::fft::SpectralTransform;
use crate::tensor::{RealTensor, SpectrumTensor};
use crate::Errors;
use anyhow::Result;
use rayon::prelude::*;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProblemSize {
    width: usize,
    height: usize,
    channels: usize,
    hypotheses: usize,
}

struct Plans {
    row_forward: Arc<dyn Fft<f32>>,
    row_inverse: Arc<dyn Fft<f32>>,
    col_forward: Arc<dyn Fft<f32>>,
    col_inverse: Arc<dyn Fft<f32>>,
}

/// CPU transform backend. Row and column plans are created once per problem
/// size; independent planes are processed on the rayon pool.
#[derive(Default)]
pub struct CpuFft {
    size: Option<ProblemSize>,
    plans: Option<Plans>,
    window: Option<RealTensor>,
}

impl fmt::Debug for CpuFft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuFft").field("size", &self.size).finish()
    }
}

impl CpuFft {
    pub fn new() -> Self {
        Self::default()
    }

    fn size(&self) -> Result<ProblemSize> {
        self.size.ok_or_else(|| Errors::TransformNotInitialized.into())
    }

    /// In-place 2D transform: rows, transpose, columns, transpose back.
    fn transform_plane(plans: &Plans, buf: &mut [Complex32], width: usize, height: usize, inverse: bool) {
        let (row, col) = if inverse {
            (&plans.row_inverse, &plans.col_inverse)
        } else {
            (&plans.row_forward, &plans.col_forward)
        };

        for r in buf.chunks_mut(width) {
            row.process(r);
        }

        let mut transposed = vec![Complex32::default(); width * height];
        for y in 0..height {
            for x in 0..width {
                transposed[x * height + y] = buf[y * width + x];
            }
        }
        for c in transposed.chunks_mut(height) {
            col.process(c);
        }
        for y in 0..height {
            for x in 0..width {
                buf[y * width + x] = transposed[x * height + y];
            }
        }
    }

    fn check_spatial(&self, width: usize, height: usize, channels: usize, batch: usize) -> Result<ProblemSize> {
        let size = self.size()?;
        if width != size.width || height != size.height {
            return Err(Errors::TransformShape {
                expected: "the initialized spatial size",
                width,
                height,
                channels,
                batch,
            }
            .into());
        }
        Ok(size)
    }
}

impl SpectralTransform for CpuFft {
    fn init(
        &mut self,
        width: usize,
        height: usize,
        channels: usize,
        hypotheses: usize,
    ) -> Result<()> {
        let mut planner = FftPlanner::new();
        self.plans = Some(Plans {
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
        });
        self.size = Some(ProblemSize {
            width,
            height,
            channels,
            hypotheses,
        });
        self.window = None;
        Ok(())
    }

    fn set_window(&mut self, window: RealTensor) {
        if let Some(size) = self.size {
            assert_eq!(window.width(), size.width);
            assert_eq!(window.height(), size.height);
        }
        assert_eq!(window.batch(), 1);
        assert_eq!(window.channels(), 1);
        self.window = Some(window);
    }

    fn forward(&self, input: &RealTensor) -> Result<SpectrumTensor> {
        let size = self.check_spatial(input.width(), input.height(), input.channels(), input.batch())?;
        if input.channels() != 1 {
            return Err(Errors::TransformShape {
                expected: "a single-channel input",
                width: input.width(),
                height: input.height(),
                channels: input.channels(),
                batch: input.batch(),
            }
            .into());
        }
        let plans = self.plans.as_ref().expect("plans exist when size is set");

        let plane = input.plane_len();
        let mut out = SpectrumTensor::zeros(input.batch(), 1, input.height(), input.width());
        out.data_mut()
            .par_chunks_mut(plane)
            .zip(input.data().par_chunks(plane))
            .for_each(|(dst, src)| {
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    *d = Complex32::new(*s, 0.0);
                }
                Self::transform_plane(plans, dst, size.width, size.height, false);
            });
        Ok(out)
    }

    fn forward_window(&self, patch: &RealTensor) -> Result<SpectrumTensor> {
        let size = self.check_spatial(patch.width(), patch.height(), patch.channels(), patch.batch())?;
        if patch.channels() != size.channels || patch.batch() > size.hypotheses {
            return Err(Errors::TransformShape {
                expected: "the initialized channel and hypothesis counts",
                width: patch.width(),
                height: patch.height(),
                channels: patch.channels(),
                batch: patch.batch(),
            }
            .into());
        }
        let plans = self.plans.as_ref().expect("plans exist when size is set");
        let window = self.window.as_ref().ok_or(Errors::TransformNotInitialized)?;

        let plane = patch.plane_len();
        let mut out =
            SpectrumTensor::zeros(patch.batch(), patch.channels(), patch.height(), patch.width());
        out.data_mut()
            .par_chunks_mut(plane)
            .zip(patch.data().par_chunks(plane))
            .for_each(|(dst, src)| {
                for ((d, s), w) in dst.iter_mut().zip(src.iter()).zip(window.data().iter()) {
                    *d = Complex32::new(*s * *w, 0.0);
                }
                Self::transform_plane(plans, dst, size.width, size.height, false);
            });
        Ok(out)
    }

    fn inverse(&self, spectrum: &SpectrumTensor) -> Result<RealTensor> {
        let size = self.check_spatial(
            spectrum.width(),
            spectrum.height(),
            spectrum.channels(),
            spectrum.batch(),
        )?;
        let plans = self.plans.as_ref().expect("plans exist when size is set");

        let plane = spectrum.plane_len();
        let scale = 1.0 / plane as f32;
        let mut out = RealTensor::zeros(
            spectrum.batch(),
            spectrum.channels(),
            spectrum.height(),
            spectrum.width(),
        );
        out.data_mut()
            .par_chunks_mut(plane)
            .zip(spectrum.data().par_chunks(plane))
            .for_each(|(dst, src)| {
                let mut buf = src.to_vec();
                Self::transform_plane(plans, &mut buf, size.width, size.height, true);
                for (d, s) in dst.iter_mut().zip(buf.iter()) {
                    *d = s.re * scale;
                }
            });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(width: usize, height: usize, channels: usize, hypotheses: usize) -> CpuFft {
        let mut fft = CpuFft::new();
        fft.init(width, height, channels, hypotheses).unwrap();
        fft
    }

    fn ramp(width: usize, height: usize) -> RealTensor {
        let mut t = RealTensor::zeros(1, 1, height, width);
        for y in 0..height {
            for x in 0..width {
                t.plane_mut(0, 0)
                    .set(y, x, (y * width + x) as f32 * 0.37 - 2.0);
            }
        }
        t
    }

    #[test]
    fn forward_inverse_roundtrip() {
        let fft = backend(16, 8, 1, 1);
        let input = ramp(16, 8);
        let spectrum = fft.forward(&input).unwrap();
        let restored = fft.inverse(&spectrum).unwrap();
        for (a, b) in input.data().iter().zip(restored.data().iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn forward_inverse_roundtrip_on_noise() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let fft = backend(12, 20, 1, 1);
        let mut input = RealTensor::zeros(1, 1, 20, 12);
        for v in input.data_mut() {
            *v = rng.gen_range(-1.0..1.0);
        }
        let restored = fft.inverse(&fft.forward(&input).unwrap()).unwrap();
        for (a, b) in input.data().iter().zip(restored.data().iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn forward_window_applies_window() {
        let mut fft = backend(8, 8, 1, 1);
        let window = crate::fft::cosine_window(8, 8);
        fft.set_window(window.clone());

        let mut ones = RealTensor::zeros(1, 1, 8, 8);
        ones.data_mut().fill(1.0);

        let windowed = fft.forward_window(&ones).unwrap();
        let direct = fft.forward(&window).unwrap();
        for (a, b) in windowed.data().iter().zip(direct.data().iter()) {
            assert!((a - b).norm() < 1e-4);
        }
    }

    #[test]
    fn batched_forward_matches_per_plane() {
        let mut fft = backend(8, 4, 2, 3);
        fft.set_window(crate::fft::cosine_window(8, 4));

        let mut batched = RealTensor::zeros(3, 2, 4, 8);
        for (i, v) in batched.data_mut().iter_mut().enumerate() {
            *v = ((i * 31 % 17) as f32) * 0.25 - 1.0;
        }
        let whole = fft.forward_window(&batched).unwrap();

        for b in 0..3 {
            let mut single = RealTensor::zeros(1, 2, 4, 8);
            for c in 0..2 {
                for y in 0..4 {
                    for x in 0..8 {
                        single.plane_mut(0, c).set(y, x, batched.plane(b, c).get(y, x));
                    }
                }
            }
            let spectrum = fft.forward_window(&single).unwrap();
            for c in 0..2 {
                for y in 0..4 {
                    for x in 0..8 {
                        let d = (whole.plane(b, c).get(y, x) - spectrum.plane(0, c).get(y, x))
                            .norm();
                        assert!(d < 1e-4);
                    }
                }
            }
        }
    }

    #[test]
    fn inverse_normalizes_by_sample_count() {
        let fft = backend(8, 8, 1, 1);
        let mut dc = RealTensor::zeros(1, 1, 8, 8);
        dc.data_mut().fill(3.0);
        let spectrum = fft.forward(&dc).unwrap();
        // all energy in the DC bin
        assert!((spectrum.plane(0, 0).get(0, 0).re - 3.0 * 64.0).abs() < 1e-3);
        let restored = fft.inverse(&spectrum).unwrap();
        for v in restored.data() {
            assert!((v - 3.0).abs() < 1e-4);
        }
    }

    #[test]
    fn uninitialized_backend_fails() {
        let fft = CpuFft::new();
        let input = ramp(4, 4);
        assert!(fft.forward(&input).is_err());
    }

    #[test]
    fn wrong_size_fails() {
        let fft = backend(8, 8, 1, 1);
        let input = ramp(4, 4);
        assert!(fft.forward(&input).is_err());
    }
}
