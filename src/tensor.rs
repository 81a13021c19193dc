use rustfft::num_complex::Complex32;

pub mod view;

use view::{Plane, PlaneMut};

/// Dense row-major tensor with shape `[batch][channels][height][width]`.
///
/// The batch axis carries scale/angle hypotheses when the evaluation is
/// batched; single-hypothesis tensors use `batch == 1`. Elementwise binary
/// operations require matching heights and widths; any other shape mismatch
/// is a programming error and panics.
#[derive(Debug, Clone)]
pub struct Tensor<T> {
    data: Vec<T>,
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
}

/// Spatial-domain tensor (patches, response maps).
pub type RealTensor = Tensor<f32>;

/// Fourier-domain tensor (spectra). Real/imaginary pairing is carried by the
/// element type rather than interleaved scalar channels.
pub type SpectrumTensor = Tensor<Complex32>;

impl<T: Copy + Default> Tensor<T> {
    pub fn zeros(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        assert!(batch > 0 && channels > 0 && height > 0 && width > 0);
        Self {
            data: vec![T::default(); batch * channels * height * width],
            batch,
            channels,
            height,
            width,
        }
    }

    pub fn from_data(
        data: Vec<T>,
        batch: usize,
        channels: usize,
        height: usize,
        width: usize,
    ) -> Self {
        assert_eq!(data.len(), batch * channels * height * width);
        Self {
            data,
            batch,
            channels,
            height,
            width,
        }
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Samples of one spatial plane.
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn plane(&self, batch: usize, channel: usize) -> Plane<'_, T> {
        assert!(batch < self.batch && channel < self.channels);
        let start = (batch * self.channels + channel) * self.plane_len();
        Plane::new(
            &self.data[start..start + self.plane_len()],
            self.height,
            self.width,
            self.width,
        )
    }

    pub fn plane_mut(&mut self, batch: usize, channel: usize) -> PlaneMut<'_, T> {
        assert!(batch < self.batch && channel < self.channels);
        let len = self.plane_len();
        let start = (batch * self.channels + channel) * len;
        PlaneMut::new(
            &mut self.data[start..start + len],
            self.height,
            self.width,
            self.width,
        )
    }

    /// All samples of one batch entry (every channel).
    pub fn batch_data(&self, batch: usize) -> &[T] {
        assert!(batch < self.batch);
        let len = self.channels * self.plane_len();
        &self.data[batch * len..(batch + 1) * len]
    }

    pub fn batch_data_mut(&mut self, batch: usize) -> &mut [T] {
        assert!(batch < self.batch);
        let len = self.channels * self.plane_len();
        &mut self.data[batch * len..(batch + 1) * len]
    }

    fn same_spatial(&self, other: &Self) {
        assert_eq!(self.height, other.height);
        assert_eq!(self.width, other.width);
    }
}

impl SpectrumTensor {
    /// Copy with the imaginary part of every element negated.
    pub fn conj(&self) -> Self {
        self.map(|c| c.conj())
    }

    /// Copy where every element becomes `re^2 + im^2` with zero imaginary
    /// part.
    pub fn sqr_mag(&self) -> Self {
        self.map(|c| Complex32::new(c.norm_sqr(), 0.0))
    }

    /// Copy with a real scalar added to every element.
    pub fn add_scalar(&self, value: f32) -> Self {
        self.map(|c| c + value)
    }

    /// Elementwise product. The right-hand side must either match the shape
    /// exactly or be a single-batch tensor with matching channels, in which
    /// case it is reused for every batch entry of `self`.
    pub fn mul(&self, other: &Self) -> Self {
        self.zip(other, |a, b| a * b)
    }

    /// Elementwise quotient, with the same shape rules as [SpectrumTensor::mul].
    pub fn div(&self, other: &Self) -> Self {
        self.zip(other, |a, b| a / b)
    }

    /// Product of an n-channel tensor with a single-channel, single-batch
    /// tensor; the right-hand plane multiplies every channel of every batch
    /// entry.
    pub fn mul_broadcast(&self, other: &Self) -> Self {
        self.same_spatial(other);
        assert_eq!(other.batch, 1);
        assert_eq!(other.channels, 1);

        let plane = self.plane_len();
        let mut out = self.clone();
        for chunk in out.data.chunks_mut(plane) {
            for (a, b) in chunk.iter_mut().zip(other.data.iter()) {
                *a *= *b;
            }
        }
        out
    }

    /// Collapses the channel axis by complex addition, keeping the batch
    /// axis: `out[b][p] = sum over c of self[b][c][p]`.
    pub fn sum_over_channels(&self) -> Self {
        let plane = self.plane_len();
        let mut out = Self::zeros(self.batch, 1, self.height, self.width);
        for b in 0..self.batch {
            let src = self.batch_data(b);
            let dst = &mut out.data[b * plane..(b + 1) * plane];
            for chunk in src.chunks(plane) {
                for (acc, v) in dst.iter_mut().zip(chunk.iter()) {
                    *acc += *v;
                }
            }
        }
        out
    }

    /// Exponential blend `(1 - factor) * self + factor * other`, elementwise.
    pub fn lerp(&self, other: &Self, factor: f32) -> Self {
        self.zip(other, |a, b| a * (1.0 - factor) + b * factor)
    }

    fn map(&self, op: impl Fn(Complex32) -> Complex32) -> Self {
        let mut out = self.clone();
        for v in out.data.iter_mut() {
            *v = op(*v);
        }
        out
    }

    fn zip(&self, other: &Self, op: impl Fn(Complex32, Complex32) -> Complex32) -> Self {
        self.same_spatial(other);
        assert_eq!(self.channels, other.channels);
        assert!(other.batch == self.batch || other.batch == 1);

        let mut out = self.clone();
        if other.batch == self.batch {
            for (a, b) in out.data.iter_mut().zip(other.data.iter()) {
                *a = op(*a, *b);
            }
        } else {
            let len = other.data.len();
            for chunk in out.data.chunks_mut(len) {
                for (a, b) in chunk.iter_mut().zip(other.data.iter()) {
                    *a = op(*a, *b);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EPS;

    fn cx(re: f32, im: f32) -> Complex32 {
        Complex32::new(re, im)
    }

    fn close(a: Complex32, b: Complex32) -> bool {
        (a - b).norm() < EPS
    }

    #[test]
    fn conj_negates_imaginary() {
        let t = SpectrumTensor::from_data(vec![cx(1.0, 2.0), cx(-3.0, -4.0)], 1, 1, 1, 2);
        let c = t.conj();
        assert!(close(c.data()[0], cx(1.0, -2.0)));
        assert!(close(c.data()[1], cx(-3.0, 4.0)));
    }

    #[test]
    fn sqr_mag_is_real() {
        let t = SpectrumTensor::from_data(vec![cx(3.0, 4.0)], 1, 1, 1, 1);
        let m = t.sqr_mag();
        assert!(close(m.data()[0], cx(25.0, 0.0)));
    }

    #[test]
    fn mul_and_div_roundtrip() {
        let a = SpectrumTensor::from_data(vec![cx(1.0, 2.0), cx(3.0, -1.0)], 1, 2, 1, 1);
        let b = SpectrumTensor::from_data(vec![cx(0.5, 0.5), cx(-2.0, 1.0)], 1, 2, 1, 1);
        let p = a.mul(&b);
        let q = p.div(&b);
        for (x, y) in q.data().iter().zip(a.data().iter()) {
            assert!(close(*x, *y));
        }
    }

    #[test]
    fn mul_broadcasts_single_batch_rhs() {
        let a = SpectrumTensor::from_data(
            vec![cx(1.0, 0.0), cx(2.0, 0.0), cx(3.0, 0.0), cx(4.0, 0.0)],
            2,
            1,
            1,
            2,
        );
        let b = SpectrumTensor::from_data(vec![cx(2.0, 0.0), cx(0.5, 0.0)], 1, 1, 1, 2);
        let p = a.mul(&b);
        assert!(close(p.data()[0], cx(2.0, 0.0)));
        assert!(close(p.data()[1], cx(1.0, 0.0)));
        assert!(close(p.data()[2], cx(6.0, 0.0)));
        assert!(close(p.data()[3], cx(2.0, 0.0)));
    }

    #[test]
    fn mul_broadcast_applies_plane_to_all_channels() {
        let a = SpectrumTensor::from_data(
            vec![cx(1.0, 1.0), cx(2.0, 0.0), cx(0.0, 3.0), cx(1.0, -1.0)],
            1,
            2,
            1,
            2,
        );
        let b = SpectrumTensor::from_data(vec![cx(0.0, 1.0), cx(2.0, 0.0)], 1, 1, 1, 2);
        let p = a.mul_broadcast(&b);
        assert!(close(p.data()[0], cx(1.0, 1.0) * cx(0.0, 1.0)));
        assert!(close(p.data()[1], cx(4.0, 0.0)));
        assert!(close(p.data()[2], cx(0.0, 3.0) * cx(0.0, 1.0)));
        assert!(close(p.data()[3], cx(2.0, -2.0)));
    }

    #[test]
    fn channel_sum_is_exact_complex_addition() {
        let mut t = SpectrumTensor::zeros(1, 3, 2, 2);
        for c in 0..3 {
            for y in 0..2 {
                for x in 0..2 {
                    t.plane_mut(0, c)
                        .set(y, x, cx((c + 1) as f32 * (y as f32 + 1.0), x as f32));
                }
            }
        }
        let s = t.sum_over_channels();
        assert_eq!(s.channels(), 1);
        for y in 0..2 {
            for x in 0..2 {
                let expected = (0..3)
                    .map(|c| t.plane(0, c).get(y, x))
                    .fold(cx(0.0, 0.0), |a, b| a + b);
                assert_eq!(s.plane(0, 0).get(y, x), expected);
            }
        }
    }

    #[test]
    fn add_scalar_touches_real_part_only() {
        let t = SpectrumTensor::from_data(vec![cx(1.0, 2.0)], 1, 1, 1, 1);
        let a = t.add_scalar(0.5);
        assert!(close(a.data()[0], cx(1.5, 2.0)));
    }

    #[test]
    fn lerp_zero_factor_keeps_left() {
        let a = SpectrumTensor::from_data(vec![cx(1.0, 2.0), cx(3.0, 4.0)], 1, 1, 1, 2);
        let b = SpectrumTensor::from_data(vec![cx(9.0, 9.0), cx(9.0, 9.0)], 1, 1, 1, 2);
        let l = a.lerp(&b, 0.0);
        for (x, y) in l.data().iter().zip(a.data().iter()) {
            assert!(close(*x, *y));
        }
        let l = a.lerp(&b, 1.0);
        for (x, y) in l.data().iter().zip(b.data().iter()) {
            assert!(close(*x, *y));
        }
    }

    #[test]
    #[should_panic]
    fn mismatched_shapes_panic() {
        let a = SpectrumTensor::zeros(1, 2, 2, 2);
        let b = SpectrumTensor::zeros(1, 3, 2, 2);
        let _ = a.mul(&b);
    }

    #[test]
    #[should_panic]
    fn broadcast_requires_single_channel_rhs() {
        let a = SpectrumTensor::zeros(1, 2, 2, 2);
        let b = SpectrumTensor::zeros(1, 2, 2, 2);
        let _ = a.mul_broadcast(&b);
    }
}
