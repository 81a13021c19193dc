use crate::tensor::RealTensor;
use crate::utils::image::ImagePlane;

/// Produces the feature channels of one tracking patch.
///
/// Implementations must be deterministic and emit a fixed grid: for a patch
/// of `w` x `h` pixels and cell size `c`, the output shape is
/// `[1][channels()][h / c][w / c]`. The color patch is only supplied when
/// the frame carries color planes and [FeatureExtractor::uses_color] is
/// true.
pub trait FeatureExtractor: Send + Sync {
    /// Number of output channels.
    fn channels(&self) -> usize;

    fn uses_color(&self) -> bool {
        false
    }

    fn extract(
        &self,
        gray: &ImagePlane,
        color: Option<&[ImagePlane]>,
        cell_size: usize,
    ) -> RealTensor;
}

/// Cell-averaged, zero-centered grayscale intensities. The simplest usable
/// descriptor for correlation filtering; heavier descriptors (gradient
/// histograms, color naming) plug in through the same trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntensityFeatures;

impl FeatureExtractor for IntensityFeatures {
    fn channels(&self) -> usize {
        1
    }

    fn extract(
        &self,
        gray: &ImagePlane,
        _color: Option<&[ImagePlane]>,
        cell_size: usize,
    ) -> RealTensor {
        assert!(cell_size > 0);
        assert_eq!(gray.width() % cell_size, 0);
        assert_eq!(gray.height() % cell_size, 0);
        let grid_w = gray.width() / cell_size;
        let grid_h = gray.height() / cell_size;
        let cell_norm = 1.0 / (cell_size * cell_size) as f32;

        let mut out = RealTensor::zeros(1, 1, grid_h, grid_w);
        for gy in 0..grid_h {
            for gx in 0..grid_w {
                let mut acc = 0.0;
                for y in 0..cell_size {
                    for x in 0..cell_size {
                        acc += gray.get(gx * cell_size + x, gy * cell_size + y);
                    }
                }
                out.plane_mut(0, 0).set(gy, gx, acc * cell_norm - 0.5);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intensity_grid_shape() {
        let img = ImagePlane::from_fn(16, 8, |_, _| 1.0);
        let f = IntensityFeatures;
        let t = f.extract(&img, None, 4);
        assert_eq!(t.channels(), 1);
        assert_eq!(t.height(), 2);
        assert_eq!(t.width(), 4);
        for v in t.data() {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn cell_averaging() {
        let img = ImagePlane::from_fn(4, 4, |x, y| if x < 2 && y < 2 { 1.0 } else { 0.0 });
        let f = IntensityFeatures;
        let t = f.extract(&img, None, 2);
        assert!((t.plane(0, 0).get(0, 0) - 0.5).abs() < 1e-6);
        assert!((t.plane(0, 0).get(0, 1) + 0.5).abs() < 1e-6);
        assert!((t.plane(0, 0).get(1, 0) + 0.5).abs() < 1e-6);
    }

    #[test]
    fn unit_cell_passes_values_through() {
        let img = ImagePlane::from_fn(3, 3, |x, y| (x + y) as f32 * 0.1);
        let f = IntensityFeatures;
        let t = f.extract(&img, None, 1);
        for y in 0..3 {
            for x in 0..3 {
                assert!((t.plane(0, 0).get(y, x) - (img.get(x, y) - 0.5)).abs() < 1e-6);
            }
        }
    }
}
