use crate::fft::SpectralTransform;
use crate::kernel::GaussianCorrelation;
use crate::tensor::view::Plane;
use crate::tensor::RealTensor;
use crate::trackers::kcf::model::Model;
use crate::utils::features::FeatureExtractor;
use crate::utils::image::Frame;
use anyhow::Result;
use itertools::Itertools;
use rayon::prelude::*;

/// The fixed set of (scale, angle) offsets tested every frame, scale-major.
#[derive(Debug, Clone)]
pub struct ScaleAngleGrid {
    scales: Vec<f32>,
    angles: Vec<f32>,
}

impl ScaleAngleGrid {
    pub fn new(num_scales: usize, scale_step: f32, num_angles: usize, angle_step: f32) -> Self {
        assert!(num_scales > 0 && num_angles > 0);
        let scales = (-((num_scales as i32 - 1) / 2)..=(num_scales as i32 / 2))
            .map(|i| scale_step.powi(i))
            .collect();
        let angles = (-((num_angles as i32 - 1) / 2)..=(num_angles as i32 / 2))
            .map(|i| i as f32 * angle_step)
            .collect();
        Self { scales, angles }
    }

    pub fn len(&self) -> usize {
        self.scales.len() * self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    pub fn angles(&self) -> &[f32] {
        &self.angles
    }

    pub fn scale_index(&self, index: usize) -> usize {
        index / self.angles.len()
    }

    pub fn angle_index(&self, index: usize) -> usize {
        index % self.angles.len()
    }

    pub fn index(&self, scale_index: usize, angle_index: usize) -> usize {
        assert!(scale_index < self.scales.len() && angle_index < self.angles.len());
        scale_index * self.angles.len() + angle_index
    }

    pub fn scale_of(&self, index: usize) -> f32 {
        self.scales[self.scale_index(index)]
    }

    pub fn angle_of(&self, index: usize) -> f32 {
        self.angles[self.angle_index(index)]
    }

    /// Scale-major enumeration of all offsets.
    pub fn offsets(&self) -> Vec<(f32, f32)> {
        self.scales
            .iter()
            .cartesian_product(self.angles.iter())
            .map(|(s, a)| (*s, *a))
            .collect()
    }
}

/// Discovered response peak: weighted magnitude plus the circularly
/// unwrapped location.
#[derive(Debug, Clone, Copy)]
pub struct Peak {
    pub response: f32,
    pub x: i64,
    pub y: i64,
}

/// Outcome of evaluating one (scale, angle) candidate.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    /// Scale offset this candidate tested.
    pub scale: f32,
    /// Angle offset in degrees.
    pub angle: f32,
    /// Spatial response map, retained for diagnostics and refinement.
    pub response: RealTensor,
    pub peak: Peak,
}

/// Everything a hypothesis may read during the evaluation phase: a frozen
/// snapshot of the pose and the model. Nothing here is mutable.
pub(crate) struct EvaluationContext<'a> {
    pub fft: &'a dyn SpectralTransform,
    pub correlation: &'a GaussianCorrelation,
    pub extractor: &'a dyn FeatureExtractor,
    pub model: &'a Model,
    pub frame: &'a Frame,
    pub center: (f32, f32),
    pub window: (usize, usize),
    pub fit: (usize, usize),
    pub cell_size: usize,
    pub scale: f32,
    pub angle: f32,
}

/// Samples the rotated, scaled patch at the pose and turns it into feature
/// channels on the fit grid.
pub(crate) fn sample_features(
    frame: &Frame,
    extractor: &dyn FeatureExtractor,
    center: (f32, f32),
    window: (usize, usize),
    fit: (usize, usize),
    cell_size: usize,
    scale: f32,
    angle: f32,
) -> RealTensor {
    let scaled_w = ((window.0 as f32 * scale).floor() as usize).max(1);
    let scaled_h = ((window.1 as f32 * scale).floor() as usize).max(1);

    let gray = frame
        .gray
        .sample_rotated(center.0, center.1, scaled_w, scaled_h, angle)
        .resize(fit.0, fit.1);

    let color: Option<Vec<_>> = match (&frame.color, extractor.uses_color()) {
        (Some(planes), true) => Some(
            planes
                .iter()
                .map(|p| {
                    p.sample_rotated(center.0, center.1, scaled_w, scaled_h, angle)
                        .resize(fit.0, fit.1)
                })
                .collect(),
        ),
        _ => None,
    };

    let features = extractor.extract(&gray, color.as_deref(), cell_size);
    assert_eq!(features.channels(), extractor.channels());
    assert_eq!(features.width(), fit.0 / cell_size);
    assert_eq!(features.height(), fit.1 / cell_size);
    features
}

/// Locates the maximum of a response plane (ties resolved by raster order),
/// unwraps coordinates past the half-dimension into negative offsets and
/// weights the magnitude against scale drift.
fn find_peak(response: &Plane<f32>, scale_offset: f32) -> Peak {
    let mut best = f32::MIN;
    let mut loc = (0i64, 0i64);
    for y in 0..response.height() {
        for x in 0..response.width() {
            let v = response.get(y, x);
            if v > best {
                best = v;
                loc = (x as i64, y as i64);
            }
        }
    }

    // the response wraps around cyclically: coordinates past the midpoint
    // are negative offsets
    let (mut x, mut y) = loc;
    if x > response.width() as i64 / 2 {
        x -= response.width() as i64;
    }
    if y > response.height() as i64 / 2 {
        y -= response.height() as i64;
    }

    let weight = if scale_offset < 1.0 {
        scale_offset
    } else {
        1.0 / scale_offset
    };
    Peak {
        response: best * weight,
        x,
        y,
    }
}

/// Evaluates one candidate against the learned model.
fn evaluate_one(ctx: &EvaluationContext, scale_offset: f32, angle_offset: f32) -> Result<Hypothesis> {
    let features = sample_features(
        ctx.frame,
        ctx.extractor,
        ctx.center,
        ctx.window,
        ctx.fit,
        ctx.cell_size,
        ctx.scale * scale_offset,
        ctx.angle + angle_offset,
    );
    let zf = ctx.fft.forward_window(&features)?;
    let kzf = ctx
        .correlation
        .correlate(ctx.fft, &zf, &ctx.model.model_xf, false)?
        .mul_broadcast(&ctx.model.alphaf);
    let response = ctx.fft.inverse(&kzf)?;
    let peak = find_peak(&response.plane(0, 0), scale_offset);
    Ok(Hypothesis {
        scale: scale_offset,
        angle: angle_offset,
        response,
        peak,
    })
}

/// One task per hypothesis on the supplied pool; a single join, any task
/// error fails the whole frame.
pub(crate) fn evaluate_scatter(
    ctx: &EvaluationContext,
    grid: &ScaleAngleGrid,
    pool: &rayon::ThreadPool,
) -> Result<Vec<Hypothesis>> {
    let offsets = grid.offsets();
    pool.install(|| {
        offsets
            .par_iter()
            .map(|(scale, angle)| evaluate_one(ctx, *scale, *angle))
            .collect()
    })
}

/// All hypotheses packed along the batch axis into one transform and one
/// correlation call.
pub(crate) fn evaluate_batched(
    ctx: &EvaluationContext,
    grid: &ScaleAngleGrid,
) -> Result<Vec<Hypothesis>> {
    let offsets = grid.offsets();
    let patches: Vec<RealTensor> = offsets
        .par_iter()
        .map(|(scale, angle)| {
            sample_features(
                ctx.frame,
                ctx.extractor,
                ctx.center,
                ctx.window,
                ctx.fit,
                ctx.cell_size,
                ctx.scale * scale,
                ctx.angle + angle,
            )
        })
        .collect();

    let (height, width) = (patches[0].height(), patches[0].width());
    let channels = patches[0].channels();
    let mut packed = RealTensor::zeros(offsets.len(), channels, height, width);
    for (b, patch) in patches.iter().enumerate() {
        packed.batch_data_mut(b).copy_from_slice(patch.data());
    }

    let zf = ctx.fft.forward_window(&packed)?;
    let kzf = ctx
        .correlation
        .correlate(ctx.fft, &zf, &ctx.model.model_xf, false)?
        .mul_broadcast(&ctx.model.alphaf);
    let responses = ctx.fft.inverse(&kzf)?;

    Ok(offsets
        .iter()
        .enumerate()
        .map(|(b, (scale, angle))| {
            let plane = responses.plane(b, 0);
            let peak = find_peak(&plane, *scale);
            Hypothesis {
                scale: *scale,
                angle: *angle,
                response: RealTensor::from_data(plane.as_slice().to_vec(), 1, 1, height, width),
                peak,
            }
        })
        .collect())
}

/// Index of the hypothesis with the maximum weighted peak; ties go to the
/// lowest index.
pub(crate) fn best_index(hypotheses: &[Hypothesis]) -> usize {
    assert!(!hypotheses.is_empty());
    let mut best = 0;
    for (i, h) in hypotheses.iter().enumerate() {
        if h.peak.response > hypotheses[best].peak.response {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_scale_major_and_centered() {
        let grid = ScaleAngleGrid::new(5, 1.05, 3, 10.0);
        assert_eq!(grid.len(), 15);
        assert_eq!(grid.scales().len(), 5);
        assert_eq!(grid.angles(), &[-10.0, 0.0, 10.0]);
        assert!((grid.scales()[2] - 1.0).abs() < 1e-6);
        assert!((grid.scales()[0] - 1.05f32.powi(-2)).abs() < 1e-6);

        let idx = grid.index(3, 1);
        assert_eq!(grid.scale_index(idx), 3);
        assert_eq!(grid.angle_index(idx), 1);
        assert!((grid.scale_of(idx) - grid.scales()[3]).abs() < 1e-6);
        assert_eq!(grid.angle_of(idx), 0.0);
    }

    #[test]
    fn single_cell_grid() {
        let grid = ScaleAngleGrid::new(1, 1.05, 1, 10.0);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.scales(), &[1.0]);
        assert_eq!(grid.angles(), &[0.0]);
    }

    #[test]
    fn peak_past_midpoint_unwraps_negative() {
        let cols = 8;
        let mut response = RealTensor::zeros(1, 1, 4, cols);
        response.plane_mut(0, 0).set(1, cols - 2, 3.0);
        let peak = find_peak(&response.plane(0, 0), 1.0);
        assert_eq!(peak.x, -2);
        assert_eq!(peak.y, 1);
        assert!((peak.response - 3.0).abs() < 1e-6);
    }

    #[test]
    fn midpoint_itself_does_not_unwrap() {
        let mut response = RealTensor::zeros(1, 1, 8, 8);
        response.plane_mut(0, 0).set(4, 4, 1.0);
        let peak = find_peak(&response.plane(0, 0), 1.0);
        assert_eq!((peak.x, peak.y), (4, 4));
    }

    #[test]
    fn off_unit_scales_are_penalized() {
        let mut response = RealTensor::zeros(1, 1, 4, 4);
        response.plane_mut(0, 0).set(0, 0, 2.0);
        let small = find_peak(&response.plane(0, 0), 0.8);
        let large = find_peak(&response.plane(0, 0), 1.25);
        assert!((small.response - 1.6).abs() < 1e-6);
        assert!((large.response - 1.6).abs() < 1e-6);
    }

    #[test]
    fn ties_resolve_to_first_in_raster_order() {
        let mut response = RealTensor::zeros(1, 1, 4, 4);
        response.plane_mut(0, 0).set(1, 1, 2.0);
        response.plane_mut(0, 0).set(2, 2, 2.0);
        let peak = find_peak(&response.plane(0, 0), 1.0);
        assert_eq!((peak.x, peak.y), (1, 1));
    }

    #[test]
    fn best_hypothesis_tie_keeps_lowest_index() {
        let response = RealTensor::zeros(1, 1, 2, 2);
        let h = |r: f32| Hypothesis {
            scale: 1.0,
            angle: 0.0,
            response: response.clone(),
            peak: Peak {
                response: r,
                x: 0,
                y: 0,
            },
        };
        let hyps = vec![h(1.0), h(2.0), h(2.0), h(0.5)];
        assert_eq!(best_index(&hyps), 1);
    }
}
