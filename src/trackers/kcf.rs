use crate::fft::cpu::CpuFft;
use crate::fft::{cosine_window, SpectralTransform};
use crate::kernel::GaussianCorrelation;
use crate::trackers::kcf::diagnostics::{DiagnosticsSink, FrameDiagnostics, NoopSink};
use crate::trackers::kcf::hypothesis::{
    best_index, evaluate_batched, evaluate_scatter, sample_features, EvaluationContext,
    ScaleAngleGrid,
};
use crate::trackers::kcf::model::Model;
use crate::trackers::kcf::options::{EvaluationMode, FitSize, KcfOptions, KernelKind};
use crate::trackers::kcf::refine::{sub_grid_axis, sub_pixel_peak};
use crate::utils::bbox::RotatedBBox;
use crate::utils::features::{FeatureExtractor, IntensityFeatures};
use crate::utils::image::Frame;
use crate::{Errors, EPS};
use anyhow::Result;
use log::{debug, info};

/// Read-only observation hooks for visualization and debugging
pub mod diagnostics;

/// Per-(scale, angle) candidate evaluation and its execution strategies
pub mod hypothesis;

/// Learned filter state and the desired-response construction
pub mod model;

/// Tracker configuration
pub mod options;

mod refine;


/// Internal pose and geometry, fixed or updated frame by frame.
#[derive(Debug, Clone)]
struct State {
    init_pose: RotatedBBox,
    center: (f32, f32),
    scale: f32,
    angle: f32,
    window: (usize, usize),
    fit: (usize, usize),
    min_scale: f32,
    max_scale: f32,
    downscale: bool,
    image_size: (usize, usize),
    grid: ScaleAngleGrid,
}

/// Kernelized correlation filter tracker.
///
/// Give it the first frame and a bounding box through
/// [KcfTracker::init], then advance it with [KcfTracker::track] once per
/// frame; [KcfTracker::bbox] reports the current pose and
/// [KcfTracker::filter_response] the confidence of the last frame.
///
/// Every frame dispatches the configured set of scale/angle hypotheses,
/// joins on all of them, picks the strongest weighted peak, refines it
/// below grid resolution and re-trains the filter at the refined pose. No
/// hypothesis can observe another's output, and only the sequential phase
/// after the join mutates the model or the pose.
pub struct KcfTracker<E = IntensityFeatures, D = NoopSink>
where
    E: FeatureExtractor,
    D: DiagnosticsSink,
{
    opts: KcfOptions,
    fft: Box<dyn SpectralTransform>,
    correlation: GaussianCorrelation,
    extractor: E,
    sink: D,
    pool: rayon::ThreadPool,
    state: Option<State>,
    model: Option<Model>,
    max_response: f32,
}

impl KcfTracker {
    /// Tracker with the default CPU backend, intensity features and no
    /// diagnostics.
    pub fn new(opts: KcfOptions) -> Result<Self> {
        Self::with_parts(opts, IntensityFeatures, NoopSink, Box::new(CpuFft::new()))
    }
}

impl<E, D> KcfTracker<E, D>
where
    E: FeatureExtractor,
    D: DiagnosticsSink,
{
    /// Tracker over a custom feature extractor, diagnostics sink and
    /// transform backend. The backend is fixed for the tracker lifetime.
    pub fn with_parts(
        opts: KcfOptions,
        extractor: E,
        sink: D,
        fft: Box<dyn SpectralTransform>,
    ) -> Result<Self> {
        let threads = if opts.threads == 0 {
            num_cpus::get()
        } else {
            opts.threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;
        let correlation = GaussianCorrelation::new(opts.kernel_sigma);
        Ok(Self {
            opts,
            fft,
            correlation,
            extractor,
            sink,
            pool,
            state: None,
            model: None,
            max_response: 0.0,
        })
    }

    pub fn options(&self) -> &KcfOptions {
        &self.opts
    }

    /// Bootstraps pose, model and the hypothesis set from the first frame.
    ///
    /// The bounding box is clamped into the frame and symmetrically
    /// expanded to the minimum trainable size when needed. Oversized
    /// targets switch the tracker into downscaled operation.
    pub fn init(&mut self, frame: &Frame, bbox: &RotatedBBox, fit_size: FitSize) -> Result<()> {
        if self.opts.kernel == KernelKind::Linear {
            return Err(Errors::LinearKernelUnsupported.into());
        }
        let cell = self.opts.cell_size as f32;
        let img_w = frame.width() as f32;
        let img_h = frame.height() as f32;

        let mut x1 = (bbox.cx - bbox.width / 2.0).max(0.0);
        let mut x2 = (bbox.cx + bbox.width / 2.0).min(img_w - 1.0);
        let mut y1 = (bbox.cy - bbox.height / 2.0).max(0.0);
        let mut y2 = (bbox.cy + bbox.height / 2.0).min(img_h - 1.0);

        if x2 - x1 < 2.0 * cell {
            let diff = (2.0 * cell - (x2 - x1)) / 2.0;
            if x1 - diff >= 0.0 && x2 + diff < img_w {
                x1 -= diff;
                x2 += diff;
            } else if x1 - 2.0 * diff >= 0.0 {
                x1 -= 2.0 * diff;
            } else {
                x2 += 2.0 * diff;
            }
        }
        if y2 - y1 < 2.0 * cell {
            let diff = (2.0 * cell - (y2 - y1)) / 2.0;
            if y1 - diff >= 0.0 && y2 + diff < img_h {
                y1 -= diff;
                y2 += diff;
            } else if y1 - 2.0 * diff >= 0.0 {
                y1 -= 2.0 * diff;
            } else {
                y2 += 2.0 * diff;
            }
        }
        if x2 <= x1 || y2 <= y1 {
            return Err(Errors::BoxOutsideFrame(bbox.cx, bbox.cy).into());
        }

        let init_pose = RotatedBBox::new(
            (x1 + x2) / 2.0,
            (y1 + y2) / 2.0,
            x2 - x1,
            y2 - y1,
            0.0,
        );

        // very large targets are tracked on a downscaled frame
        let downscale = init_pose.area() > self.opts.downscale_area_threshold;
        let (init_pose, working) = if downscale {
            info!(
                "init: resizing frames by a factor of {}",
                self.opts.downscale_factor
            );
            (
                init_pose.scale(self.opts.downscale_factor),
                frame.resize(self.opts.downscale_factor),
            )
        } else {
            (init_pose, frame.clone())
        };

        // window padded around the target, fitted to the feature cell grid
        let win_w = ((init_pose.width * (1.0 + self.opts.padding) / cell).round() as usize).max(1)
            * self.opts.cell_size;
        let win_h = ((init_pose.height * (1.0 + self.opts.padding) / cell).round() as usize).max(1)
            * self.opts.cell_size;

        let (fit_w, fit_h) = match fit_size {
            FitSize::AutoPow2 => (round_pw2_down(win_w), round_pw2_down(win_h)),
            FitSize::WindowSize => (win_w, win_h),
            FitSize::Exact { width, height } => (width, height),
        };
        assert!(
            fit_w >= self.opts.cell_size && fit_h >= self.opts.cell_size,
            "fit size {}x{} below the feature cell size",
            fit_w,
            fit_h
        );
        let grid_w = fit_w / self.opts.cell_size;
        let grid_h = fit_h / self.opts.cell_size;

        let grid = ScaleAngleGrid::new(
            self.opts.num_scales,
            self.opts.scale_step,
            self.opts.num_angles,
            self.opts.angle_step,
        );

        // admissible scale range from the frame/target size ratio
        let (work_w, work_h) = (working.width() as f32, working.height() as f32);
        let min_ratio = (5.0 * cell / win_w as f32).max(5.0 * cell / win_h as f32);
        let max_ratio = (((work_w + win_w as f32 / 3.0) / cell).floor() * cell / win_w as f32)
            .min(((work_h + win_h as f32 / 3.0) / cell).floor() * cell / win_h as f32);
        let (min_scale, max_scale) = if self.opts.scale_step > 1.0 + EPS {
            let step = self.opts.scale_step;
            (
                step.powf((min_ratio.ln() / step.ln()).ceil()),
                step.powf((max_ratio.ln() / step.ln()).floor()),
            )
        } else {
            (min_ratio, max_ratio)
        };

        let output_sigma = (init_pose.width * init_pose.height * (fit_w * fit_h) as f32
            / (win_w * win_h) as f32)
            .sqrt()
            * self.opts.output_sigma_factor
            / cell;

        info!(
            "init: frame {}x{}, window {}x{} fitted to {}x{}, feature grid {}x{}",
            working.width(),
            working.height(),
            win_w,
            win_h,
            fit_w,
            fit_h,
            grid_w,
            grid_h
        );
        info!(
            "init: {} hypotheses, scale range [{:.4}, {:.4}]",
            grid.len(),
            min_scale,
            max_scale
        );

        self.fft
            .init(grid_w, grid_h, self.extractor.channels(), grid.len())?;
        self.fft.set_window(cosine_window(grid_w, grid_h));

        self.model = Some(Model::new(
            self.fft.as_ref(),
            grid_w,
            grid_h,
            self.extractor.channels(),
            output_sigma,
        )?);
        self.state = Some(State {
            init_pose,
            center: (init_pose.cx, init_pose.cy),
            scale: 1.0,
            angle: 0.0,
            window: (win_w, win_h),
            fit: (fit_w, fit_h),
            min_scale,
            max_scale,
            downscale,
            image_size: (working.width(), working.height()),
            grid,
        });
        self.max_response = 0.0;

        self.train(&working, 1.0)
    }

    /// Advances tracking by one frame.
    pub fn track(&mut self, frame: &Frame) -> Result<()> {
        let mut state = self.state.clone().ok_or(Errors::NotInitialized)?;

        let working;
        let frame = if state.downscale {
            working = frame.resize(self.opts.downscale_factor);
            &working
        } else {
            frame
        };

        let hypotheses = {
            let model = self.model.as_ref().ok_or(Errors::NotInitialized)?;
            let ctx = EvaluationContext {
                fft: self.fft.as_ref(),
                correlation: &self.correlation,
                extractor: &self.extractor,
                model,
                frame,
                center: state.center,
                window: state.window,
                fit: state.fit,
                cell_size: self.opts.cell_size,
                scale: state.scale,
                angle: state.angle,
            };
            match self.opts.evaluation {
                EvaluationMode::Scatter => evaluate_scatter(&ctx, &state.grid, &self.pool)?,
                EvaluationMode::Batched => evaluate_batched(&ctx, &state.grid)?,
            }
        };

        let best = best_index(&hypotheses);
        let best_peak = hypotheses[best].peak;
        self.max_response = best_peak.response;

        let scale_idx = state.grid.scale_index(best);
        let angle_idx = state.grid.angle_index(best);

        // the angle commits before the displacement is rotated back into
        // frame coordinates
        let angle_change = if self.opts.subgrid_angle {
            let responses: Vec<f32> = (0..state.grid.angles().len())
                .map(|i| hypotheses[state.grid.index(scale_idx, i)].peak.response)
                .collect();
            sub_grid_axis(state.grid.angles(), &responses, angle_idx)
        } else {
            state.grid.angle_of(best)
        };
        state.angle += angle_change;

        let (px, py) = if self.opts.subpixel_localization {
            sub_pixel_peak(
                &hypotheses[best].response.plane(0, 0),
                best_peak.x,
                best_peak.y,
            )
        } else {
            (best_peak.x as f32, best_peak.y as f32)
        };
        debug!(
            "track: peak {:.4} at ({:.2}, {:.2}) from hypothesis {}",
            best_peak.response, px, py, best
        );

        // feature-grid displacement converted to window units, rotated by
        // the pose angle and scaled back to frame pixels
        let wx = px * state.window.0 as f32 / state.fit.0 as f32;
        let wy = py * state.window.1 as f32 / state.fit.1 as f32;
        let (sin, cos) = state.angle.to_radians().sin_cos();
        let dx = wx * cos - wy * sin;
        let dy = wx * sin + wy * cos;
        let cell = self.opts.cell_size as f32;
        state.center.0 = (state.center.0 + state.scale * cell * dx)
            .max(0.0)
            .min(state.image_size.0 as f32 - 1.0);
        state.center.1 = (state.center.1 + state.scale * cell * dy)
            .max(0.0)
            .min(state.image_size.1 as f32 - 1.0);

        let scale_change = if self.opts.subgrid_scale {
            let responses: Vec<f32> = (0..state.grid.scales().len())
                .map(|i| hypotheses[state.grid.index(i, angle_idx)].peak.response)
                .collect();
            sub_grid_axis(state.grid.scales(), &responses, scale_idx)
        } else {
            state.grid.scale_of(best)
        };
        state.scale = (state.scale * scale_change)
            .max(state.min_scale)
            .min(state.max_scale);

        self.sink.frame_evaluated(&FrameDiagnostics {
            hypotheses: &hypotheses,
            best_index: best,
            peak: (px, py),
            center: state.center,
            scale: state.scale,
            angle: state.angle,
        });

        self.state = Some(state);

        // re-train the filter at the refined pose
        self.train(frame, self.opts.interp_factor)
    }

    /// Current target pose in the coordinates of the original frames.
    pub fn bbox(&self) -> Result<RotatedBBox> {
        let state = self.state.as_ref().ok_or(Errors::NotInitialized)?;
        let bbox = RotatedBBox::new(
            state.center.0,
            state.center.1,
            state.init_pose.width * state.scale,
            state.init_pose.height * state.scale,
            state.angle,
        );
        Ok(if state.downscale {
            bbox.scale(1.0 / self.opts.downscale_factor)
        } else {
            bbox
        })
    }

    /// Weighted peak magnitude of the last tracked frame, usable as a
    /// confidence signal.
    pub fn filter_response(&self) -> f32 {
        self.max_response
    }

    /// Overrides the current center from an external source, e.g. a
    /// re-detection.
    pub fn update_position(&mut self, bbox: &RotatedBBox) -> Result<()> {
        let factor = self.opts.downscale_factor;
        let state = self.state.as_mut().ok_or(Errors::NotInitialized)?;
        let bbox = if state.downscale {
            bbox.scale(factor)
        } else {
            *bbox
        };
        state.center = (bbox.cx, bbox.cy);
        Ok(())
    }

    /// Re-extracts the patch at the current pose and folds it into the
    /// learned model with the given forgetting factor.
    fn train(&mut self, frame: &Frame, interp_factor: f32) -> Result<()> {
        let state = self.state.as_ref().ok_or(Errors::NotInitialized)?;
        let features = sample_features(
            frame,
            &self.extractor,
            state.center,
            state.window,
            state.fit,
            self.opts.cell_size,
            state.scale,
            state.angle,
        );
        let xf = self.fft.forward_window(&features)?;

        let model = self.model.as_mut().ok_or(Errors::NotInitialized)?;
        model.model_xf = model.model_xf.lerp(&xf, interp_factor);
        model.xf = xf;

        // kernel ridge regression, alphas in the Fourier domain
        let kf = self.correlation.correlate(
            self.fft.as_ref(),
            &model.model_xf,
            &model.model_xf,
            true,
        )?;
        model.alphaf_num = model.yf.mul(&kf);
        model.alphaf_den = kf.mul(&kf.add_scalar(self.opts.lambda));
        model.alphaf = model.alphaf_num.div(&model.alphaf_den);
        Ok(())
    }
}

/// Nearest power of two not above `x`.
fn round_pw2_down(x: usize) -> usize {
    let mut x = x;
    let mut i = 1;
    while i < usize::BITS as usize {
        x |= x >> i;
        i <<= 1;
    }
    (x + 1) >> 1
}

#[cfg(test)]
mod pw2_tests {
    use super::round_pw2_down;

    #[test]
    fn rounds_down_to_powers_of_two() {
        assert_eq!(round_pw2_down(1), 1);
        assert_eq!(round_pw2_down(2), 2);
        assert_eq!(round_pw2_down(3), 2);
        assert_eq!(round_pw2_down(48), 32);
        assert_eq!(round_pw2_down(64), 64);
        assert_eq!(round_pw2_down(100), 64);
    }
}
