/// Correlation kernel selection. Only the Gaussian kernel has a defined
/// computation; configuring [KernelKind::Linear] is rejected at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    Gaussian,
    Linear,
}

/// How the per-frame hypothesis set is executed. Both modes produce the
/// same weighted-peak results within floating-point tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// One task per (scale, angle) hypothesis on the tracker thread pool.
    /// Preferred for moderate hypothesis counts on CPU backends.
    Scatter,
    /// All hypotheses packed along the batch axis into single transform and
    /// correlation calls. Preferred for GPU backends where batching
    /// amortizes launch overhead.
    Batched,
}

/// Transform geometry the tracking window is fitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitSize {
    /// Round the window down to the nearest powers of two.
    AutoPow2,
    /// Use the padded window size directly, without resizing.
    WindowSize,
    /// Explicit size in pixels.
    Exact { width: usize, height: usize },
}

/// Tracker configuration. The defaults reproduce the tuning of the filter
/// this implementation derives from: 15 scale/angle hypotheses per frame,
/// Gaussian kernel, sub-pixel and sub-grid-scale refinement on.
#[derive(Debug, Clone)]
pub struct KcfOptions {
    /// Context ratio around the target the filter trains on.
    pub padding: f32,
    /// Bandwidth of the Gaussian correlation kernel.
    pub kernel_sigma: f32,
    /// Ridge regression regularization.
    pub lambda: f32,
    /// Learning rate of the exponential model update.
    pub interp_factor: f32,
    /// Width of the desired response relative to the target size.
    pub output_sigma_factor: f32,
    /// Feature cell size in pixels.
    pub cell_size: usize,
    pub num_scales: usize,
    pub scale_step: f32,
    pub num_angles: usize,
    /// Angle grid step in degrees.
    pub angle_step: f32,
    pub subpixel_localization: bool,
    pub subgrid_scale: bool,
    pub subgrid_angle: bool,
    pub kernel: KernelKind,
    pub evaluation: EvaluationMode,
    /// Target area above which frames are downscaled before tracking.
    pub downscale_area_threshold: f32,
    pub downscale_factor: f32,
    /// Evaluation pool size; 0 selects one thread per logical CPU.
    pub threads: usize,
}

impl Default for KcfOptions {
    fn default() -> Self {
        Self {
            padding: 1.5,
            kernel_sigma: 0.5,
            lambda: 1e-4,
            interp_factor: 0.02,
            output_sigma_factor: 0.1,
            cell_size: 4,
            num_scales: 5,
            scale_step: 1.05,
            num_angles: 3,
            angle_step: 10.0,
            subpixel_localization: true,
            subgrid_scale: true,
            subgrid_angle: false,
            kernel: KernelKind::Gaussian,
            evaluation: EvaluationMode::Scatter,
            downscale_area_threshold: 100.0 * 100.0,
            downscale_factor: 0.5,
            threads: 0,
        }
    }
}
