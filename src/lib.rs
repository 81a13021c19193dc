pub mod fft;
pub mod kernel;
pub mod prelude;
pub mod tensor;
pub mod trackers;
pub mod utils;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Errors {
    #[error("Tracker is not initialized. Call init() with a frame and a bounding box first.")]
    NotInitialized,
    #[error("The linear kernel has no defined computation. Configure the Gaussian kernel.")]
    LinearKernelUnsupported,
    #[error("Transform backend is not initialized for the requested problem size.")]
    TransformNotInitialized,
    #[error("Transform backend received a {width}x{height} input with {channels} channel(s) and batch {batch}, expected {expected}.")]
    TransformShape {
        expected: &'static str,
        width: usize,
        height: usize,
        channels: usize,
        batch: usize,
    },
    #[error("No suitable GPU adapter or device is available: {0}.")]
    GpuUnavailable(String),
    #[error("Bounding box centered at ({0}, {1}) does not intersect the frame.")]
    BoxOutsideFrame(f32, f32),
}

pub(crate) const EPS: f32 = 0.00001;
