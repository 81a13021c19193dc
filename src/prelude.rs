pub use crate::fft::cpu::CpuFft;
#[cfg(feature = "gpu")]
pub use crate::fft::gpu::GpuDft;
pub use crate::fft::SpectralTransform;
pub use crate::kernel::GaussianCorrelation;
pub use crate::tensor::{RealTensor, SpectrumTensor};
pub use crate::trackers::kcf::diagnostics::{DiagnosticsSink, FrameDiagnostics, NoopSink};
pub use crate::trackers::kcf::options::{EvaluationMode, FitSize, KcfOptions, KernelKind};
pub use crate::trackers::kcf::KcfTracker;
pub use crate::utils::bbox::RotatedBBox;
pub use crate::utils::features::{FeatureExtractor, IntensityFeatures};
pub use crate::utils::image::{Frame, ImagePlane};
