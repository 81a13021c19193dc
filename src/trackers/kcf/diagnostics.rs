use crate::trackers::kcf::hypothesis::Hypothesis;

/// Read-only per-frame data offered to an observer after the reduce and
/// refine phase, before training. Consumers render or record it; the
/// tracking path itself never draws.
#[derive(Debug)]
pub struct FrameDiagnostics<'a> {
    /// Every evaluated hypothesis, with retained response maps and peaks.
    pub hypotheses: &'a [Hypothesis],
    /// Index of the winning hypothesis.
    pub best_index: usize,
    /// Refined peak location in feature-grid units.
    pub peak: (f32, f32),
    /// Updated pose.
    pub center: (f32, f32),
    pub scale: f32,
    pub angle: f32,
}

/// Injectable observability hook. The default sink does nothing and costs
/// nothing.
pub trait DiagnosticsSink: Default + Send + Sync {
    fn frame_evaluated(&mut self, diagnostics: &FrameDiagnostics);
}

#[derive(Default, Clone, Debug)]
pub struct NoopSink;

impl DiagnosticsSink for NoopSink {
    fn frame_evaluated(&mut self, _diagnostics: &FrameDiagnostics) {}
}
