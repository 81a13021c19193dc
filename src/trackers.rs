/// Kernelized correlation filter tracker with scale and rotation hypotheses
pub mod kcf;
