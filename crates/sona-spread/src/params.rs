//! Live parameters shared between the control and audio actors
//!
//! Source directions, spread widths and the averaging coefficient are plain
//! atomics: the control actor writes them at any time, the audio actor reads
//! them once per frame. Torn reads are tolerated; every value is re-clamped
//! at the point of use and re-read next frame.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use portable_atomic::AtomicF32;
use serde::{Deserialize, Serialize};

use crate::MAX_SOURCES;

/// Processing mode of the spreading engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// The averaged grid response is the rendered signal; no covariance
    /// matching or decorrelation
    Naive,
    /// Covariance-domain optimal mixing with a decorrelated residual path
    #[default]
    OptimalMixing,
    /// Eigendecomposition factor applied to the decorrelated prototype
    Evd,
}

impl ProcessingMode {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Naive,
            2 => Self::Evd,
            _ => Self::OptimalMixing,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Naive => 0,
            Self::OptimalMixing => 1,
            Self::Evd => 2,
        }
    }
}

/// One source's live direction and spread
pub(crate) struct SourceParams {
    azimuth: AtomicF32,
    elevation: AtomicF32,
    spread: AtomicF32,
}

impl SourceParams {
    fn new(azimuth: f32, elevation: f32, spread: f32) -> Self {
        Self {
            azimuth: AtomicF32::new(azimuth),
            elevation: AtomicF32::new(elevation),
            spread: AtomicF32::new(spread),
        }
    }

    pub fn azimuth(&self) -> f32 {
        self.azimuth.load(Ordering::Relaxed)
    }

    pub fn elevation(&self) -> f32 {
        self.elevation.load(Ordering::Relaxed)
    }

    pub fn spread(&self) -> f32 {
        self.spread.load(Ordering::Relaxed)
    }

    pub fn set_azimuth(&self, azimuth: f32) {
        self.azimuth.store(azimuth, Ordering::Relaxed);
    }

    pub fn set_elevation(&self, elevation: f32) {
        self.elevation.store(elevation, Ordering::Relaxed);
    }

    pub fn set_spread(&self, spread: f32) {
        self.spread.store(spread, Ordering::Relaxed);
    }
}

/// All host-controlled parameters
pub(crate) struct Params {
    pub num_sources: AtomicUsize,
    pub mode: AtomicU8,
    pub averaging_coeff: AtomicF32,
    pub sources: Vec<SourceParams>,
}

impl Params {
    pub fn new() -> Self {
        Self {
            num_sources: AtomicUsize::new(1),
            mode: AtomicU8::new(ProcessingMode::default().as_u8()),
            averaging_coeff: AtomicF32::new(0.5),
            sources: (0..MAX_SOURCES)
                .map(|_| SourceParams::new(0.0, 0.0, 90.0))
                .collect(),
        }
    }
}

/// One source's direction and spread, as echoed back to the host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub azimuth: f32,
    pub elevation: f32,
    pub spread: f32,
}

/// Snapshot of the current configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreaderConfig {
    /// Active processing mode
    pub mode: ProcessingMode,
    /// Covariance averaging coefficient, expected in [0, 1]
    pub averaging_coeff: f32,
    /// Configured source count
    pub num_sources: usize,
    /// Output channel count of the current codec generation
    pub num_outputs: usize,
    /// Per-source direction and spread
    pub sources: Vec<SourceConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip() {
        for mode in [
            ProcessingMode::Naive,
            ProcessingMode::OptimalMixing,
            ProcessingMode::Evd,
        ] {
            assert_eq!(ProcessingMode::from_u8(mode.as_u8()), mode);
        }
    }

    #[test]
    fn test_defaults() {
        let params = Params::new();
        assert_eq!(params.num_sources.load(Ordering::Relaxed), 1);
        assert_eq!(
            ProcessingMode::from_u8(params.mode.load(Ordering::Relaxed)),
            ProcessingMode::OptimalMixing
        );
        assert_eq!(params.sources.len(), MAX_SOURCES);
    }
}
