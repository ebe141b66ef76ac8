//! SonaField spreading engine
//!
//! Renders point sources as angular regions ("spreads") over a measured or
//! synthetic direction grid, using per-band covariance-domain mixing:
//!
//! - Direction-grid search for the region inside a source's spread cone
//! - Per-band prototype/target covariance estimation with temporal smoothing
//! - Eigen- or Cholesky-based optimal-mixing matrix synthesis
//! - Decorrelated residual injection
//! - Sample-accurate cross-faded matrix interpolation across frames
//!
//! Reconfiguration (source count, processing mode, measurement data) runs
//! through a codec lifecycle protocol that never blocks the realtime audio
//! path: `process()` either renders against the current codec generation or
//! emits silence.

mod codec;
mod engine;
mod grid;
mod params;
mod spreader;
mod status;

pub use grid::{DirectionGrid, MeasurementSet, SYNTHETIC_IR_LENGTH};
pub use params::{ProcessingMode, SourceConfig, SpreaderConfig};
pub use spreader::{GridInfo, MeasurementSource, Spreader};
pub use status::CodecStatus;

/// Samples per processing frame
pub const FRAME_SIZE: usize = 512;

/// Analysis time slots per frame
pub const TIME_SLOTS: usize = FRAME_SIZE / sona_dsp::HOP_SIZE;

/// Upper bound on the configured source count
pub const MAX_SOURCES: usize = 8;

/// Frequency above which spreading collapses to the nearest direction
pub const SPREAD_CUTOFF_HZ: f32 = 16_000.0;

/// Directions in the default synthetic grid
pub const DEFAULT_GRID_POINTS: usize = 240;

/// Diagonal loading applied to the prototype covariance before the main
/// covariance-domain solve. Empirically tuned; do not re-derive.
pub(crate) const DIAG_LOAD_MAIN: f32 = 1e-5;

/// Diagonal loading for the residual (diagonalised) solve
pub(crate) const DIAG_LOAD_RESIDUAL: f32 = 1e-6;

/// Forgetting factor handed to the covariance-domain solver
pub(crate) const CDF_FORGETTING: f32 = 0.2;
