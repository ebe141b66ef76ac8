//! SonaField DSP primitives
//!
//! Frequency-domain machinery behind the spreading engine:
//! - Multi-channel analysis/synthesis filterbank (STFT with overlap-add)
//! - Lattice all-pass decorrelator bank
//! - Covariance-domain framework solver (optimal mixing matrices)

pub mod cdf;
pub mod decorrelator;
pub mod filterbank;

pub use decorrelator::LatticeDecorrelator;
pub use filterbank::{Filterbank, HOP_SIZE, NFFT, NUM_BANDS};
