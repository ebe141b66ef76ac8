//! Per-generation precomputed state
//!
//! Everything `init_codec` derives from the direction grid: per-band complex
//! responses, the weighted outer-product cache used to assemble target
//! covariances, and the band centre frequencies. All of it is read-only
//! during processing and replaced wholesale on re-initialisation.

use ndarray::Array3;
use num_complex::Complex32;
use realfft::RealFftPlanner;

use sona_dsp::cdf::CMat;
use sona_dsp::{Filterbank, NFFT, NUM_BANDS};

use crate::grid::DirectionGrid;
use crate::status::Lifecycle;

/// Precomputed, immutable codec data of one generation
pub(crate) struct Codec {
    pub grid: DirectionGrid,
    /// Output channel count (`Q`)
    pub num_outputs: usize,
    /// Band centre frequencies in Hz
    pub centre_freqs: [f32; NUM_BANDS],
    /// Complex response per (band, output channel, grid direction)
    pub h_grid: Array3<Complex32>,
    /// Weighted outer product `H·Hᴴ·w` per band and direction
    pub hhh: Vec<Vec<CMat>>,
}

impl Codec {
    pub fn build(grid: DirectionGrid, sample_rate: f32, lifecycle: &Lifecycle) -> Self {
        let q = grid.channels();
        let n_dirs = grid.len();

        lifecycle.set_progress(0.2, "Computing grid frequency responses");
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(NFFT);
        let mut h_grid = Array3::zeros((NUM_BANDS, q, n_dirs));
        let mut padded = vec![0.0f32; NFFT];
        let mut spectrum = vec![Complex32::new(0.0, 0.0); NUM_BANDS];

        for d in 0..n_dirs {
            for ch in 0..q {
                padded.fill(0.0);
                let ir = grid.ir(d, ch);
                let len = ir.len().min(NFFT);
                padded[..len].copy_from_slice(&ir[..len]);
                if fft.process(&mut padded, &mut spectrum).is_ok() {
                    for band in 0..NUM_BANDS {
                        h_grid[[band, ch, d]] = spectrum[band];
                    }
                }
            }
        }

        lifecycle.set_progress(0.5, "Caching direction outer products");
        let mut hhh = Vec::with_capacity(NUM_BANDS);
        for band in 0..NUM_BANDS {
            let mut per_dir = Vec::with_capacity(n_dirs);
            for d in 0..n_dirs {
                let w = grid.weight(d);
                let mut outer = CMat::zeros(q, q);
                for i in 0..q {
                    for j in 0..q {
                        outer[(i, j)] = h_grid[[band, i, d]] * h_grid[[band, j, d]].conj() * w;
                    }
                }
                per_dir.push(outer);
            }
            hhh.push(per_dir);
        }

        Self {
            grid,
            num_outputs: q,
            centre_freqs: Filterbank::centre_frequencies(sample_rate),
            h_grid,
            hhh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::MeasurementSet;
    use approx::assert_abs_diff_eq;
    use sona_core::Direction;

    fn unit_impulse_grid() -> DirectionGrid {
        // Two directions, one channel, single-tap unit impulses
        let set = MeasurementSet {
            sample_rate: 48_000.0,
            ir_length: 1,
            channels: 1,
            directions: vec![Direction::new(0.0, 0.0), Direction::new(90.0, 0.0)],
            ir_data: vec![1.0, 1.0],
        };
        DirectionGrid::from_measurements(set).unwrap()
    }

    #[test]
    fn test_unit_impulse_has_flat_response() {
        let grid = unit_impulse_grid();
        let lc = Lifecycle::new();
        let codec = Codec::build(grid, 48_000.0, &lc);

        for band in 0..NUM_BANDS {
            for d in 0..2 {
                let h = codec.h_grid[[band, 0, d]];
                assert_abs_diff_eq!(h.re, 1.0, epsilon = 1e-5);
                assert_abs_diff_eq!(h.im, 0.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_outer_products_match_responses() {
        let grid = DirectionGrid::default_synthetic(48_000.0);
        let lc = Lifecycle::new();
        let codec = Codec::build(grid, 48_000.0, &lc);

        let (band, d) = (10, 3);
        let w = codec.grid.weight(d);
        for i in 0..codec.num_outputs {
            for j in 0..codec.num_outputs {
                let expect = codec.h_grid[[band, i, d]] * codec.h_grid[[band, j, d]].conj() * w;
                let got = codec.hhh[band][d][(i, j)];
                assert_abs_diff_eq!(got.re, expect.re, epsilon = 1e-6);
                assert_abs_diff_eq!(got.im, expect.im, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_centre_frequencies_span_nyquist() {
        let grid = unit_impulse_grid();
        let lc = Lifecycle::new();
        let codec = Codec::build(grid, 48_000.0, &lc);
        assert_abs_diff_eq!(codec.centre_freqs[0], 0.0);
        assert_abs_diff_eq!(codec.centre_freqs[NUM_BANDS - 1], 24_000.0);
    }
}
