//! Lattice all-pass decorrelator bank
//!
//! Produces a copy of a time-frequency frame with matched magnitude
//! spectrum but reduced cross-channel coherence. Each (band, channel) lane
//! runs a fixed per-lane phase rotation followed by a cascade of first-order
//! all-pass sections along the time-slot axis, with reflection coefficients
//! drawn from a deterministic pseudo-random sequence so no two lanes share
//! a phase response.

use ndarray::Array3;
use num_complex::Complex32;

/// All-pass sections per lane
const SECTIONS: usize = 2;

/// Reflection coefficient range
const COEFF_MIN: f32 = 0.3;
const COEFF_SPAN: f32 = 0.45;

/// Per-source lattice all-pass decorrelator.
///
/// State persists across frames; [`reset`](Self::reset) clears it. No
/// allocation happens after construction.
pub struct LatticeDecorrelator {
    channels: usize,
    bands: usize,
    /// Per (band, channel, section) all-pass state
    state: Vec<Complex32>,
    /// Per (band, channel, section) reflection coefficients
    coeffs: Vec<f32>,
    /// Per (band, channel) unit phase rotation
    phase: Vec<Complex32>,
}

impl LatticeDecorrelator {
    /// Create a decorrelator for `channels` lanes over `bands` bands
    pub fn new(channels: usize, bands: usize) -> Self {
        let lanes = channels * bands;
        let mut coeffs = vec![0.0f32; lanes * SECTIONS];
        let mut phase = vec![Complex32::new(1.0, 0.0); lanes];

        for band in 0..bands {
            for ch in 0..channels {
                let lane = band * channels + ch;
                for s in 0..SECTIONS {
                    let r = lane_random(lane * SECTIONS + s);
                    let sign = if (lane + s) % 2 == 0 { 1.0 } else { -1.0 };
                    coeffs[lane * SECTIONS + s] = sign * (COEFF_MIN + COEFF_SPAN * r);
                }
                let theta = 2.0 * std::f32::consts::PI * lane_random(lanes * SECTIONS + lane);
                phase[lane] = Complex32::new(theta.cos(), theta.sin());
            }
        }

        Self {
            channels,
            bands,
            state: vec![Complex32::new(0.0, 0.0); lanes * SECTIONS],
            coeffs,
            phase,
        }
    }

    /// Decorrelate one frame shaped `(bands, channels, slots)`
    pub fn process(&mut self, input: &Array3<Complex32>, output: &mut Array3<Complex32>) {
        let slots = input.dim().2;
        for band in 0..self.bands {
            for ch in 0..self.channels {
                let lane = band * self.channels + ch;
                let rot = self.phase[lane];
                for slot in 0..slots {
                    let mut x = input[[band, ch, slot]] * rot;
                    for s in 0..SECTIONS {
                        let idx = lane * SECTIONS + s;
                        let a = self.coeffs[idx];
                        // First-order all-pass, transposed direct form
                        let y = x * a + self.state[idx];
                        self.state[idx] = x - y * a;
                        x = y;
                    }
                    output[[band, ch, slot]] = x;
                }
            }
        }
    }

    /// Clear all filter state
    pub fn reset(&mut self) {
        self.state.fill(Complex32::new(0.0, 0.0));
    }
}

/// Deterministic lane-indexed value in [0, 1)
fn lane_random(index: usize) -> f32 {
    // Weyl sequence on the golden ratio; uncorrelated enough between lanes
    let v = (index as f64 + 1.0) * 0.618_033_988_749_895;
    (v - v.floor()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_frame(bands: usize, channels: usize, slots: usize, seed: usize) -> Array3<Complex32> {
        let mut frame = Array3::zeros((bands, channels, slots));
        for ((b, c, t), v) in frame.indexed_iter_mut() {
            let re = lane_random(seed + b * 31 + c * 7 + t * 113) - 0.5;
            let im = lane_random(seed + 1 + b * 17 + c * 3 + t * 59) - 0.5;
            *v = Complex32::new(re, im);
        }
        frame
    }

    #[test]
    fn test_energy_preserved_long_run() {
        let (bands, channels, slots) = (16, 2, 4);
        let mut decor = LatticeDecorrelator::new(channels, bands);
        let mut out = Array3::zeros((bands, channels, slots));

        let mut in_energy = 0.0f32;
        let mut out_energy = 0.0f32;
        for frame_idx in 0..200 {
            let frame = noise_frame(bands, channels, slots, frame_idx * 1000);
            decor.process(&frame, &mut out);
            in_energy += frame.iter().map(|c| c.norm_sqr()).sum::<f32>();
            out_energy += out.iter().map(|c| c.norm_sqr()).sum::<f32>();
        }

        // All-pass: asymptotically energy preserving
        let ratio = out_energy / in_energy;
        assert!(ratio > 0.9 && ratio < 1.1, "energy ratio {ratio}");
    }

    #[test]
    fn test_output_differs_from_input() {
        let (bands, channels, slots) = (16, 2, 4);
        let mut decor = LatticeDecorrelator::new(channels, bands);
        let frame = noise_frame(bands, channels, slots, 7);
        let mut out = Array3::zeros((bands, channels, slots));
        decor.process(&frame, &mut out);

        let diff: f32 = frame
            .iter()
            .zip(out.iter())
            .map(|(a, b)| (a - b).norm_sqr())
            .sum();
        assert!(diff > 1e-3);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let (bands, channels, slots) = (8, 2, 4);
        let mut decor = LatticeDecorrelator::new(channels, bands);
        let frame = noise_frame(bands, channels, slots, 3);

        let mut first = Array3::zeros((bands, channels, slots));
        decor.process(&frame, &mut first);
        decor.reset();
        let mut second = Array3::zeros((bands, channels, slots));
        decor.process(&frame, &mut second);

        for (a, b) in first.iter().zip(second.iter()) {
            assert!((a - b).norm() < 1e-6);
        }
    }
}
