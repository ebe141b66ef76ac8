//! Multi-channel analysis/synthesis filterbank
//!
//! STFT with a `sqrt(hann)` window at 50% overlap, which reconstructs
//! perfectly when the same window is applied on analysis and synthesis.
//! All buffers are allocated at construction; the per-block methods only
//! reuse scratch storage.

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::Array3;
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

/// FFT size
pub const NFFT: usize = 256;

/// Hop size in samples (50% overlap)
pub const HOP_SIZE: usize = 128;

/// Number of frequency bands per analysis slot
pub const NUM_BANDS: usize = NFFT / 2 + 1;

/// Multi-channel STFT analysis/synthesis bank.
///
/// Analysis consumes channel-major time-domain blocks whose length is a
/// multiple of [`HOP_SIZE`] and produces one time slot of [`NUM_BANDS`]
/// complex bins per hop. Synthesis is the exact inverse with overlap-add.
pub struct Filterbank {
    channels: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    ifft: Arc<dyn ComplexToReal<f32>>,
    /// Shared analysis/synthesis window: sqrt(hann), periodic
    window: Vec<f32>,
    /// Per-channel sliding input history, NFFT samples
    history: Vec<Vec<f32>>,
    /// Per-channel overlap-add accumulator, NFFT samples
    overlap: Vec<Vec<f32>>,
    fft_scratch: Vec<f32>,
    spectrum_scratch: Vec<Complex32>,
    ifft_scratch: Vec<f32>,
}

impl Filterbank {
    /// Create a bank for `channels` parallel signals
    pub fn new(channels: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(NFFT);
        let ifft = planner.plan_fft_inverse(NFFT);

        let window: Vec<f32> = (0..NFFT)
            .map(|i| {
                let hann = 0.5 * (1.0 - (2.0 * PI * i as f32 / NFFT as f32).cos());
                hann.sqrt()
            })
            .collect();

        Self {
            channels,
            fft,
            ifft,
            window,
            history: vec![vec![0.0; NFFT]; channels],
            overlap: vec![vec![0.0; NFFT]; channels],
            fft_scratch: vec![0.0; NFFT],
            spectrum_scratch: vec![Complex32::new(0.0, 0.0); NUM_BANDS],
            ifft_scratch: vec![0.0; NFFT],
        }
    }

    /// Number of channels this bank was built for
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Algorithmic delay of one analysis/synthesis round trip, in samples
    pub fn delay() -> usize {
        NFFT - HOP_SIZE
    }

    /// Centre frequency of every band, in Hz
    pub fn centre_frequencies(sample_rate: f32) -> [f32; NUM_BANDS] {
        let mut freqs = [0.0f32; NUM_BANDS];
        for (k, f) in freqs.iter_mut().enumerate() {
            *f = k as f32 * sample_rate / NFFT as f32;
        }
        freqs
    }

    /// Forward transform of one block.
    ///
    /// `inputs[ch]` must all have the same length, a multiple of
    /// [`HOP_SIZE`]; `output` must be shaped `(NUM_BANDS, channels, slots)`
    /// where `slots = len / HOP_SIZE`.
    pub fn analyze(&mut self, inputs: &[Vec<f32>], output: &mut Array3<Complex32>) {
        let slots = output.dim().2;
        for slot in 0..slots {
            let offset = slot * HOP_SIZE;
            for ch in 0..self.channels {
                // Slide the history window forward by one hop
                self.history[ch].copy_within(HOP_SIZE.., 0);
                self.history[ch][NFFT - HOP_SIZE..]
                    .copy_from_slice(&inputs[ch][offset..offset + HOP_SIZE]);

                for i in 0..NFFT {
                    self.fft_scratch[i] = self.history[ch][i] * self.window[i];
                }
                if self
                    .fft
                    .process(&mut self.fft_scratch, &mut self.spectrum_scratch)
                    .is_err()
                {
                    self.spectrum_scratch.fill(Complex32::new(0.0, 0.0));
                }
                for band in 0..NUM_BANDS {
                    output[[band, ch, slot]] = self.spectrum_scratch[band];
                }
            }
        }
    }

    /// Inverse transform of one frame.
    ///
    /// `input` is shaped `(NUM_BANDS, channels, slots)`; `outputs[ch]` must
    /// hold `slots * HOP_SIZE` samples each.
    pub fn synthesize(&mut self, input: &Array3<Complex32>, outputs: &mut [Vec<f32>]) {
        let slots = input.dim().2;
        for slot in 0..slots {
            let offset = slot * HOP_SIZE;
            for ch in 0..self.channels {
                for band in 0..NUM_BANDS {
                    self.spectrum_scratch[band] = input[[band, ch, slot]];
                }
                // DC and Nyquist bins must be real for the inverse transform
                self.spectrum_scratch[0].im = 0.0;
                self.spectrum_scratch[NUM_BANDS - 1].im = 0.0;

                if self
                    .ifft
                    .process(&mut self.spectrum_scratch, &mut self.ifft_scratch)
                    .is_err()
                {
                    self.ifft_scratch.fill(0.0);
                }

                let scale = 1.0 / NFFT as f32;
                for i in 0..NFFT {
                    self.overlap[ch][i] += self.ifft_scratch[i] * scale * self.window[i];
                }

                outputs[ch][offset..offset + HOP_SIZE]
                    .copy_from_slice(&self.overlap[ch][..HOP_SIZE]);
                self.overlap[ch].copy_within(HOP_SIZE.., 0);
                self.overlap[ch][NFFT - HOP_SIZE..].fill(0.0);
            }
        }
    }

    /// Clear all history and overlap state
    pub fn reset(&mut self) {
        for ch in 0..self.channels {
            self.history[ch].fill(0.0);
            self.overlap[ch].fill(0.0);
        }
    }
}
