//! Spreading engine
//!
//! Per frame, per source: find the grid directions inside the spread cone,
//! build the prototype signal, match its covariance to the target assembled
//! from the outer-product cache, and apply the resulting mixing matrices
//! with a per-slot cross-fade against the previous frame's matrices.

use ndarray::Array3;
use num_complex::Complex32;

use sona_core::Direction;
use sona_dsp::cdf::{self, CMat};
use sona_dsp::{Filterbank, LatticeDecorrelator, NUM_BANDS};

use crate::codec::Codec;
use crate::grid::DirectionGrid;
use crate::params::{Params, ProcessingMode};
use crate::status::Lifecycle;
use crate::{
    CDF_FORGETTING, DIAG_LOAD_MAIN, DIAG_LOAD_RESIDUAL, FRAME_SIZE, SPREAD_CUTOFF_HZ, TIME_SLOTS,
};

/// Cross-fade weights for one time slot: (new, old).
///
/// The first slot weights the new matrix least (`1/T`), the last weights it
/// fully, so consecutive frames never jump between mixing matrices.
#[inline]
pub(crate) fn crossfade_weights(slot: usize, slots: usize) -> (f32, f32) {
    let w_new = (slot + 1) as f32 / slots as f32;
    (w_new, 1.0 - w_new)
}

/// Per-source state that persists across frames
pub(crate) struct SourceState {
    /// Smoothed prototype covariance per band
    pub cproto: Vec<CMat>,
    /// Smoothed target covariance per band
    pub cy: Vec<CMat>,
    /// Previous frame's mixing matrix per band
    pub prev_m: Vec<CMat>,
    /// Previous frame's residual mixing matrix per band
    pub prev_mr: Vec<CMat>,
    /// Grid directions used by the last frame (visualisation only)
    pub active: Vec<bool>,
}

impl SourceState {
    fn new(q: usize, n_dirs: usize) -> Self {
        Self {
            cproto: vec![CMat::zeros(q, q); NUM_BANDS],
            cy: vec![CMat::zeros(q, q); NUM_BANDS],
            prev_m: vec![CMat::zeros(q, q); NUM_BANDS],
            prev_mr: vec![CMat::zeros(q, q); NUM_BANDS],
            active: vec![false; n_dirs],
        }
    }
}

/// Heavy render state of one codec generation.
///
/// Owned behind the spreader's render mutex: the audio actor borrows it for
/// the duration of one frame, `init_codec` replaces it wholesale.
pub(crate) struct RenderState {
    pub codec: Codec,
    pub mode: ProcessingMode,
    pub num_sources: usize,
    analysis: Filterbank,
    synthesis: Filterbank,
    decorrelators: Vec<LatticeDecorrelator>,
    pub sources: Vec<SourceState>,

    // Frame-local working set, reused every call
    in_time: Vec<Vec<f32>>,
    out_time: Vec<Vec<f32>>,
    in_tf: Array3<Complex32>,
    proto_tf: Array3<Complex32>,
    decor_tf: Array3<Complex32>,
    out_tf: Array3<Complex32>,
    ang_dist: Vec<f32>,
    inside: Vec<usize>,
    cov_new: CMat,
    new_m: Vec<CMat>,
    new_mr: Vec<CMat>,
    identity: CMat,
}

impl RenderState {
    pub fn build(
        grid: DirectionGrid,
        sample_rate: f32,
        num_sources: usize,
        mode: ProcessingMode,
        lifecycle: &Lifecycle,
    ) -> Self {
        let codec = Codec::build(grid, sample_rate, lifecycle);
        let q = codec.num_outputs;
        let n_dirs = codec.grid.len();

        lifecycle.set_progress(0.8, "Allocating source state");
        Self {
            analysis: Filterbank::new(num_sources),
            synthesis: Filterbank::new(q),
            decorrelators: (0..num_sources)
                .map(|_| LatticeDecorrelator::new(q, NUM_BANDS))
                .collect(),
            sources: (0..num_sources).map(|_| SourceState::new(q, n_dirs)).collect(),
            in_time: vec![vec![0.0; FRAME_SIZE]; num_sources],
            out_time: vec![vec![0.0; FRAME_SIZE]; q],
            in_tf: Array3::zeros((NUM_BANDS, num_sources, TIME_SLOTS)),
            proto_tf: Array3::zeros((NUM_BANDS, q, TIME_SLOTS)),
            decor_tf: Array3::zeros((NUM_BANDS, q, TIME_SLOTS)),
            out_tf: Array3::zeros((NUM_BANDS, q, TIME_SLOTS)),
            ang_dist: vec![0.0; n_dirs],
            inside: Vec::with_capacity(n_dirs),
            cov_new: CMat::zeros(q, q),
            new_m: vec![CMat::zeros(q, q); NUM_BANDS],
            new_mr: vec![CMat::zeros(q, q); NUM_BANDS],
            identity: CMat::identity(q, q),
            codec,
            mode,
            num_sources,
        }
    }

    /// Render one frame. All input/output slices hold [`FRAME_SIZE`]
    /// samples; the caller has already verified lengths and codec status.
    pub fn render_frame(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        params: &Params,
    ) {
        let q = self.codec.num_outputs;
        let n_dirs = self.codec.grid.len();
        let zero = Complex32::new(0.0, 0.0);

        // Stage the inputs; missing channels render as silence
        for s in 0..self.num_sources {
            if s < inputs.len() {
                self.in_time[s].copy_from_slice(inputs[s]);
            } else {
                self.in_time[s].fill(0.0);
            }
        }
        self.analysis.analyze(&self.in_time, &mut self.in_tf);
        self.out_tf.fill(zero);

        let alpha = params
            .averaging_coeff
            .load(std::sync::atomic::Ordering::Relaxed)
            .clamp(0.0, 1.0);

        for src in 0..self.num_sources {
            let dir = Direction::new(
                params.sources[src].azimuth(),
                params.sources[src].elevation(),
            );
            let spread = params.sources[src].spread().clamp(0.0, 360.0);
            let uv = dir.to_unit_vector();

            // Angular distance to every grid direction; the nearest is the
            // centre and the fallback when the cone is empty
            let mut centre = 0usize;
            let mut best = f32::MAX;
            for d in 0..n_dirs {
                let a = uv.angle_between(self.codec.grid.unit_vector(d));
                self.ang_dist[d] = a;
                if a < best {
                    best = a;
                    centre = d;
                }
            }
            let half_spread = spread * 0.5;
            self.inside.clear();
            for d in 0..n_dirs {
                if self.ang_dist[d] <= half_spread {
                    self.inside.push(d);
                }
            }
            let cone_empty = self.inside.is_empty();

            let st = &mut self.sources[src];
            for (d, flag) in st.active.iter_mut().enumerate() {
                *flag = if cone_empty {
                    d == centre
                } else {
                    self.ang_dist[d] <= half_spread
                };
            }

            // Prototype construction
            match self.mode {
                ProcessingMode::Evd => {
                    // Mono signal replicated; spatialisation happens in the
                    // covariance synthesis step
                    for band in 0..NUM_BANDS {
                        for t in 0..TIME_SLOTS {
                            let x = self.in_tf[[band, src, t]];
                            for ch in 0..q {
                                self.proto_tf[[band, ch, t]] = x;
                            }
                        }
                    }
                }
                _ => {
                    for band in 0..NUM_BANDS {
                        let fallback =
                            cone_empty || self.codec.centre_freqs[band] > SPREAD_CUTOFF_HZ;
                        let count = if fallback { 1 } else { self.inside.len() } as f32;
                        for ch in 0..q {
                            let resp = if fallback {
                                self.codec.h_grid[[band, ch, centre]]
                            } else {
                                let mut sum = zero;
                                for &d in &self.inside {
                                    sum += self.codec.h_grid[[band, ch, d]];
                                }
                                sum
                            };
                            for t in 0..TIME_SLOTS {
                                self.proto_tf[[band, ch, t]] =
                                    resp * self.in_tf[[band, src, t]] / count;
                            }
                        }
                    }
                }
            }

            if self.mode == ProcessingMode::Naive {
                // The prototype is the spread signal
                for band in 0..NUM_BANDS {
                    for ch in 0..q {
                        for t in 0..TIME_SLOTS {
                            self.out_tf[[band, ch, t]] += self.proto_tf[[band, ch, t]];
                        }
                    }
                }
                continue;
            }

            self.decorrelators[src].process(&self.proto_tf, &mut self.decor_tf);

            // Covariance estimation and smoothing
            for band in 0..NUM_BANDS {
                for i in 0..q {
                    for j in 0..q {
                        let mut acc = zero;
                        for t in 0..TIME_SLOTS {
                            acc += self.proto_tf[[band, i, t]]
                                * self.proto_tf[[band, j, t]].conj();
                        }
                        self.cov_new[(i, j)] = acc;
                    }
                }
                for i in 0..q {
                    for j in 0..q {
                        st.cproto[band][(i, j)] = st.cproto[band][(i, j)] * alpha
                            + self.cov_new[(i, j)] * (1.0 - alpha);
                    }
                }

                // Target covariance from the outer-product cache
                let fallback = cone_empty || self.codec.centre_freqs[band] > SPREAD_CUTOFF_HZ;
                self.cov_new.fill(zero);
                if fallback {
                    self.cov_new += &self.codec.hhh[band][centre];
                } else {
                    for &d in &self.inside {
                        self.cov_new += &self.codec.hhh[band][d];
                    }
                }

                if self.mode == ProcessingMode::OptimalMixing {
                    // Match the loudness of the centre-direction rendering
                    // while keeping the shape of the spread target
                    let tr = cdf::trace_re(&self.cov_new);
                    if tr > 1e-12 {
                        let mut sig_energy = 0.0f32;
                        for t in 0..TIME_SLOTS {
                            sig_energy += self.in_tf[[band, src, t]].norm_sqr();
                        }
                        let mut centre_gain = 0.0f32;
                        for ch in 0..q {
                            centre_gain += self.codec.h_grid[[band, ch, centre]].norm_sqr();
                        }
                        let scale = centre_gain * sig_energy / tr;
                        for i in 0..q {
                            for j in 0..q {
                                self.cov_new[(i, j)] *= scale;
                            }
                        }
                    }
                }
                for i in 0..q {
                    for j in 0..q {
                        st.cy[band][(i, j)] =
                            st.cy[band][(i, j)] * alpha + self.cov_new[(i, j)] * (1.0 - alpha);
                    }
                }
            }

            // Mixing matrix synthesis
            match self.mode {
                ProcessingMode::Evd => {
                    let e_proto: f32 = st.cproto.iter().map(cdf::trace_re).sum();
                    let e_target: f32 = st.cy.iter().map(cdf::trace_re).sum();
                    let compensation = e_proto / e_target.max(1e-12);
                    for band in 0..NUM_BANDS {
                        let scaled = &st.cy[band] * Complex32::new(compensation, 0.0);
                        self.new_m[band] = cdf::psd_sqrt_factor(&scaled);
                        self.new_mr[band].fill(zero);
                    }
                }
                ProcessingMode::OptimalMixing => {
                    for band in 0..NUM_BANDS {
                        let mut cx = st.cproto[band].clone();
                        for i in 0..q {
                            cx[(i, i)] += DIAG_LOAD_MAIN;
                        }
                        let (m, cr) = cdf::formulate_mixing_matrix(
                            &cx,
                            &st.cy[band],
                            &self.identity,
                            CDF_FORGETTING,
                        );
                        self.new_m[band] = m;

                        if self.codec.centre_freqs[band] <= SPREAD_CUTOFF_HZ {
                            // Residual solve on the diagonalised, real-valued
                            // covariances
                            let mut cx_diag = CMat::zeros(q, q);
                            let mut cr_diag = CMat::zeros(q, q);
                            for i in 0..q {
                                cx_diag[(i, i)] = Complex32::new(
                                    st.cproto[band][(i, i)].re + DIAG_LOAD_RESIDUAL,
                                    0.0,
                                );
                                cr_diag[(i, i)] = Complex32::new(cr[(i, i)].re.max(0.0), 0.0);
                            }
                            let (mr, _) = cdf::formulate_mixing_matrix(
                                &cx_diag,
                                &cr_diag,
                                &self.identity,
                                CDF_FORGETTING,
                            );
                            self.new_mr[band] = mr;
                        } else {
                            self.new_mr[band].fill(zero);
                        }
                    }
                }
                ProcessingMode::Naive => {
                    debug_assert!(false, "naive mode has no matrix synthesis step");
                }
            }

            // Cross-faded application: the direct matrix feeds on the
            // prototype in optimal-mixing mode and on the decorrelated
            // signal in EVD mode; the residual always feeds on the
            // decorrelated signal
            let direct_from_decor = self.mode == ProcessingMode::Evd;
            let residual_active = self.mode == ProcessingMode::OptimalMixing;
            for band in 0..NUM_BANDS {
                let mn = &self.new_m[band];
                let mp = &st.prev_m[band];
                let residual_band =
                    residual_active && self.codec.centre_freqs[band] <= SPREAD_CUTOFF_HZ;
                for t in 0..TIME_SLOTS {
                    let (w_new, w_old) = crossfade_weights(t, TIME_SLOTS);
                    for i in 0..q {
                        let mut acc = zero;
                        for p in 0..q {
                            let x = if direct_from_decor {
                                self.decor_tf[[band, p, t]]
                            } else {
                                self.proto_tf[[band, p, t]]
                            };
                            acc += (mn[(i, p)] * w_new + mp[(i, p)] * w_old) * x;
                        }
                        if residual_band {
                            let mrn = &self.new_mr[band];
                            let mrp = &st.prev_mr[band];
                            for p in 0..q {
                                acc += (mrn[(i, p)] * w_new + mrp[(i, p)] * w_old)
                                    * self.decor_tf[[band, p, t]];
                            }
                        }
                        self.out_tf[[band, i, t]] += acc;
                    }
                }
            }

            // The new matrices become the cross-fade origin of the next frame
            std::mem::swap(&mut st.prev_m, &mut self.new_m);
            std::mem::swap(&mut st.prev_mr, &mut self.new_mr);
        }

        self.synthesis.synthesize(&self.out_tf, &mut self.out_time);
        for (ch, out) in outputs.iter_mut().enumerate() {
            if ch < q {
                out.copy_from_slice(&self.out_time[ch]);
            } else {
                out.fill(0.0);
            }
        }
    }
}
