//! Public spreader instance
//!
//! One `Spreader` is shared between a control actor (setters, `init_codec`)
//! and a realtime audio actor (`process`). The audio actor never blocks: it
//! reads the lifecycle atomics and try-locks the render state, emitting
//! silence whenever the codec is not ready.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;
use portable_atomic::AtomicF32;
use serde::Serialize;

use sona_core::{clamp_elevation, wrap_azimuth, Direction};
use sona_dsp::Filterbank;

use crate::engine::RenderState;
use crate::grid::{DirectionGrid, MeasurementSet};
use crate::params::{Params, ProcessingMode, SourceConfig, SpreaderConfig};
use crate::status::{CodecStatus, Lifecycle};
use crate::{FRAME_SIZE, MAX_SOURCES};

/// Where the direction grid's impulse responses come from
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MeasurementSource {
    /// Built-in synthetic binaural grid
    #[default]
    DefaultGrid,
    /// Measurement file on disk; falls back to the default grid when the
    /// file cannot be loaded
    File(PathBuf),
    /// Already-parsed measurement set supplied by the host
    Parsed(MeasurementSet),
}

/// Metadata of the current direction grid
#[derive(Debug, Clone, Serialize)]
pub struct GridInfo {
    /// Number of grid directions
    pub num_directions: usize,
    /// Output channels per response
    pub num_channels: usize,
    /// Samples per impulse response
    pub ir_length: usize,
    /// Measurement sample rate
    pub sample_rate: f32,
    /// Per-direction azimuth/elevation
    pub directions: Vec<Direction>,
}

/// Spreading renderer instance.
///
/// `Send + Sync`: wrap in an `Arc` and call [`process`](Self::process) from
/// the audio thread while the control thread mutates parameters and drives
/// [`init_codec`](Self::init_codec).
pub struct Spreader {
    params: Params,
    lifecycle: Lifecycle,
    render: Mutex<Option<RenderState>>,
    measurement: Mutex<MeasurementSource>,
    sample_rate: AtomicF32,
    num_outputs: AtomicUsize,
    codec_generation: AtomicUsize,
}

impl Spreader {
    /// Create an instance. The codec starts `NotInitialised`; call
    /// [`init_codec`](Self::init_codec) before expecting audio.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            params: Params::new(),
            lifecycle: Lifecycle::new(),
            render: Mutex::new(None),
            measurement: Mutex::new(MeasurementSource::default()),
            sample_rate: AtomicF32::new(sample_rate),
            num_outputs: AtomicUsize::new(0),
            codec_generation: AtomicUsize::new(0),
        }
    }

    /// Adopt a new host sample rate; invalidates the codec when it changes
    pub fn init(&self, sample_rate: f32) {
        if self.sample_rate.load(Ordering::Relaxed) != sample_rate {
            self.sample_rate.store(sample_rate, Ordering::Relaxed);
            self.lifecycle.request_reinit();
        }
    }

    /// Rebuild the heavy render state for the current configuration.
    ///
    /// No-op unless the codec is `NotInitialised`. Blocks until any
    /// in-flight `process()` call has finished, then rebuilds the grid
    /// caches and per-source state. Load failure of a measurement file
    /// falls back to the default grid with a warning.
    pub fn init_codec(&self) {
        if !self.lifecycle.try_begin_init() {
            return;
        }

        let sample_rate = self.sample_rate.load(Ordering::Relaxed);
        let num_sources = self.params.num_sources.load(Ordering::Relaxed).clamp(1, MAX_SOURCES);
        let mode = ProcessingMode::from_u8(self.params.mode.load(Ordering::Relaxed));

        self.lifecycle.set_progress(0.0, "Loading direction grid");
        let source = self.measurement.lock().clone();
        let grid = match source {
            MeasurementSource::DefaultGrid => DirectionGrid::default_synthetic(sample_rate),
            MeasurementSource::Parsed(set) => match DirectionGrid::from_measurements(set) {
                Ok(grid) => grid,
                Err(err) => {
                    warn!("invalid measurement set: {err}; using default grid");
                    *self.measurement.lock() = MeasurementSource::DefaultGrid;
                    DirectionGrid::default_synthetic(sample_rate)
                }
            },
            MeasurementSource::File(path) => {
                match MeasurementSet::from_json_file(&path)
                    .and_then(DirectionGrid::from_measurements)
                {
                    Ok(grid) => grid,
                    Err(err) => {
                        warn!(
                            "failed to load measurement set {}: {err}; using default grid",
                            path.display()
                        );
                        *self.measurement.lock() = MeasurementSource::DefaultGrid;
                        DirectionGrid::default_synthetic(sample_rate)
                    }
                }
            }
        };

        // Taking the render lock waits for any in-flight process() call
        let mut guard = self.render.lock();
        let state = RenderState::build(grid, sample_rate, num_sources, mode, &self.lifecycle);
        self.num_outputs.store(state.codec.num_outputs, Ordering::Release);
        *guard = Some(state);
        drop(guard);

        self.codec_generation.fetch_add(1, Ordering::AcqRel);
        self.lifecycle.set_progress(1.0, "Ready");
        self.lifecycle.finish_init();
        debug!(
            "codec generation {} ready ({} sources, mode {:?})",
            self.codec_generation.load(Ordering::Relaxed),
            num_sources,
            mode
        );
    }

    /// Render one frame of [`FRAME_SIZE`] samples per channel.
    ///
    /// Emits silence without blocking when the codec is not initialised,
    /// when a rebuild holds the render state, or when any buffer length
    /// differs from the frame size. Output channels beyond the grid's
    /// channel count are zero-padded.
    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        let sized_ok = inputs.iter().all(|c| c.len() == FRAME_SIZE)
            && outputs.iter().all(|c| c.len() == FRAME_SIZE);

        if self.lifecycle.codec_status() != CodecStatus::Initialised || !sized_ok {
            silence(outputs);
            return;
        }
        let Some(mut guard) = self.render.try_lock() else {
            silence(outputs);
            return;
        };
        let Some(state) = guard.as_mut() else {
            silence(outputs);
            return;
        };

        self.lifecycle.begin_process();
        state.render_frame(inputs, outputs, &self.params);
        self.lifecycle.end_process();
    }

    // ---- configuration setters -------------------------------------------

    /// Set the number of sources, clamped to `[1, MAX_SOURCES]`.
    /// Invalidates the codec.
    pub fn set_num_sources(&self, num_sources: usize) {
        let n = num_sources.clamp(1, MAX_SOURCES);
        if self.params.num_sources.swap(n, Ordering::Relaxed) != n {
            self.lifecycle.request_reinit();
        }
    }

    /// Set the processing mode. Invalidates the codec.
    pub fn set_processing_mode(&self, mode: ProcessingMode) {
        if self.params.mode.swap(mode.as_u8(), Ordering::Relaxed) != mode.as_u8() {
            self.lifecycle.request_reinit();
        }
    }

    /// Set one source's azimuth in degrees, wrapped to [-180, 180]
    pub fn set_source_azimuth(&self, source: usize, azimuth: f32) {
        if let Some(params) = self.params.sources.get(source) {
            params.set_azimuth(wrap_azimuth(azimuth));
        }
    }

    /// Set one source's elevation in degrees, clamped to [-90, 90]
    pub fn set_source_elevation(&self, source: usize, elevation: f32) {
        if let Some(params) = self.params.sources.get(source) {
            params.set_elevation(clamp_elevation(elevation));
        }
    }

    /// Set one source's spread in degrees, clamped to [0, 360]
    pub fn set_source_spread(&self, source: usize, spread: f32) {
        if let Some(params) = self.params.sources.get(source) {
            params.set_spread(spread.clamp(0.0, 360.0));
        }
    }

    /// Set the covariance averaging coefficient, expected in [0, 1].
    /// Stored as given; the engine clamps at the point of use.
    pub fn set_averaging_coeff(&self, coeff: f32) {
        self.params.averaging_coeff.store(coeff, Ordering::Relaxed);
    }

    /// Select where grid measurements come from. Invalidates the codec
    /// when the source changes.
    pub fn set_measurement_source(&self, source: MeasurementSource) {
        let mut guard = self.measurement.lock();
        if *guard != source {
            *guard = source;
            drop(guard);
            self.lifecycle.request_reinit();
        }
    }

    // ---- queries ---------------------------------------------------------

    /// Fixed frame size in samples
    pub const fn frame_size(&self) -> usize {
        FRAME_SIZE
    }

    /// Current codec status
    pub fn codec_status(&self) -> CodecStatus {
        self.lifecycle.codec_status()
    }

    /// Initialisation progress in [0, 1]
    pub fn progress(&self) -> f32 {
        self.lifecycle.progress()
    }

    /// Human-readable initialisation stage
    pub fn progress_text(&self) -> String {
        self.lifecycle.progress_text()
    }

    /// Algorithmic delay in samples, for host latency compensation
    pub fn processing_delay(&self) -> usize {
        Filterbank::delay()
    }

    /// Monotonic counter of completed codec rebuilds
    pub fn codec_generation(&self) -> usize {
        self.codec_generation.load(Ordering::Acquire)
    }

    /// Output channel count of the current codec generation (0 before the
    /// first initialisation)
    pub fn num_outputs(&self) -> usize {
        self.num_outputs.load(Ordering::Acquire)
    }

    /// Currently selected measurement source
    pub fn measurement_source(&self) -> MeasurementSource {
        self.measurement.lock().clone()
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> SpreaderConfig {
        let num_sources = self.params.num_sources.load(Ordering::Relaxed);
        SpreaderConfig {
            mode: ProcessingMode::from_u8(self.params.mode.load(Ordering::Relaxed)),
            averaging_coeff: self.params.averaging_coeff.load(Ordering::Relaxed),
            num_sources,
            num_outputs: self.num_outputs(),
            sources: self
                .params
                .sources
                .iter()
                .take(num_sources)
                .map(|s| SourceConfig {
                    azimuth: s.azimuth(),
                    elevation: s.elevation(),
                    spread: s.spread(),
                })
                .collect(),
        }
    }

    /// Metadata of the current grid, if a codec generation exists and the
    /// render state is not being rebuilt right now
    pub fn grid_info(&self) -> Option<GridInfo> {
        let guard = self.render.try_lock()?;
        let state = guard.as_ref()?;
        Some(GridInfo {
            num_directions: state.codec.grid.len(),
            num_channels: state.codec.grid.channels(),
            ir_length: state.codec.grid.ir_length(),
            sample_rate: state.codec.grid.sample_rate(),
            directions: state.codec.grid.directions().to_vec(),
        })
    }

    /// Grid directions used by a source's last rendered frame
    /// (visualisation only)
    pub fn active_directions(&self, source: usize) -> Option<Vec<bool>> {
        let guard = self.render.try_lock()?;
        let state = guard.as_ref()?;
        state.sources.get(source).map(|s| s.active.clone())
    }
}

/// Zero every output channel, whatever its length
fn silence(outputs: &mut [&mut [f32]]) {
    for channel in outputs.iter_mut() {
        channel.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setter_clamping() {
        let sp = Spreader::new(48_000.0);
        sp.set_source_azimuth(0, 190.0);
        sp.set_source_elevation(0, 120.0);
        sp.set_source_spread(0, 400.0);
        sp.set_num_sources(99);

        let config = sp.config();
        assert_eq!(config.num_sources, MAX_SOURCES);
        let src = &config.sources[0];
        assert!((src.azimuth - (-170.0)).abs() < 1e-4);
        assert!((src.elevation - 90.0).abs() < 1e-4);
        assert!((src.spread - 360.0).abs() < 1e-4);
    }

    #[test]
    fn test_out_of_range_source_index_ignored() {
        let sp = Spreader::new(48_000.0);
        sp.set_source_azimuth(MAX_SOURCES + 1, 10.0);
        // No panic, nothing to assert beyond the call surviving
        assert_eq!(sp.codec_status(), CodecStatus::NotInitialised);
    }

    #[test]
    fn test_delay_is_hop_multiple() {
        let sp = Spreader::new(48_000.0);
        assert_eq!(sp.processing_delay() % sona_dsp::HOP_SIZE, 0);
    }

    #[test]
    fn test_setters_invalidate_codec() {
        let sp = Spreader::new(48_000.0);
        sp.init_codec();
        assert_eq!(sp.codec_status(), CodecStatus::Initialised);

        sp.set_num_sources(2);
        assert_eq!(sp.codec_status(), CodecStatus::NotInitialised);

        sp.init_codec();
        sp.set_processing_mode(ProcessingMode::Evd);
        assert_eq!(sp.codec_status(), CodecStatus::NotInitialised);

        // Re-setting the same mode does not invalidate
        sp.init_codec();
        sp.set_processing_mode(ProcessingMode::Evd);
        assert_eq!(sp.codec_status(), CodecStatus::Initialised);
    }
}
