//! Direction grids and measurement sets
//!
//! A codec generation renders through a fixed grid of measured directions:
//! each grid point carries a multichannel impulse response, a unit vector
//! and an integration weight. Grids come either from an already-parsed
//! measurement set or from the built-in synthetic binaural model.

use std::f32::consts::PI;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use sona_core::{Direction, SpreadError, SpreadResult, Vec3};

use crate::DEFAULT_GRID_POINTS;

/// Impulse-response length of the synthetic grid, in samples
pub const SYNTHETIC_IR_LENGTH: usize = 128;

/// Spherical head model constants for the synthetic grid
const HEAD_RADIUS_M: f32 = 0.0875;
const SPEED_OF_SOUND: f32 = 343.0;

/// Gaussian impulse width of the synthetic model, in samples
const IMPULSE_SIGMA: f32 = 5.0;

/// A set of measured multichannel impulse responses with their directions.
///
/// This is the already-parsed form of whatever interchange format the host
/// uses; the engine only consumes these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSet {
    /// Sample rate the responses were measured at
    pub sample_rate: f32,
    /// Samples per impulse response
    pub ir_length: usize,
    /// Output channels per response
    pub channels: usize,
    /// Measurement direction of every response
    pub directions: Vec<Direction>,
    /// Interleaved response data: direction-major, then channel, then sample
    pub ir_data: Vec<f32>,
}

impl MeasurementSet {
    /// Check internal consistency
    pub fn validate(&self) -> SpreadResult<()> {
        if self.channels == 0 {
            return Err(SpreadError::InvalidMeasurementSet(
                "zero output channels".into(),
            ));
        }
        if self.ir_length == 0 {
            return Err(SpreadError::InvalidMeasurementSet(
                "zero-length impulse responses".into(),
            ));
        }
        if self.directions.is_empty() {
            return Err(SpreadError::InvalidMeasurementSet("no directions".into()));
        }
        let expected = self.directions.len() * self.channels * self.ir_length;
        if self.ir_data.len() != expected {
            return Err(SpreadError::InvalidMeasurementSet(format!(
                "IR data length {} does not match {} directions x {} channels x {} samples",
                self.ir_data.len(),
                self.directions.len(),
                self.channels,
                self.ir_length
            )));
        }
        Ok(())
    }

    /// Load and validate a set from a JSON document
    pub fn from_json_file(path: &Path) -> SpreadResult<Self> {
        let file = std::fs::File::open(path)?;
        let set: MeasurementSet = serde_json::from_reader(BufReader::new(file))?;
        set.validate()?;
        Ok(set)
    }

    /// Impulse response of one (direction, channel) pair
    pub fn ir(&self, direction: usize, channel: usize) -> &[f32] {
        let start = (direction * self.channels + channel) * self.ir_length;
        &self.ir_data[start..start + self.ir_length]
    }
}

/// Direction grid of one codec generation
pub struct DirectionGrid {
    measurements: MeasurementSet,
    unit_vectors: Vec<Vec3>,
    weights: Vec<f32>,
}

impl DirectionGrid {
    /// Build a grid from an already-parsed measurement set
    pub fn from_measurements(set: MeasurementSet) -> SpreadResult<Self> {
        set.validate()?;
        let unit_vectors: Vec<Vec3> = set.directions.iter().map(|d| d.to_unit_vector()).collect();
        let weights = integration_weights(&unit_vectors);
        Ok(Self {
            measurements: set,
            unit_vectors,
            weights,
        })
    }

    /// Built-in grid: Fibonacci-spiral directions with synthetic binaural
    /// responses
    pub fn default_synthetic(sample_rate: f32) -> Self {
        let n = DEFAULT_GRID_POINTS;
        let golden_ratio = (1.0 + 5.0_f32.sqrt()) / 2.0;

        let mut directions = Vec::with_capacity(n);
        for i in 0..n {
            let theta = 2.0 * PI * i as f32 / golden_ratio;
            let phi = (1.0 - 2.0 * (i as f32 + 0.5) / n as f32).acos();
            let v = Vec3::new(
                phi.sin() * theta.cos(),
                phi.sin() * theta.sin(),
                phi.cos(),
            );
            directions.push(v.to_direction());
        }

        let mut ir_data = vec![0.0f32; n * 2 * SYNTHETIC_IR_LENGTH];
        for (i, dir) in directions.iter().enumerate() {
            let base = i * 2 * SYNTHETIC_IR_LENGTH;
            let (left, rest) = ir_data[base..base + 2 * SYNTHETIC_IR_LENGTH]
                .split_at_mut(SYNTHETIC_IR_LENGTH);
            synthetic_binaural_ir(*dir, sample_rate, left, rest);
        }

        let measurements = MeasurementSet {
            sample_rate,
            ir_length: SYNTHETIC_IR_LENGTH,
            channels: 2,
            directions,
            ir_data,
        };
        let unit_vectors: Vec<Vec3> = measurements
            .directions
            .iter()
            .map(|d| d.to_unit_vector())
            .collect();
        let weights = integration_weights(&unit_vectors);
        Self {
            measurements,
            unit_vectors,
            weights,
        }
    }

    /// Number of grid directions
    pub fn len(&self) -> usize {
        self.measurements.directions.len()
    }

    /// True when the grid has no directions (never the case once built)
    pub fn is_empty(&self) -> bool {
        self.measurements.directions.is_empty()
    }

    /// Output channels per response
    pub fn channels(&self) -> usize {
        self.measurements.channels
    }

    /// Samples per impulse response
    pub fn ir_length(&self) -> usize {
        self.measurements.ir_length
    }

    /// Measurement sample rate
    pub fn sample_rate(&self) -> f32 {
        self.measurements.sample_rate
    }

    /// All grid directions
    pub fn directions(&self) -> &[Direction] {
        &self.measurements.directions
    }

    /// Unit vector of one direction
    pub fn unit_vector(&self, index: usize) -> &Vec3 {
        &self.unit_vectors[index]
    }

    /// Integration weight of one direction
    pub fn weight(&self, index: usize) -> f32 {
        self.weights[index]
    }

    /// Impulse response of one (direction, channel) pair
    pub fn ir(&self, direction: usize, channel: usize) -> &[f32] {
        self.measurements.ir(direction, channel)
    }

    /// Underlying measurement set
    pub fn measurements(&self) -> &MeasurementSet {
        &self.measurements
    }
}

/// Approximate spherical integration weights, normalised to mean 1.
///
/// Each direction is weighted by the squared angular distance to its
/// nearest neighbour, a cheap stand-in for the Voronoi cell area that
/// behaves correctly for both uniform layouts and regular az/el rasters
/// with crowded poles.
fn integration_weights(unit_vectors: &[Vec3]) -> Vec<f32> {
    let n = unit_vectors.len();
    if n < 2 {
        return vec![1.0; n];
    }
    let mut weights: Vec<f32> = (0..n)
        .map(|i| {
            let mut nearest = f32::MAX;
            for j in 0..n {
                if j != i {
                    nearest = nearest.min(unit_vectors[i].angle_between(&unit_vectors[j]));
                }
            }
            // Coincident measurement points still get a small share
            nearest.max(0.5).powi(2)
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    let scale = n as f32 / sum;
    for w in &mut weights {
        *w *= scale;
    }
    weights
}

/// Synthetic binaural response: spherical-head ITD, constant-power ILD,
/// one-pole head shadow on the far ear and a small elevation cue.
fn synthetic_binaural_ir(direction: Direction, sample_rate: f32, left: &mut [f32], right: &mut [f32]) {
    let az = direction.azimuth.to_radians();
    let el = direction.elevation.to_radians();
    let pan = az.sin() * el.cos();

    let itd_seconds = (HEAD_RADIUS_M / SPEED_OF_SOUND) * (az.sin() + az).abs();
    let itd_samples = itd_seconds * sample_rate;

    let pan_angle = (pan + 1.0) * 0.25 * PI;
    let left_gain = pan_angle.cos();
    let right_gain = pan_angle.sin();

    // Keep the direct pulse fully inside the response
    let base_delay = 8.0;
    let left_delay = base_delay + if pan > 0.0 { itd_samples } else { 0.0 };
    let right_delay = base_delay + if pan < 0.0 { itd_samples } else { 0.0 };

    let len = left.len().min(right.len());
    for i in 0..len {
        let t = i as f32;
        let ld = t - left_delay;
        let rd = t - right_delay;
        left[i] = left_gain * (-ld * ld / (2.0 * IMPULSE_SIGMA * IMPULSE_SIGMA)).exp();
        right[i] = right_gain * (-rd * rd / (2.0 * IMPULSE_SIGMA * IMPULSE_SIGMA)).exp();

        // Faint shoulder/pinna reflection, strongest near the horizon
        if (24..40).contains(&i) {
            let pinna = 0.06 * (1.0 - el.abs() / (PI / 2.0));
            left[i] += pinna * left_gain;
            right[i] += pinna * right_gain;
        }
    }

    // Head shadow: one-pole lowpass on the far ear
    let shadow = pan.abs() * 0.5;
    let coeff = 0.3 + 0.6 * (1.0 - shadow);
    if pan > 0.0 {
        one_pole_in_place(left, coeff);
    } else if pan < 0.0 {
        one_pole_in_place(right, coeff);
    }
}

fn one_pole_in_place(samples: &mut [f32], coeff: f32) {
    let mut state = 0.0f32;
    for s in samples.iter_mut() {
        state = state * (1.0 - coeff) + *s * coeff;
        *s = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small_set() -> MeasurementSet {
        MeasurementSet {
            sample_rate: 48_000.0,
            ir_length: 2,
            channels: 2,
            directions: vec![Direction::new(-45.0, 0.0), Direction::new(45.0, 0.0)],
            ir_data: vec![1.0, 0.5, 0.2, 0.1, 0.3, 0.0, 0.9, 0.4],
        }
    }

    #[test]
    fn test_measurement_indexing() {
        let set = small_set();
        assert!(set.validate().is_ok());
        assert_eq!(set.ir(0, 0), &[1.0, 0.5]);
        assert_eq!(set.ir(0, 1), &[0.2, 0.1]);
        assert_eq!(set.ir(1, 0), &[0.3, 0.0]);
        assert_eq!(set.ir(1, 1), &[0.9, 0.4]);
    }

    #[test]
    fn test_validation_rejects_bad_lengths() {
        let mut set = small_set();
        set.ir_data.pop();
        assert!(set.validate().is_err());

        let mut set = small_set();
        set.channels = 0;
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let set = small_set();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_string(&set).unwrap()).unwrap();
        let loaded = MeasurementSet::from_json_file(file.path()).unwrap();
        assert_eq!(loaded, set);
    }

    #[test]
    fn test_default_grid_shape() {
        let grid = DirectionGrid::default_synthetic(48_000.0);
        assert_eq!(grid.len(), DEFAULT_GRID_POINTS);
        assert_eq!(grid.channels(), 2);
        assert_eq!(grid.ir_length(), SYNTHETIC_IR_LENGTH);

        // Covers both hemispheres
        assert!(grid.directions().iter().any(|d| d.elevation > 30.0));
        assert!(grid.directions().iter().any(|d| d.elevation < -30.0));
    }

    #[test]
    fn test_default_grid_weights_uniform() {
        let grid = DirectionGrid::default_synthetic(48_000.0);
        let mean = grid.weights.iter().sum::<f32>() / grid.len() as f32;
        assert_abs_diff_eq!(mean, 1.0, epsilon = 1e-3);
        for &w in &grid.weights {
            assert!(w > 0.2 && w < 5.0, "weight {w} far from uniform");
        }
    }

    #[test]
    fn test_synthetic_ir_lateralisation() {
        let mut left = [0.0f32; SYNTHETIC_IR_LENGTH];
        let mut right = [0.0f32; SYNTHETIC_IR_LENGTH];
        synthetic_binaural_ir(Direction::new(90.0, 0.0), 48_000.0, &mut left, &mut right);

        let le: f32 = left.iter().map(|x| x * x).sum();
        let re: f32 = right.iter().map(|x| x * x).sum();
        // Source hard right: right ear louder
        assert!(re > le * 2.0);
    }
}
