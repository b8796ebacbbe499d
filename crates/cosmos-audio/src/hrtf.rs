//! Head-related impulse response table.
//!
//! A small table of left/right impulse responses on a fixed
//! (elevation, azimuth) grid. Lookup snaps to the nearest grid point with two
//! independent one-dimensional searches: first the nearest elevation by
//! absolute difference, then the nearest azimuth by circular distance. This
//! is not a joint 2-D nearest neighbour, and there is no interpolation
//! between neighbouring responses.
//!
//! The generated table models head shadow (level difference and low-pass
//! on the far ear) and a pinna notch that moves with elevation. Inter-aural
//! time delay is not baked into the responses; the spatializer applies it
//! separately.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use tracing::{debug, info};

use crate::error::{AudioError, AudioResult};

/// Elevation grid of the generated table, in degrees.
pub const DEFAULT_ELEVATIONS: [f32; 7] = [-40.0, -20.0, 0.0, 20.0, 40.0, 60.0, 90.0];

/// Azimuth spacing of the generated table, in degrees.
pub const DEFAULT_AZIMUTH_STEP: f32 = 15.0;

/// Grid coordinate of a table entry, in whole degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HrtfKey {
    /// Elevation in degrees
    pub elevation: i16,
    /// Azimuth in degrees, in (-180, 180]
    pub azimuth: i16,
}

impl HrtfKey {
    /// Creates a key from grid angles.
    #[must_use]
    pub fn new(elevation: f32, azimuth: f32) -> Self {
        Self {
            elevation: elevation.round() as i16,
            azimuth: azimuth.round() as i16,
        }
    }
}

/// Left/right impulse responses for one direction.
#[derive(Debug, Clone, PartialEq)]
pub struct HrirPair {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl HrirPair {
    /// Creates a pair; both ears must have the same non-zero length.
    pub fn new(left: Vec<f32>, right: Vec<f32>) -> AudioResult<Self> {
        if left.is_empty() || left.len() != right.len() {
            return Err(AudioError::InvalidHrtf(format!(
                "impulse lengths must match and be non-empty (left {}, right {})",
                left.len(),
                right.len()
            )));
        }
        if left.iter().chain(&right).any(|s| !s.is_finite()) {
            return Err(AudioError::InvalidHrtf("non-finite impulse sample".into()));
        }
        Ok(Self { left, right })
    }

    /// Left ear impulse response.
    #[must_use]
    pub fn left(&self) -> &[f32] {
        &self.left
    }

    /// Right ear impulse response.
    #[must_use]
    pub fn right(&self) -> &[f32] {
        &self.right
    }

    /// Number of taps per ear.
    #[must_use]
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// Always false for a constructed pair.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Sum of squared samples for each ear.
    #[must_use]
    pub fn energy(&self) -> (f32, f32) {
        let e = |ir: &[f32]| ir.iter().map(|s| s * s).sum::<f32>();
        (e(&self.left), e(&self.right))
    }
}

/// Directional response table with a fixed grid.
#[derive(Debug, Clone)]
pub struct HrtfTable {
    elevations: Vec<f32>,
    azimuths: Vec<f32>,
    entries: AHashMap<HrtfKey, Arc<HrirPair>>,
    taps: usize,
}

impl HrtfTable {
    /// Creates an empty table over the given grid.
    ///
    /// The grid is fixed for the lifetime of the table; azimuths must lie
    /// in (-180, 180] and elevations in [-90, 90].
    pub fn new(elevations: Vec<f32>, azimuths: Vec<f32>) -> AudioResult<Self> {
        if elevations.is_empty() || azimuths.is_empty() {
            return Err(AudioError::InvalidHrtf("grid must not be empty".into()));
        }
        if elevations
            .iter()
            .any(|e| !e.is_finite() || !(-90.0..=90.0).contains(e))
        {
            return Err(AudioError::InvalidHrtf("elevation outside [-90, 90]".into()));
        }
        if azimuths
            .iter()
            .any(|a| !a.is_finite() || *a <= -180.0 || *a > 180.0)
        {
            return Err(AudioError::InvalidHrtf("azimuth outside (-180, 180]".into()));
        }
        // Keys hold whole degrees.
        if !distinct_degrees(&elevations) || !distinct_degrees(&azimuths) {
            return Err(AudioError::InvalidHrtf(
                "grid angles must be distinct after rounding to whole degrees".into(),
            ));
        }
        Ok(Self {
            elevations,
            azimuths,
            entries: AHashMap::new(),
            taps: 0,
        })
    }

    /// Builds the default grid and fills it with modelled responses.
    pub fn generate(sample_rate: u32, taps: usize) -> AudioResult<Self> {
        let azimuths = default_azimuths();
        let mut table = Self::new(DEFAULT_ELEVATIONS.to_vec(), azimuths)?;
        let generator = HrirModel::new(sample_rate, taps);
        for elevation in table.elevations.clone() {
            for azimuth in table.azimuths.clone() {
                let pair = generator.pair(azimuth, elevation)?;
                table.insert(HrtfKey::new(elevation, azimuth), pair)?;
            }
        }
        info!(
            "Generated HRTF table: {} directions, {} taps",
            table.len(),
            table.taps
        );
        Ok(table)
    }

    /// Stores the response for a grid point. All entries share one length.
    pub fn insert(&mut self, key: HrtfKey, pair: HrirPair) -> AudioResult<()> {
        let on_grid = self
            .elevations
            .iter()
            .any(|e| HrtfKey::new(*e, 0.0).elevation == key.elevation)
            && self
                .azimuths
                .iter()
                .any(|a| HrtfKey::new(0.0, *a).azimuth == key.azimuth);
        if !on_grid {
            return Err(AudioError::InvalidHrtf(format!(
                "key ({}, {}) is not on the table grid",
                key.elevation, key.azimuth
            )));
        }
        if self.taps != 0 && pair.len() != self.taps {
            return Err(AudioError::InvalidHrtf(format!(
                "expected {} taps, got {}",
                self.taps,
                pair.len()
            )));
        }
        self.taps = pair.len();
        self.entries.insert(key, Arc::new(pair));
        Ok(())
    }

    /// Elevation grid.
    #[must_use]
    pub fn elevations(&self) -> &[f32] {
        &self.elevations
    }

    /// Azimuth grid.
    #[must_use]
    pub fn azimuths(&self) -> &[f32] {
        &self.azimuths
    }

    /// Taps per response (0 while empty).
    #[must_use]
    pub const fn taps(&self) -> usize {
        self.taps
    }

    /// Number of stored directions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no direction has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nearest grid elevation by absolute difference; ties keep the first.
    #[must_use]
    pub fn nearest_elevation(&self, elevation: f32) -> f32 {
        let mut best = self.elevations[0];
        let mut best_diff = (elevation - best).abs();
        for &candidate in &self.elevations[1..] {
            let diff = (elevation - candidate).abs();
            if diff < best_diff {
                best = candidate;
                best_diff = diff;
            }
        }
        best
    }

    /// Nearest grid azimuth by circular distance; ties keep the first.
    #[must_use]
    pub fn nearest_azimuth(&self, azimuth: f32) -> f32 {
        let mut best = self.azimuths[0];
        let mut best_diff = circular_distance(azimuth, best);
        for &candidate in &self.azimuths[1..] {
            let diff = circular_distance(azimuth, candidate);
            if diff < best_diff {
                best = candidate;
                best_diff = diff;
            }
        }
        best
    }

    /// Grid key nearest to a direction.
    #[must_use]
    pub fn nearest_key(&self, azimuth: f32, elevation: f32) -> HrtfKey {
        let elevation = self.nearest_elevation(elevation);
        let azimuth = self.nearest_azimuth(azimuth);
        HrtfKey::new(elevation, azimuth)
    }

    /// Response pair nearest to a direction, or `None` if that grid point
    /// has no stored entry.
    #[must_use]
    pub fn lookup(&self, azimuth: f32, elevation: f32) -> Option<(HrtfKey, Arc<HrirPair>)> {
        let key = self.nearest_key(azimuth, elevation);
        let found = self.entries.get(&key).cloned();
        if found.is_none() {
            debug!(?key, "HRTF lookup miss");
        }
        found.map(|pair| (key, pair))
    }
}

/// Circular angular distance in degrees: `min(|d|, 360 - |d|)`.
#[must_use]
pub fn circular_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

/// Azimuth grid of the generated table, ascending from -165 to 180.
#[must_use]
pub fn default_azimuths() -> Vec<f32> {
    let steps = (360.0 / DEFAULT_AZIMUTH_STEP) as i32;
    (1..=steps)
        .map(|i| -180.0 + i as f32 * DEFAULT_AZIMUTH_STEP)
        .collect()
}

/// Parametric head model used to synthesize the default table.
struct HrirModel {
    taps: usize,
    rate_scale: f32,
}

impl HrirModel {
    fn new(sample_rate: u32, taps: usize) -> Self {
        Self {
            taps: taps.max(8),
            rate_scale: sample_rate as f32 / 44_100.0,
        }
    }

    fn pair(&self, azimuth: f32, elevation: f32) -> AudioResult<HrirPair> {
        let az = azimuth.to_radians();
        let el = elevation.to_radians();
        // +1 fully right, -1 fully left.
        let lateral = az.sin() * el.cos();
        // +1 in front, -1 behind.
        let frontal = az.cos() * el.cos();
        HrirPair::new(
            self.ear(-lateral, frontal, elevation),
            self.ear(lateral, frontal, elevation),
        )
    }

    /// `facing` is +1 when the source is on this ear's side.
    fn ear(&self, facing: f32, frontal: f32, elevation: f32) -> Vec<f32> {
        let mut ir = vec![0.0f32; self.taps];

        // Head shadow: the far ear is quieter and duller.
        let gain = 0.55 + 0.45 * facing;
        let pole = 0.1 + 0.55 * (1.0 - facing) * 0.5;
        let mut tap = (1.0 - pole) * gain;
        for sample in &mut ir {
            *sample = tap;
            tap *= pole;
        }

        // Pinna reflection: a negative echo whose delay grows with elevation,
        // stronger for sources in front.
        let normalized = ((elevation + 40.0) / 130.0).clamp(0.0, 1.0);
        let delay = ((2.0 + normalized * 6.0) * self.rate_scale).round() as usize;
        let echo = -0.25 * (0.6 + 0.4 * frontal) * gain;
        if delay < self.taps {
            ir[delay] += echo;
        }
        // Rear sources lose a little brilliance.
        if frontal < 0.0 && self.taps > 1 {
            ir[1] += 0.1 * frontal * gain;
        }
        ir
    }
}

fn distinct_degrees(angles: &[f32]) -> bool {
    let mut seen = AHashSet::with_capacity(angles.len());
    angles.iter().all(|a| seen.insert(a.round() as i16))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated() -> HrtfTable {
        HrtfTable::generate(44_100, 32).expect("generated table")
    }

    #[test]
    fn test_generated_table_covers_grid() {
        let table = generated();
        assert_eq!(table.azimuths().len(), 24);
        assert_eq!(table.len(), 7 * 24);
        assert_eq!(table.taps(), 32);
        assert!(table.azimuths().contains(&180.0));
        assert!(!table.azimuths().contains(&-180.0));
    }

    #[test]
    fn test_elevation_ties_favor_first() {
        let table = generated();
        // -30 is equidistant from -40 and -20
        assert!((table.nearest_elevation(-30.0) - (-40.0)).abs() < f32::EPSILON);
        assert!((table.nearest_elevation(83.0) - 90.0).abs() < f32::EPSILON);
        assert!((table.nearest_elevation(-89.0) - (-40.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_azimuth_wraparound_symmetric() {
        let table = generated();
        let a = table.nearest_azimuth(179.0);
        let b = table.nearest_azimuth(-179.0);
        assert!((a - 180.0).abs() < f32::EPSILON);
        assert!((b - 180.0).abs() < f32::EPSILON);

        // Sign swaps near the seam move at most one grid step.
        for query in [170.0f32, 172.0, 175.0, 177.5] {
            let pos = table.nearest_azimuth(query);
            let neg = table.nearest_azimuth(-query);
            assert!(circular_distance(pos, neg) <= DEFAULT_AZIMUTH_STEP * 2.0);
            assert!(circular_distance(query, pos) <= DEFAULT_AZIMUTH_STEP / 2.0);
            assert!(circular_distance(-query, neg) <= DEFAULT_AZIMUTH_STEP / 2.0);
        }
    }

    #[test]
    fn test_azimuth_ties_favor_first() {
        let table = generated();
        // 7.5 is equidistant from 0 and 15; 0 comes first in the grid.
        assert!(table.nearest_azimuth(7.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_searches_are_independent() {
        let table = generated();
        let key = table.nearest_key(-91.0, 47.0);
        assert_eq!(key, HrtfKey { elevation: 40, azimuth: -90 });
    }

    #[test]
    fn test_lookup_miss_returns_none() {
        let mut table = HrtfTable::new(vec![0.0], vec![-90.0, 0.0, 90.0]).expect("grid");
        let pair = HrirPair::new(vec![1.0, 0.0], vec![0.5, 0.0]).expect("pair");
        table.insert(HrtfKey::new(0.0, 0.0), pair).expect("insert");

        assert!(table.lookup(5.0, 10.0).is_some());
        assert!(table.lookup(80.0, 0.0).is_none());
    }

    #[test]
    fn test_insert_rejects_off_grid_and_mismatched() {
        let mut table = HrtfTable::new(vec![0.0], vec![0.0, 90.0]).expect("grid");
        let pair = HrirPair::new(vec![1.0], vec![1.0]).expect("pair");
        assert!(table.insert(HrtfKey::new(10.0, 0.0), pair.clone()).is_err());
        table.insert(HrtfKey::new(0.0, 0.0), pair).expect("insert");
        let longer = HrirPair::new(vec![1.0, 0.0], vec![1.0, 0.0]).expect("pair");
        assert!(table.insert(HrtfKey::new(0.0, 90.0), longer).is_err());
    }

    #[test]
    fn test_invalid_grid_rejected() {
        assert!(HrtfTable::new(vec![], vec![0.0]).is_err());
        assert!(HrtfTable::new(vec![0.0], vec![-180.0]).is_err());
        assert!(HrirPair::new(vec![1.0], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_grid_angles_colliding_after_rounding_rejected() {
        assert!(HrtfTable::new(vec![0.0], vec![7.5, 8.0]).is_err());
        assert!(HrtfTable::new(vec![10.2, 9.8], vec![0.0]).is_err());
        assert!(HrtfTable::new(vec![0.0, 0.0], vec![0.0]).is_err());
        assert!(HrtfTable::new(vec![-7.5, 7.5], vec![0.0, 7.4]).is_ok());
    }

    #[test]
    fn test_right_source_louder_in_right_ear() {
        let table = generated();
        let (_, pair) = table.lookup(90.0, 0.0).expect("entry");
        let (left, right) = pair.energy();
        assert!(right > left * 2.0);

        let (_, front) = table.lookup(0.0, 0.0).expect("entry");
        let (fl, fr) = front.energy();
        assert!((fl - fr).abs() < 1e-5);
    }

    #[test]
    fn test_circular_distance() {
        assert!((circular_distance(179.0, -179.0) - 2.0).abs() < 1e-5);
        assert!((circular_distance(10.0, 350.0) - 20.0).abs() < 1e-5);
        assert!((circular_distance(-90.0, 90.0) - 180.0).abs() < 1e-5);
    }
}
