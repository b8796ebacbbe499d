//! Audio feature input from the upstream music analyzer.
//!
//! The engine never interprets these values; it only reads one named scalar
//! per zone ambience to scale that zone's ambient bed.

use serde::{Deserialize, Serialize};

/// Per-frame feature vector supplied by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFeatures {
    /// Low band level
    pub bass: f32,
    /// Mid band level
    pub mid: f32,
    /// High band level
    pub treble: f32,
    /// Overall energy
    pub energy: f32,
    /// Emotional valence
    pub valence: f32,
}

/// Which feature scalar modulates an ambient bed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// [`AudioFeatures::bass`]
    Bass,
    /// [`AudioFeatures::mid`]
    Mid,
    /// [`AudioFeatures::treble`]
    Treble,
    /// [`AudioFeatures::energy`]
    #[default]
    Energy,
    /// [`AudioFeatures::valence`]
    Valence,
}

impl AudioFeatures {
    /// Reads the scalar named by `kind`.
    #[must_use]
    pub const fn get(&self, kind: FeatureKind) -> f32 {
        match kind {
            FeatureKind::Bass => self.bass,
            FeatureKind::Mid => self.mid,
            FeatureKind::Treble => self.treble,
            FeatureKind::Energy => self.energy,
            FeatureKind::Valence => self.valence,
        }
    }

    /// Gain multiplier `1 + reactivity * feature`, clamped to `[0, 2]`.
    ///
    /// Non-finite feature values are treated as zero.
    #[must_use]
    pub fn modulation(&self, kind: FeatureKind, reactivity: f32) -> f32 {
        let value = self.get(kind);
        let value = if value.is_finite() { value } else { 0.0 };
        (1.0 + reactivity * value).clamp(0.0, 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_lookup() {
        let features = AudioFeatures {
            bass: 0.9,
            energy: 0.4,
            ..AudioFeatures::default()
        };
        assert!((features.get(FeatureKind::Bass) - 0.9).abs() < f32::EPSILON);
        assert!((features.get(FeatureKind::Treble)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_modulation_clamped() {
        let features = AudioFeatures {
            energy: 5.0,
            valence: f32::NAN,
            ..AudioFeatures::default()
        };
        assert!((features.modulation(FeatureKind::Energy, 1.0) - 2.0).abs() < f32::EPSILON);
        assert!((features.modulation(FeatureKind::Valence, 1.0) - 1.0).abs() < f32::EPSILON);
        assert!((features.modulation(FeatureKind::Energy, 0.0) - 1.0).abs() < f32::EPSILON);
    }
}
