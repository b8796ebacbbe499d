//! Binaural spatialization parameters.
//!
//! Computes, per source and per tick, where the source sits relative to the
//! listener's head, how loud it is after distance and cone attenuation, how
//! far the Doppler effect shifts its pitch, and which directional response
//! pair applies.

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use glam::Vec3;

use crate::config::SpatialConfig;
use crate::hrtf::{HrirPair, HrtfKey, HrtfTable};
use crate::listener::ListenerState;
use crate::source::{SoundCone, SpatialAudioSource};

/// Head radius used by the Woodworth inter-aural delay model, in meters.
pub const HEAD_RADIUS: f32 = 0.0875;

/// Distances below this count as zero.
const MIN_DISTANCE: f32 = 1e-4;

/// Distance attenuation: `(1 - d / max)^rolloff`, zero at or beyond `max`.
#[must_use]
pub fn distance_gain(distance: f32, max_distance: f32, rolloff: f32) -> f32 {
    if distance >= max_distance {
        return 0.0;
    }
    let d = distance.max(0.0);
    (1.0 - d / max_distance).powf(rolloff).clamp(0.0, 1.0)
}

/// Cone attenuation for a listener in direction `to_listener` from a source
/// whose cone points along `axis`.
///
/// Full gain inside half the inner angle, `outer_gain` beyond half the outer
/// angle, linear in between.
#[must_use]
pub fn cone_gain(cone: &SoundCone, axis: Vec3, to_listener: Vec3) -> f32 {
    if cone.is_omni() {
        return 1.0;
    }
    let (Some(axis), Some(dir)) = (axis.try_normalize(), to_listener.try_normalize()) else {
        return 1.0;
    };
    let angle = axis.dot(dir).clamp(-1.0, 1.0).acos().to_degrees();
    let inner = cone.inner_angle * 0.5;
    let outer = cone.outer_angle * 0.5;
    if angle <= inner {
        1.0
    } else if angle >= outer {
        cone.outer_gain
    } else {
        let t = (angle - inner) / (outer - inner);
        1.0 + (cone.outer_gain - 1.0) * t
    }
}

/// Azimuth and elevation in degrees of a listener-space direction.
///
/// Azimuth is `atan2(x, z)` in `(-180, 180]` (positive to the right);
/// elevation is measured from the horizontal plane.
#[must_use]
pub fn direction_angles(local: Vec3) -> (f32, f32) {
    if local.length_squared() < MIN_DISTANCE * MIN_DISTANCE {
        return (0.0, 0.0);
    }
    let mut azimuth = local.x.atan2(local.z).to_degrees();
    if azimuth <= -180.0 {
        azimuth = 180.0;
    }
    let horizontal = local.x.hypot(local.z);
    let elevation = local.y.atan2(horizontal).to_degrees();
    (azimuth, elevation)
}

/// Woodworth inter-aural time difference in seconds.
///
/// Positive when the source is to the right, meaning the left ear hears it
/// later.
#[must_use]
pub fn woodworth_itd(azimuth: f32, elevation: f32, speed_of_sound: f32) -> f32 {
    let lateral = (azimuth.to_radians().sin() * elevation.to_radians().cos())
        .clamp(-1.0, 1.0)
        .asin()
        .clamp(-FRAC_PI_2, FRAC_PI_2);
    HEAD_RADIUS / speed_of_sound * (lateral + lateral.sin())
}

/// Constant-power pan gains `(left, right)` for a pan position in `[-1, 1]`.
#[must_use]
pub fn constant_power_pan(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Spatial state of one source for one tick.
#[derive(Debug, Clone, Default)]
pub struct SpatialParams {
    /// Distance from the listener
    pub distance: f32,
    /// Azimuth in listener space, degrees
    pub azimuth: f32,
    /// Elevation in listener space, degrees
    pub elevation: f32,
    /// Distance attenuation alone
    pub distance_gain: f32,
    /// Cone attenuation alone
    pub cone_gain: f32,
    /// Distance x cone x source volume
    pub gain: f32,
    /// Doppler playback-rate multiplier
    pub doppler: f32,
    /// Inter-aural time difference in seconds (positive = left ear later)
    pub itd: f32,
    /// Pan position for the stereo fallback (-1 left, 1 right)
    pub pan: f32,
    /// Directional response, if a table is loaded and the lookup hit
    pub hrir: Option<(HrtfKey, Arc<HrirPair>)>,
    /// Skip spatial processing
    pub head_relative: bool,
}

impl SpatialParams {
    /// Parameters for a head-relative source: no direction, no Doppler.
    #[must_use]
    pub fn head_relative(volume: f32) -> Self {
        Self {
            distance_gain: 1.0,
            cone_gain: 1.0,
            gain: volume,
            doppler: 1.0,
            head_relative: true,
            ..Self::default()
        }
    }

    /// Whether the source contributes any signal.
    #[must_use]
    pub fn is_audible(&self) -> bool {
        self.gain > 0.0
    }
}

/// Per-source direction, distance and Doppler computation.
#[derive(Debug, Clone)]
pub struct BinauralSpatializer {
    speed_of_sound: f32,
    doppler_enabled: bool,
    doppler_factor: f32,
    max_playback_rate: f32,
}

impl Default for BinauralSpatializer {
    fn default() -> Self {
        Self::new(&SpatialConfig::default())
    }
}

impl BinauralSpatializer {
    /// Creates a spatializer from the engine configuration.
    #[must_use]
    pub fn new(config: &SpatialConfig) -> Self {
        Self {
            speed_of_sound: config.speed_of_sound.max(1.0),
            doppler_enabled: config.doppler_enabled,
            doppler_factor: config.doppler_factor,
            max_playback_rate: config.max_playback_rate.max(1.0),
        }
    }

    /// Enable or disable Doppler.
    pub fn set_doppler_enabled(&mut self, enabled: bool) {
        self.doppler_enabled = enabled;
    }

    /// Doppler factor `(c + vL.u k) / (c + vS.u k)` where `u` is the unit
    /// vector from listener to source. `1.0` when disabled or when `u` is
    /// undefined.
    #[must_use]
    pub fn doppler(&self, listener_velocity: Vec3, source_velocity: Vec3, to_source: Vec3) -> f32 {
        if !self.doppler_enabled {
            return 1.0;
        }
        let Some(u) = to_source.try_normalize() else {
            return 1.0;
        };
        let c = self.speed_of_sound;
        let k = self.doppler_factor;
        let numerator = c + listener_velocity.dot(u) * k;
        // A source at or beyond the speed of sound would divide by ~0.
        let denominator = (c + source_velocity.dot(u) * k).max(c * 0.01);
        (numerator / denominator).clamp(1.0 / self.max_playback_rate, self.max_playback_rate)
    }

    /// Computes the spatial parameters of `source` for the current listener.
    #[must_use]
    pub fn update(
        &self,
        source: &SpatialAudioSource,
        listener: &ListenerState,
        hrtf: Option<&HrtfTable>,
    ) -> SpatialParams {
        let desc = source.desc();
        if desc.head_relative {
            return SpatialParams::head_relative(desc.volume);
        }

        let offset = desc.position - listener.position();
        let distance = offset.length();
        let local = listener.to_local(offset);
        let (azimuth, elevation) = direction_angles(local);

        let distance_gain = distance_gain(distance, desc.max_distance, desc.rolloff);
        let cone_gain = cone_gain(&desc.cone, desc.orientation, -offset);
        let doppler = if distance < MIN_DISTANCE {
            1.0
        } else {
            self.doppler(listener.velocity(), desc.velocity, offset)
        };

        let hrir = hrtf.and_then(|table| table.lookup(azimuth, elevation));
        let itd = if hrir.is_some() {
            woodworth_itd(azimuth, elevation, self.speed_of_sound)
        } else {
            0.0
        };

        SpatialParams {
            distance,
            azimuth,
            elevation,
            distance_gain,
            cone_gain,
            gain: distance_gain * cone_gain * desc.volume,
            doppler,
            itd,
            pan: azimuth.to_radians().sin(),
            hrir,
            head_relative: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerPose;
    use crate::source::{SourceDesc, SourceRegistry};
    use proptest::prelude::*;

    fn source_at(position: Vec3, desc: SourceDesc) -> (SourceRegistry, cosmos_common::SourceId) {
        let mut registry = SourceRegistry::new();
        let id = registry.register(desc.at(position)).unwrap();
        (registry, id)
    }

    #[test]
    fn test_gain_at_zero_distance() {
        assert!((distance_gain(0.0, 100.0, 1.0) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_gain_at_max_distance() {
        assert!(distance_gain(100.0, 100.0, 1.0).abs() < f32::EPSILON);
        assert!(distance_gain(250.0, 100.0, 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_azimuth_conventions() {
        let (az, el) = direction_angles(Vec3::new(1.0, 0.0, 0.0));
        assert!((az - 90.0).abs() < 1e-4);
        assert!(el.abs() < 1e-4);
        let (az, _) = direction_angles(Vec3::new(0.0, 0.0, -1.0));
        assert!((az - 180.0).abs() < 1e-4);
        let (az, _) = direction_angles(Vec3::new(-0.0, 0.0, -1.0));
        assert!((az - 180.0).abs() < 1e-4, "-180 folds to 180");
        let (_, el) = direction_angles(Vec3::new(0.0, 1.0, 1.0));
        assert!((el - 45.0).abs() < 1e-4);
    }

    #[test]
    fn test_doppler_directions() {
        let spatializer = BinauralSpatializer::default();
        let to_source = Vec3::new(0.0, 0.0, 10.0);
        let approaching = spatializer.doppler(Vec3::ZERO, Vec3::new(0.0, 0.0, -20.0), to_source);
        let receding = spatializer.doppler(Vec3::ZERO, Vec3::new(0.0, 0.0, 20.0), to_source);
        let tangential = spatializer.doppler(Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0), to_source);
        assert!(approaching > 1.0);
        assert!(receding < 1.0);
        assert!((tangential - 1.0).abs() < 1e-6);

        let listener_closing =
            spatializer.doppler(Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO, to_source);
        assert!(listener_closing > 1.0);
    }

    #[test]
    fn test_doppler_disabled_and_clamped() {
        let mut spatializer = BinauralSpatializer::default();
        let supersonic = spatializer.doppler(Vec3::ZERO, Vec3::new(0.0, 0.0, -1000.0), Vec3::Z);
        assert!((supersonic - 4.0).abs() < 1e-4);
        spatializer.set_doppler_enabled(false);
        let still = spatializer.doppler(Vec3::ZERO, Vec3::new(0.0, 0.0, -20.0), Vec3::Z);
        assert!((still - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_cone_attenuation() {
        let cone = SoundCone::new(90.0, 180.0, 0.25);
        assert!((cone_gain(&cone, Vec3::Z, Vec3::Z) - 1.0).abs() < 1e-6);
        assert!((cone_gain(&cone, Vec3::Z, -Vec3::Z) - 0.25).abs() < 1e-6);
        let edge = Vec3::new(1.0, 0.0, 1.0).normalize().lerp(Vec3::X, 0.5);
        let halfway = cone_gain(&cone, Vec3::Z, edge);
        assert!(halfway < 1.0 && halfway > 0.25);
        assert!((cone_gain(&SoundCone::OMNI, Vec3::Z, -Vec3::Z) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_itd_sign_and_magnitude() {
        let right = woodworth_itd(90.0, 0.0, 343.0);
        let left = woodworth_itd(-90.0, 0.0, 343.0);
        assert!(right > 0.0);
        assert!((right + left).abs() < 1e-9);
        assert!(right < 0.0007);
        assert!(woodworth_itd(0.0, 0.0, 343.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_without_table_pans() {
        let (registry, id) = source_at(Vec3::new(10.0, 0.0, 0.0), SourceDesc::new("x"));
        let listener = ListenerState::default();
        let params =
            BinauralSpatializer::default().update(registry.get(id).unwrap(), &listener, None);
        assert!(params.hrir.is_none());
        assert!(params.itd.abs() < f32::EPSILON);
        assert!((params.pan - 1.0).abs() < 1e-5);
        assert!((params.gain - 0.9).abs() < 1e-5);
        let (l, r) = constant_power_pan(params.pan);
        assert!(r > l);
        assert!((l * l + r * r - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_update_with_table_and_rotation() {
        let table = HrtfTable::generate(8_000, 16).unwrap();
        let (registry, id) = source_at(Vec3::new(0.0, 0.0, -10.0), SourceDesc::new("x"));
        let mut listener = ListenerState::default();
        listener.apply(ListenerPose::looking_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), Vec3::Y));
        let params = BinauralSpatializer::default().update(
            registry.get(id).unwrap(),
            &listener,
            Some(&table),
        );
        assert!(params.azimuth.abs() < 1e-3, "source is straight ahead after turning");
        let (key, _) = params.hrir.unwrap();
        assert_eq!(key, HrtfKey::new(0.0, 0.0));
    }

    #[test]
    fn test_head_relative_skips_spatialization() {
        let (registry, id) = source_at(
            Vec3::splat(500.0),
            SourceDesc::new("bed").head_relative(true).with_volume(0.4),
        );
        let params = BinauralSpatializer::default().update(
            registry.get(id).unwrap(),
            &ListenerState::default(),
            None,
        );
        assert!(params.head_relative);
        assert!((params.gain - 0.4).abs() < f32::EPSILON);
        assert!((params.doppler - 1.0).abs() < f32::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_attenuation_monotonic(
            a in 0.0f32..200.0,
            b in 0.0f32..200.0,
            max in 1.0f32..150.0,
            rolloff in 0.01f32..8.0,
        ) {
            let (near, far) = if a <= b { (a, b) } else { (b, a) };
            let g_near = distance_gain(near, max, rolloff);
            let g_far = distance_gain(far, max, rolloff);
            prop_assert!(g_near + 1e-6 >= g_far);
            prop_assert!((distance_gain(0.0, max, rolloff) - 1.0).abs() < 1e-6);
            prop_assert!(distance_gain(max + near, max, rolloff) == 0.0);
            prop_assert!((0.0..=1.0).contains(&g_near));
        }
    }
}
