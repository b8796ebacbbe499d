//! Spatial sound sources and their registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use cosmos_common::{IdAllocator, SourceId, ZoneId};
use futures::channel::oneshot;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SpatialConfig;
use crate::error::{AudioError, AudioResult};
use crate::loader::AudioPayload;
use crate::voice::SourceVoice;

/// Audio category for volume mixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCategory {
    /// Master volume (affects all audio).
    Master,
    /// Background music.
    Music,
    /// Sound effects.
    #[default]
    Sfx,
    /// Ambient/environmental sounds.
    Ambient,
    /// UI sounds.
    Ui,
    /// Voice/dialogue.
    Voice,
}

impl AudioCategory {
    /// Get the default volume for this category.
    #[must_use]
    pub const fn default_volume(&self) -> f32 {
        match self {
            Self::Master | Self::Sfx | Self::Voice => 1.0,
            Self::Music => 0.7,
            Self::Ambient => 0.5,
            Self::Ui => 0.8,
        }
    }
}

/// Volume settings for audio categories.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSettings {
    volumes: AHashMap<AudioCategory, f32>,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self::from_config(&SpatialConfig::default())
    }
}

impl VolumeSettings {
    /// Builds category volumes from the engine configuration.
    #[must_use]
    pub fn from_config(config: &SpatialConfig) -> Self {
        let mut settings = Self {
            volumes: AHashMap::new(),
        };
        settings.set(AudioCategory::Master, config.master_volume);
        settings.set(AudioCategory::Music, config.music_volume);
        settings.set(AudioCategory::Sfx, config.sfx_volume);
        settings.set(AudioCategory::Ambient, config.ambient_volume);
        settings.set(AudioCategory::Voice, config.voice_volume);
        settings.set(AudioCategory::Ui, AudioCategory::Ui.default_volume());
        settings
    }

    /// Get volume for a category.
    #[must_use]
    pub fn get(&self, category: AudioCategory) -> f32 {
        self.volumes
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_volume())
    }

    /// Set volume for a category.
    pub fn set(&mut self, category: AudioCategory, volume: f32) {
        let volume = if volume.is_finite() { volume } else { 0.0 };
        self.volumes.insert(category, volume.clamp(0.0, 1.0));
    }

    /// Get effective volume for a category (includes master).
    #[must_use]
    pub fn effective(&self, category: AudioCategory) -> f32 {
        if category == AudioCategory::Master {
            return self.get(AudioCategory::Master);
        }
        self.get(AudioCategory::Master) * self.get(category)
    }
}

/// Playback state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Not playing; playhead at zero.
    #[default]
    Stopped,
    /// Producing audio.
    Playing,
    /// Halted; playhead retained.
    Paused,
}

impl PlaybackState {
    /// Check if currently playing.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Payload load state of a source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    /// No load has been attempted.
    #[default]
    Unloaded,
    /// A load is in flight.
    Loading,
    /// The payload is resident.
    Loaded,
    /// The last load failed with the given message.
    Failed(String),
}

/// Directional emission cone. A full 360 degree inner angle is omnidirectional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundCone {
    /// Full angle of unattenuated emission, in degrees
    pub inner_angle: f32,
    /// Full angle beyond which `outer_gain` applies, in degrees
    pub outer_angle: f32,
    /// Gain outside the outer angle (0.0 - 1.0)
    pub outer_gain: f32,
}

impl Default for SoundCone {
    fn default() -> Self {
        Self::OMNI
    }
}

impl SoundCone {
    /// Omnidirectional emission.
    pub const OMNI: Self = Self {
        inner_angle: 360.0,
        outer_angle: 360.0,
        outer_gain: 0.0,
    };

    /// Creates a cone.
    #[must_use]
    pub const fn new(inner_angle: f32, outer_angle: f32, outer_gain: f32) -> Self {
        Self {
            inner_angle,
            outer_angle,
            outer_gain,
        }
    }

    /// Returns true if the cone never attenuates.
    #[must_use]
    pub fn is_omni(&self) -> bool {
        self.inner_angle >= 360.0
    }

    fn validate(&self) -> AudioResult<()> {
        let angles_ok = (0.0..=360.0).contains(&self.inner_angle)
            && (0.0..=360.0).contains(&self.outer_angle)
            && self.inner_angle <= self.outer_angle;
        if !angles_ok {
            return Err(AudioError::InvalidSource {
                field: "cone",
                reason: format!(
                    "angles must satisfy 0 <= inner ({}) <= outer ({}) <= 360",
                    self.inner_angle, self.outer_angle
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.outer_gain) {
            return Err(AudioError::InvalidSource {
                field: "cone",
                reason: format!("outer gain {} outside 0..=1", self.outer_gain),
            });
        }
        Ok(())
    }
}

/// Registration parameters for a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDesc {
    /// Opaque payload reference handed to the loader
    pub payload: String,
    /// World position
    pub position: Vec3,
    /// World velocity in units per second
    pub velocity: Vec3,
    /// Cone axis in world space
    pub orientation: Vec3,
    /// Source volume (>= 0)
    pub volume: f32,
    /// Restart at the end of the payload
    pub looping: bool,
    /// Distance at which the source becomes inaudible (> 0)
    pub max_distance: f32,
    /// Attenuation curve exponent (>= 0)
    pub rolloff: f32,
    /// Emission cone
    pub cone: SoundCone,
    /// Mixing category
    pub category: AudioCategory,
    /// Render without spatialization, as if attached to the listener
    pub head_relative: bool,
}

impl Default for SourceDesc {
    fn default() -> Self {
        Self {
            payload: String::new(),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Vec3::Z,
            volume: 1.0,
            looping: false,
            max_distance: 100.0,
            rolloff: 1.0,
            cone: SoundCone::OMNI,
            category: AudioCategory::Sfx,
            head_relative: false,
        }
    }
}

impl SourceDesc {
    /// Creates a description for the given payload.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Set position.
    #[must_use]
    pub const fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Set velocity.
    #[must_use]
    pub const fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Set looping.
    #[must_use]
    pub const fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Set attenuation range and curve.
    #[must_use]
    pub const fn with_attenuation(mut self, max_distance: f32, rolloff: f32) -> Self {
        self.max_distance = max_distance;
        self.rolloff = rolloff;
        self
    }

    /// Set emission cone and its axis.
    #[must_use]
    pub const fn with_cone(mut self, cone: SoundCone, orientation: Vec3) -> Self {
        self.cone = cone;
        self.orientation = orientation;
        self
    }

    /// Set category.
    #[must_use]
    pub const fn with_category(mut self, category: AudioCategory) -> Self {
        self.category = category;
        self
    }

    /// Mark as head-relative.
    #[must_use]
    pub const fn head_relative(mut self, head_relative: bool) -> Self {
        self.head_relative = head_relative;
        self
    }

    /// Checks every numeric parameter.
    pub fn validate(&self) -> AudioResult<()> {
        if !(self.max_distance.is_finite() && self.max_distance > 0.0) {
            return Err(AudioError::InvalidSource {
                field: "max_distance",
                reason: format!("must be positive, got {}", self.max_distance),
            });
        }
        if !(self.rolloff.is_finite() && self.rolloff >= 0.0) {
            return Err(AudioError::InvalidSource {
                field: "rolloff",
                reason: format!("must be non-negative, got {}", self.rolloff),
            });
        }
        validate_volume(self.volume)?;
        if !(self.position.is_finite() && self.velocity.is_finite() && self.orientation.is_finite())
        {
            return Err(AudioError::InvalidSource {
                field: "position",
                reason: "position, velocity and orientation must be finite".into(),
            });
        }
        self.cone.validate()
    }
}

pub(crate) fn validate_volume(volume: f32) -> AudioResult<()> {
    if volume.is_finite() && volume >= 0.0 {
        Ok(())
    } else {
        Err(AudioError::InvalidSource {
            field: "volume",
            reason: format!("must be non-negative, got {volume}"),
        })
    }
}

/// A registered emitter.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialAudioSource {
    id: SourceId,
    desc: SourceDesc,
    playback: PlaybackState,
    load: LoadState,
    current_time: f64,
    duration: f64,
}

impl SpatialAudioSource {
    fn new(id: SourceId, desc: SourceDesc) -> Self {
        Self {
            id,
            desc,
            playback: PlaybackState::Stopped,
            load: LoadState::Unloaded,
            current_time: 0.0,
            duration: 0.0,
        }
    }

    /// Source id.
    #[must_use]
    pub const fn id(&self) -> SourceId {
        self.id
    }

    /// Registration parameters, including runtime setter changes.
    #[must_use]
    pub const fn desc(&self) -> &SourceDesc {
        &self.desc
    }

    /// World position.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.desc.position
    }

    /// World velocity.
    #[must_use]
    pub const fn velocity(&self) -> Vec3 {
        self.desc.velocity
    }

    /// Playback state.
    #[must_use]
    pub const fn playback_state(&self) -> PlaybackState {
        self.playback
    }

    /// Load state.
    #[must_use]
    pub const fn load_state(&self) -> &LoadState {
        &self.load
    }

    /// Playhead in seconds, within `[0, duration]`.
    #[must_use]
    pub const fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Payload duration in seconds; zero until loaded.
    #[must_use]
    pub const fn duration(&self) -> f64 {
        self.duration
    }

    pub(crate) fn desc_mut(&mut self) -> &mut SourceDesc {
        &mut self.desc
    }

    pub(crate) fn set_load_state(&mut self, load: LoadState) {
        self.load = load;
    }

    pub(crate) fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        self.current_time = self.current_time.clamp(0.0, self.duration);
    }

    pub(crate) fn start(&mut self) {
        self.playback = PlaybackState::Playing;
    }

    /// Playing → Paused. Returns false if nothing changed.
    pub(crate) fn pause(&mut self) -> bool {
        if self.playback == PlaybackState::Playing {
            self.playback = PlaybackState::Paused;
            true
        } else {
            false
        }
    }

    /// Playing/Paused → Stopped, rewinding the playhead.
    pub(crate) fn stop(&mut self) {
        self.playback = PlaybackState::Stopped;
        self.current_time = 0.0;
    }

    pub(crate) fn seek(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds } else { 0.0 };
        self.current_time = seconds.clamp(0.0, self.duration);
    }

    /// Moves the playhead to `seconds`, wrapping for looping sources.
    pub(crate) fn set_playhead(&mut self, seconds: f64) {
        if self.duration <= 0.0 {
            self.current_time = 0.0;
        } else if self.desc.looping {
            self.current_time = seconds.rem_euclid(self.duration);
        } else {
            self.current_time = seconds.clamp(0.0, self.duration);
        }
    }
}

/// Registry bookkeeping for one source.
#[derive(Debug)]
pub(crate) struct SourceEntry {
    pub source: SpatialAudioSource,
    pub payload: Option<Arc<AudioPayload>>,
    pub voice: Option<SourceVoice>,
    pub waiters: Vec<oneshot::Sender<AudioResult<()>>>,
    pub start_pending: bool,
    pub generation: u64,
    pub owner: Option<ZoneId>,
}

impl SourceEntry {
    /// Resolves and clears every waiting ticket.
    pub fn resolve_waiters(&mut self, result: &AudioResult<()>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Owns every registered source. Iteration follows registration order.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    entries: BTreeMap<SourceId, SourceEntry>,
    ids: IdAllocator,
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a source.
    pub fn register(&mut self, desc: SourceDesc) -> AudioResult<SourceId> {
        self.register_owned(desc, None)
    }

    pub(crate) fn register_owned(
        &mut self,
        desc: SourceDesc,
        owner: Option<ZoneId>,
    ) -> AudioResult<SourceId> {
        desc.validate()?;
        let id: SourceId = self.ids.next_id();
        debug!(%id, payload = %desc.payload, category = ?desc.category, "source registered");
        self.entries.insert(
            id,
            SourceEntry {
                source: SpatialAudioSource::new(id, desc),
                payload: None,
                voice: None,
                waiters: Vec::new(),
                start_pending: false,
                generation: 0,
                owner,
            },
        );
        Ok(id)
    }

    /// Hands out an id without registering anything.
    pub(crate) fn reserve_id(&mut self) -> SourceId {
        self.ids.next_id()
    }

    pub(crate) fn remove(&mut self, id: SourceId) -> Option<SourceEntry> {
        let entry = self.entries.remove(&id);
        if entry.is_some() {
            debug!(%id, "source removed");
        }
        entry
    }

    /// Looks up a source.
    #[must_use]
    pub fn get(&self, id: SourceId) -> Option<&SpatialAudioSource> {
        self.entries.get(&id).map(|entry| &entry.source)
    }

    /// Returns true if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: SourceId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn entry_mut(&mut self, id: SourceId) -> Option<&mut SourceEntry> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut SourceEntry> {
        self.entries.values_mut()
    }

    /// Iterates over sources in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SpatialAudioSource> {
        self.entries.values().map(|entry| &entry.source)
    }

    /// Ids of every source owned by `zone`.
    pub(crate) fn owned_by(&self, zone: ZoneId) -> Vec<SourceId> {
        self.entries
            .values()
            .filter(|entry| entry.owner == Some(zone))
            .map(|entry| entry.source.id)
            .collect()
    }

    /// Number of sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of sources currently playing.
    #[must_use]
    pub fn playing_count(&self) -> usize {
        self.iter()
            .filter(|source| source.playback_state().is_active())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_default_volumes() {
        let volumes = VolumeSettings::default();
        assert!((volumes.get(AudioCategory::Music) - 0.7).abs() < f32::EPSILON);
        assert!((volumes.effective(AudioCategory::Ambient) - 0.5).abs() < f32::EPSILON);

        let mut volumes = volumes;
        volumes.set(AudioCategory::Master, 0.5);
        volumes.set(AudioCategory::Sfx, 4.0);
        assert!((volumes.effective(AudioCategory::Sfx) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_register_validates() {
        let mut registry = SourceRegistry::new();
        let bad = [
            SourceDesc::new("a").with_attenuation(0.0, 1.0),
            SourceDesc::new("a").with_attenuation(10.0, -1.0),
            SourceDesc::new("a").with_volume(-0.1),
            SourceDesc::new("a").with_cone(SoundCone::new(90.0, 45.0, 0.2), Vec3::Z),
            SourceDesc::new("a").with_cone(SoundCone::new(45.0, 90.0, 1.5), Vec3::Z),
            SourceDesc::new("a").at(Vec3::new(f32::NAN, 0.0, 0.0)),
        ];
        for desc in bad {
            assert!(matches!(
                registry.register(desc),
                Err(AudioError::InvalidSource { .. })
            ));
        }
        assert!(registry.is_empty());

        let id = registry.register(SourceDesc::new("ok")).unwrap();
        assert_eq!(registry.get(id).unwrap().playback_state(), PlaybackState::Stopped);
        assert_eq!(registry.get(id).unwrap().load_state(), &LoadState::Unloaded);
    }

    #[test]
    fn test_transitions() {
        let mut source = SpatialAudioSource::new(SourceId::from_raw(1), SourceDesc::new("x"));
        source.set_duration(10.0);

        assert!(!source.pause(), "pause on a stopped source is a no-op");
        assert_eq!(source.playback_state(), PlaybackState::Stopped);

        source.start();
        source.seek(4.0);
        assert!(source.pause());
        assert!((source.current_time() - 4.0).abs() < 1e-9);

        source.stop();
        assert_eq!(source.playback_state(), PlaybackState::Stopped);
        assert!(source.current_time().abs() < 1e-9);
    }

    #[test]
    fn test_playhead_clamped() {
        let mut source = SpatialAudioSource::new(SourceId::from_raw(1), SourceDesc::new("x"));
        source.set_duration(2.0);
        source.seek(-3.0);
        assert!(source.current_time().abs() < 1e-9);
        source.seek(9.0);
        assert!((source.current_time() - 2.0).abs() < 1e-9);

        source.desc_mut().looping = true;
        source.set_playhead(5.0);
        assert!((source.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_iteration_in_registration_order() {
        let mut registry = SourceRegistry::new();
        let ids: Vec<_> = (0..4)
            .map(|i| registry.register(SourceDesc::new(format!("p{i}"))).unwrap())
            .collect();
        registry.remove(ids[1]);
        let seen: Vec<_> = registry.iter().map(SpatialAudioSource::id).collect();
        assert_eq!(seen, vec![ids[0], ids[2], ids[3]]);
    }
}
