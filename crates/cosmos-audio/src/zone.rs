//! Acoustic zones and zone blending.
//!
//! A zone is a region of space with an acoustic character. Every tick the
//! engine collects the zones that contain the listener or lie within their
//! fade distance of it, orders them by priority, and blends their effect
//! parameters into a single [`BlendedEffects`] for the shared effect chain.

use cosmos_common::{IdAllocator, ZoneGeometry, ZoneId};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AudioError, AudioResult};
use crate::features::FeatureKind;

/// Room reverberation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    /// Normalized room size (0.0 - 1.0)
    pub room_size: f32,
    /// Decay time (RT60) in seconds
    pub decay: f32,
    /// High frequency damping of the reverb return (0.0 - 1.0)
    pub damping: f32,
    /// Reverb return level (0.0 - 1.0)
    pub wet_level: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            room_size: 0.3,
            decay: 1.5,
            damping: 0.5,
            wet_level: 0.0,
        }
    }
}

/// Biquad filter response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Passes frequencies below the cutoff.
    #[default]
    Lowpass,
    /// Passes frequencies above the cutoff.
    Highpass,
    /// Passes a band around the center frequency.
    Bandpass,
    /// Flat magnitude, phase shift around the center frequency.
    Allpass,
}

/// Zone tone filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Response shape
    pub kind: FilterKind,
    /// Cutoff or center frequency in Hz
    pub frequency: f32,
    /// Resonance
    pub q: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            kind: FilterKind::Lowpass,
            frequency: 20_000.0,
            q: std::f32::consts::FRAC_1_SQRT_2,
        }
    }
}

/// Waveshaping distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionParams {
    /// Drive amount (0.0 = clean, 1.0 = heavy)
    pub amount: f32,
    /// Oversampling factor: 1, 2 or 4
    pub oversample: u8,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self {
            amount: 0.0,
            oversample: 1,
        }
    }
}

/// Feedback echo.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayParams {
    /// Echo time in seconds
    pub time: f32,
    /// Feedback amount (0.0 - 0.95)
    pub feedback: f32,
    /// Echo level (0.0 - 1.0)
    pub wet_level: f32,
}

/// Modulation effect type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationKind {
    /// Slow modulated delay doubling.
    #[default]
    Chorus,
    /// Short modulated delay with feedback.
    Flanger,
    /// Sweeping allpass notches.
    Phaser,
    /// Periodic gain modulation.
    Tremolo,
}

/// Modulation effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationParams {
    /// Effect type
    pub kind: ModulationKind,
    /// LFO rate in Hz
    pub rate: f32,
    /// Effect depth (0.0 - 1.0)
    pub depth: f32,
}

impl Default for ModulationParams {
    fn default() -> Self {
        Self {
            kind: ModulationKind::Chorus,
            rate: 0.5,
            depth: 0.0,
        }
    }
}

/// Looping ambience that plays while a zone is a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbientSound {
    /// Payload reference handed to the loader
    pub payload: String,
    /// Base volume
    #[serde(default = "default_ambient_volume")]
    pub volume: f32,
    /// Feature scalar that modulates the bed
    #[serde(default)]
    pub feature: FeatureKind,
    /// Modulation strength
    #[serde(default)]
    pub reactivity: f32,
}

const fn default_ambient_volume() -> f32 {
    0.5
}

impl AmbientSound {
    /// Creates an ambience for `payload`.
    #[must_use]
    pub fn new(payload: impl Into<String>, volume: f32) -> Self {
        Self {
            payload: payload.into(),
            volume,
            feature: FeatureKind::Energy,
            reactivity: 0.0,
        }
    }

    /// Set the reactive feature and its strength.
    #[must_use]
    pub const fn reacting_to(mut self, feature: FeatureKind, reactivity: f32) -> Self {
        self.feature = feature;
        self.reactivity = reactivity;
        self
    }
}

/// The acoustic character of a zone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneProperties {
    /// Room reverberation
    pub reverb: ReverbParams,
    /// Tone filter
    pub filter: FilterParams,
    /// Distortion
    pub distortion: DistortionParams,
    /// Echo
    pub delay: DelayParams,
    /// Modulation
    pub modulation: ModulationParams,
    /// Optional ambient bed
    pub ambient: Option<AmbientSound>,
}

impl ZoneProperties {
    fn validate(&self, zone: &str) -> AudioResult<()> {
        let invalid = |reason: String| AudioError::InvalidZone {
            zone: zone.to_string(),
            reason,
        };
        let numbers = [
            ("reverb.room_size", self.reverb.room_size),
            ("reverb.decay", self.reverb.decay),
            ("reverb.damping", self.reverb.damping),
            ("reverb.wet_level", self.reverb.wet_level),
            ("filter.frequency", self.filter.frequency),
            ("filter.q", self.filter.q),
            ("distortion.amount", self.distortion.amount),
            ("delay.time", self.delay.time),
            ("delay.feedback", self.delay.feedback),
            ("delay.wet_level", self.delay.wet_level),
            ("modulation.rate", self.modulation.rate),
            ("modulation.depth", self.modulation.depth),
        ];
        for (name, value) in numbers {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{name} must be finite and >= 0, got {value}")));
            }
        }
        if self.filter.frequency <= 0.0 || self.filter.q <= 0.0 {
            return Err(invalid("filter frequency and q must be positive".into()));
        }
        if !matches!(self.distortion.oversample, 1 | 2 | 4) {
            return Err(invalid(format!(
                "distortion oversample must be 1, 2 or 4, got {}",
                self.distortion.oversample
            )));
        }
        if let Some(ambient) = &self.ambient {
            let volume_ok = ambient.volume.is_finite() && ambient.volume >= 0.0;
            if !(volume_ok && ambient.reactivity.is_finite()) {
                return Err(invalid("ambient volume must be >= 0 and reactivity finite".into()));
            }
        }
        Ok(())
    }
}

/// Creation parameters for a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDesc {
    /// Display name
    pub name: String,
    /// Region of space
    pub geometry: ZoneGeometry,
    /// Blend priority; higher wins, must be >= 0
    #[serde(default)]
    pub priority: i32,
    /// Distance outside the geometry within which the zone still applies
    #[serde(default)]
    pub fade_distance: f32,
    /// Inactive zones are never candidates
    #[serde(default = "default_active")]
    pub active: bool,
    /// Acoustic character
    #[serde(default)]
    pub properties: ZoneProperties,
}

const fn default_active() -> bool {
    true
}

impl ZoneDesc {
    /// Creates an active zone description with default properties.
    #[must_use]
    pub fn new(name: impl Into<String>, geometry: ZoneGeometry) -> Self {
        Self {
            name: name.into(),
            geometry,
            priority: 0,
            fade_distance: 0.0,
            active: true,
            properties: ZoneProperties::default(),
        }
    }

    /// Set priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set fade distance.
    #[must_use]
    pub const fn with_fade_distance(mut self, fade_distance: f32) -> Self {
        self.fade_distance = fade_distance;
        self
    }

    /// Set properties.
    #[must_use]
    pub fn with_properties(mut self, properties: ZoneProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Set the active flag.
    #[must_use]
    pub const fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    fn validate(&self) -> AudioResult<()> {
        self.geometry
            .validate()
            .map_err(|source| AudioError::InvalidGeometry {
                zone: self.name.clone(),
                source,
            })?;
        if self.priority < 0 {
            return Err(AudioError::InvalidZone {
                zone: self.name.clone(),
                reason: format!("priority must be >= 0, got {}", self.priority),
            });
        }
        if !(self.fade_distance.is_finite() && self.fade_distance >= 0.0) {
            return Err(AudioError::InvalidZone {
                zone: self.name.clone(),
                reason: format!("fade distance must be >= 0, got {}", self.fade_distance),
            });
        }
        self.properties.validate(&self.name)
    }
}

/// A registered zone.
#[derive(Debug, Clone, PartialEq)]
pub struct AcousticZone {
    id: ZoneId,
    name: String,
    geometry: ZoneGeometry,
    priority: u32,
    fade_distance: f32,
    active: bool,
    properties: ZoneProperties,
}

impl AcousticZone {
    /// Zone id.
    #[must_use]
    pub const fn id(&self) -> ZoneId {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region of space. Fixed at creation.
    #[must_use]
    pub const fn geometry(&self) -> &ZoneGeometry {
        &self.geometry
    }

    /// Blend priority.
    #[must_use]
    pub const fn priority(&self) -> u32 {
        self.priority
    }

    /// Fade distance.
    #[must_use]
    pub const fn fade_distance(&self) -> f32 {
        self.fade_distance
    }

    /// Whether the zone can become a candidate.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Acoustic character.
    #[must_use]
    pub const fn properties(&self) -> &ZoneProperties {
        &self.properties
    }

    /// Distance from `point` if the zone is a candidate there.
    fn candidate_distance(&self, point: Vec3) -> Option<f32> {
        if !self.active {
            return None;
        }
        if self.geometry.contains(point) {
            return Some(0.0);
        }
        let distance = self.geometry.distance_to(point);
        (distance <= self.fade_distance).then_some(distance)
    }
}

/// A candidate zone with its blend weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveZone {
    /// Zone id
    pub id: ZoneId,
    /// Normalized blend weight
    pub weight: f32,
    /// Zone priority
    pub priority: u32,
    /// Distance from the query point to the geometry; zero inside
    pub distance: f32,
}

/// Zone effect parameters after blending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendedEffects {
    /// Room reverberation
    pub reverb: ReverbParams,
    /// Tone filter
    pub filter: FilterParams,
    /// Distortion
    pub distortion: DistortionParams,
    /// Echo
    pub delay: DelayParams,
    /// Modulation
    pub modulation: ModulationParams,
}

impl From<&ZoneProperties> for BlendedEffects {
    fn from(properties: &ZoneProperties) -> Self {
        Self {
            reverb: properties.reverb,
            filter: properties.filter,
            distortion: properties.distortion,
            delay: properties.delay,
            modulation: properties.modulation,
        }
    }
}

/// Blends weighted zone properties, highest priority first.
///
/// Numeric fields are weighted sums. The filter kind, modulation kind and
/// distortion oversampling come from the first entry. Returns `None` for an
/// empty slice.
#[must_use]
pub fn blend(weighted: &[(&ZoneProperties, f32)]) -> Option<BlendedEffects> {
    let ((top, _), _) = weighted.split_first()?;
    let mut out = BlendedEffects::from(*top);
    let sum = |field: fn(&ZoneProperties) -> f32| -> f32 {
        weighted.iter().map(|(p, w)| field(p) * w).sum()
    };
    out.reverb.room_size = sum(|p| p.reverb.room_size);
    out.reverb.decay = sum(|p| p.reverb.decay);
    out.reverb.damping = sum(|p| p.reverb.damping);
    out.reverb.wet_level = sum(|p| p.reverb.wet_level);
    out.filter.frequency = sum(|p| p.filter.frequency);
    out.filter.q = sum(|p| p.filter.q);
    out.distortion.amount = sum(|p| p.distortion.amount);
    out.delay.time = sum(|p| p.delay.time);
    out.delay.feedback = sum(|p| p.delay.feedback);
    out.delay.wet_level = sum(|p| p.delay.wet_level);
    out.modulation.rate = sum(|p| p.modulation.rate);
    out.modulation.depth = sum(|p| p.modulation.depth);
    Some(out)
}

/// Owns every zone. Iteration follows insertion order.
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: Vec<AcousticZone>,
    ids: IdAllocator,
}

impl ZoneRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a zone.
    pub fn create(&mut self, desc: ZoneDesc) -> AudioResult<ZoneId> {
        desc.validate()?;
        let id: ZoneId = self.ids.next_id();
        debug!(
            %id,
            name = %desc.name,
            shape = desc.geometry.shape_name(),
            priority = desc.priority,
            "zone created"
        );
        self.zones.push(AcousticZone {
            id,
            name: desc.name,
            geometry: desc.geometry,
            priority: desc.priority.unsigned_abs(),
            fade_distance: desc.fade_distance,
            active: desc.active,
            properties: desc.properties,
        });
        Ok(id)
    }

    /// Hands out an id without registering anything.
    pub(crate) fn reserve_id(&mut self) -> ZoneId {
        self.ids.next_id()
    }

    /// Removes a zone. Unknown ids are ignored.
    pub fn remove(&mut self, id: ZoneId) -> Option<AcousticZone> {
        let index = self.zones.iter().position(|zone| zone.id == id)?;
        debug!(%id, "zone removed");
        Some(self.zones.remove(index))
    }

    /// Enables or disables a zone.
    pub fn set_active(&mut self, id: ZoneId, active: bool) -> AudioResult<()> {
        let zone = self
            .zones
            .iter_mut()
            .find(|zone| zone.id == id)
            .ok_or(AudioError::ZoneNotFound(id))?;
        zone.active = active;
        Ok(())
    }

    /// Looks up a zone.
    #[must_use]
    pub fn get(&self, id: ZoneId) -> Option<&AcousticZone> {
        self.zones.iter().find(|zone| zone.id == id)
    }

    /// Iterates over zones in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &AcousticZone> {
        self.zones.iter()
    }

    /// Number of zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Returns true if there are no zones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Candidate zones at `point`, highest priority first, with weights
    /// `(priority + 1) / sum(priority + 1)`. Ties keep insertion order.
    #[must_use]
    pub fn active_zones_for(&self, point: Vec3) -> Vec<ActiveZone> {
        let mut candidates: Vec<ActiveZone> = self
            .zones
            .iter()
            .filter_map(|zone| {
                zone.candidate_distance(point).map(|distance| ActiveZone {
                    id: zone.id,
                    weight: 0.0,
                    priority: zone.priority,
                    distance,
                })
            })
            .collect();
        // sort_by is stable
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        let total: f64 = candidates
            .iter()
            .map(|zone| f64::from(zone.priority) + 1.0)
            .sum();
        for zone in &mut candidates {
            zone.weight = ((f64::from(zone.priority) + 1.0) / total) as f32;
        }
        candidates
    }

    /// Blends the properties of `active` zones.
    #[must_use]
    pub fn blend(&self, active: &[ActiveZone]) -> Option<BlendedEffects> {
        let weighted: Vec<(&ZoneProperties, f32)> = active
            .iter()
            .filter_map(|zone| self.get(zone.id).map(|z| (&z.properties, zone.weight)))
            .collect();
        blend(&weighted)
    }
}
