//! Procedural room impulse responses.
//!
//! A response is the sum of two parts:
//! - **Early reflections**: impulses at multiples of `dimension / c` for
//!   each of the three room axes, each decaying exponentially with time.
//! - **Late tail**: one-pole filtered noise with amplitude
//!   `(1 - intensity)^(t * sample_rate)`.
//!
//! The whole response is scaled by a room-volume factor so larger rooms sound
//! stronger. Building one is expensive, so [`ReverbSynthesizer`] caches the
//! last response and only rebuilds when the room or intensity changes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{DEFAULT_REVERB_DURATION, SPEED_OF_SOUND};

/// Smallest room edge produced by [`RoomDimensions::from_room_size`].
pub const MIN_ROOM_EDGE: f32 = 4.0;

/// Largest room edge produced by [`RoomDimensions::from_room_size`].
pub const MAX_ROOM_EDGE: f32 = 120.0;

/// Edge length of the room whose volume factor is 1.
pub const REFERENCE_ROOM_EDGE: f32 = 20.0;

/// Per-second exponential decay rate of early reflections.
const EARLY_DECAY_RATE: f32 = 6.0;

/// Peak level of the first reflections.
const EARLY_LEVEL: f32 = 0.6;

/// Level of the noise tail before the envelope.
const TAIL_LEVEL: f32 = 0.35;

/// Relative parameter change below which the cached response is reused.
const CACHE_EPSILON: f32 = 1e-4;

/// Room size along the three axes, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoomDimensions {
    /// Extent along X
    pub width: f32,
    /// Extent along Y
    pub height: f32,
    /// Extent along Z
    pub depth: f32,
}

impl Default for RoomDimensions {
    fn default() -> Self {
        Self::new(REFERENCE_ROOM_EDGE, REFERENCE_ROOM_EDGE * 0.5, REFERENCE_ROOM_EDGE * 0.8)
    }
}

impl RoomDimensions {
    /// Creates room dimensions; each edge is kept at least 0.5 m.
    #[must_use]
    pub fn new(width: f32, height: f32, depth: f32) -> Self {
        let edge = |v: f32| if v.is_finite() { v.max(0.5) } else { 0.5 };
        Self {
            width: edge(width),
            height: edge(height),
            depth: edge(depth),
        }
    }

    /// Maps a normalized zone room size (0.0 - 1.0) to a shoebox room.
    #[must_use]
    pub fn from_room_size(room_size: f32) -> Self {
        let t = if room_size.is_finite() {
            room_size.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let edge = MIN_ROOM_EDGE + (MAX_ROOM_EDGE - MIN_ROOM_EDGE) * t;
        Self::new(edge, edge * 0.5, edge * 0.8)
    }

    /// Room volume in cubic meters.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.width * self.height * self.depth
    }

    /// Amplitude multiplier relative to the reference room, in `[0.25, 4]`.
    #[must_use]
    pub fn volume_factor(&self) -> f32 {
        (self.volume().cbrt() / REFERENCE_ROOM_EDGE).clamp(0.25, 4.0)
    }

    fn axes(&self) -> [f32; 3] {
        [self.width, self.height, self.depth]
    }

    fn approx_eq(&self, other: &Self) -> bool {
        self.axes()
            .iter()
            .zip(other.axes())
            .all(|(a, b)| (a - b).abs() <= CACHE_EPSILON * a.abs().max(1.0))
    }
}

/// Stereo room impulse response.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomImpulseResponse {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
}

impl RoomImpulseResponse {
    /// Left channel samples.
    #[must_use]
    pub fn left(&self) -> &[f32] {
        &self.left
    }

    /// Right channel samples.
    #[must_use]
    pub fn right(&self) -> &[f32] {
        &self.right
    }

    /// Length in frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// Whether the response holds no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Sample rate the response was built for.
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Energy (sum of squares) of both channels in a frame range.
    #[must_use]
    pub fn energy(&self, range: std::ops::Range<usize>) -> f32 {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        self.left[start..end]
            .iter()
            .chain(&self.right[start..end])
            .map(|s| s * s)
            .sum()
    }
}

/// Per-sample intensity whose tail falls 60 dB over `decay` seconds.
#[must_use]
pub fn intensity_for_decay(decay: f32, sample_rate: u32) -> f32 {
    let decay = if decay.is_finite() { decay.max(0.01) } else { 0.01 };
    let samples = decay * sample_rate as f32;
    1.0 - 10f32.powf(-3.0 / samples)
}

/// Builds and caches room impulse responses.
#[derive(Debug)]
pub struct ReverbSynthesizer {
    sample_rate: u32,
    duration: f32,
    speed_of_sound: f32,
    seed: u64,
    cached: Option<CachedResponse>,
    builds: u64,
}

#[derive(Debug)]
struct CachedResponse {
    room: RoomDimensions,
    intensity: f32,
    response: Arc<RoomImpulseResponse>,
}

impl ReverbSynthesizer {
    /// Creates a synthesizer for the given processing rate.
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            duration: DEFAULT_REVERB_DURATION,
            speed_of_sound: SPEED_OF_SOUND,
            seed: 0x5eed_c0de,
            cached: None,
            builds: 0,
        }
    }

    /// Set response duration in seconds.
    #[must_use]
    pub fn with_duration(mut self, seconds: f32) -> Self {
        self.duration = seconds.max(0.01);
        self
    }

    /// Set speed of sound used for reflection timing.
    #[must_use]
    pub fn with_speed_of_sound(mut self, speed: f32) -> Self {
        self.speed_of_sound = speed.max(1.0);
        self
    }

    /// Set the noise seed for the tail.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of responses built so far.
    #[must_use]
    pub const fn builds(&self) -> u64 {
        self.builds
    }

    /// Frames in a response of the configured duration.
    #[must_use]
    pub fn response_len(&self) -> usize {
        ((self.duration * self.sample_rate as f32).round() as usize).max(1)
    }

    /// Returns the cached response for these parameters, building a new one
    /// only if they differ from the last call. The flag is true on rebuild.
    pub fn impulse_response(
        &mut self,
        room: RoomDimensions,
        intensity: f32,
    ) -> (Arc<RoomImpulseResponse>, bool) {
        let intensity = intensity.clamp(0.0, 1.0);
        if let Some(cached) = &self.cached {
            let tolerance = CACHE_EPSILON * intensity.max(1e-3);
            if cached.room.approx_eq(&room) && (cached.intensity - intensity).abs() <= tolerance {
                debug!("Reusing cached room impulse response");
                return (Arc::clone(&cached.response), false);
            }
        }

        let response = Arc::new(self.build_impulse_response(room, intensity));
        self.builds += 1;
        info!(
            "Built room impulse response: {:.1}x{:.1}x{:.1} m, intensity {:.2e}, {} frames",
            room.width,
            room.height,
            room.depth,
            intensity,
            response.len()
        );
        self.cached = Some(CachedResponse {
            room,
            intensity,
            response: Arc::clone(&response),
        });
        (response, true)
    }

    /// Builds a response without touching the cache.
    #[must_use]
    pub fn build_impulse_response(
        &self,
        room: RoomDimensions,
        intensity: f32,
    ) -> RoomImpulseResponse {
        let len = self.response_len();
        let sr = self.sample_rate as f32;
        let scale = room.volume_factor();
        let intensity = intensity.clamp(0.0, 1.0);

        let mut left = vec![0.0f32; len];
        let mut right = vec![0.0f32; len];

        // Late tail.
        let mut rng = fastrand::Rng::with_seed(self.seed);
        let keep = 1.0 - intensity;
        let mut envelope = 1.0f32;
        let (mut lp_left, mut lp_right) = (0.0f32, 0.0f32);
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            lp_left = lp_left * 0.35 + (rng.f32() * 2.0 - 1.0) * 0.65;
            lp_right = lp_right * 0.35 + (rng.f32() * 2.0 - 1.0) * 0.65;
            *l = lp_left * TAIL_LEVEL * envelope;
            *r = lp_right * TAIL_LEVEL * envelope;
            envelope *= keep;
        }

        // Early reflections, slightly stretched on the right for width.
        for (axis, dimension) in room.axes().into_iter().enumerate() {
            let spacing = dimension / self.speed_of_sound;
            let polarity = if axis % 2 == 0 { 1.0 } else { -1.0 };
            for (channel, stretch) in [(&mut left, 1.0f32), (&mut right, 1.013)] {
                let mut k = 1u32;
                loop {
                    let t = spacing * stretch * k as f32;
                    let index = (t * sr).round() as usize;
                    let magnitude = EARLY_LEVEL * (-t * EARLY_DECAY_RATE).exp();
                    if index >= len || magnitude < 1e-4 {
                        break;
                    }
                    channel[index] += polarity * magnitude;
                    k += 1;
                }
            }
        }

        for sample in left.iter_mut().chain(right.iter_mut()) {
            *sample *= scale;
        }

        RoomImpulseResponse {
            left,
            right,
            sample_rate: self.sample_rate,
        }
    }
}
