//! Spatial audio engine configuration.

use serde::{Deserialize, Serialize};

use crate::source::AudioCategory;

/// Speed of sound in world units (meters) per second.
pub const SPEED_OF_SOUND: f32 = 343.0;

/// Default processing sample rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default processing block size in frames.
pub const DEFAULT_BLOCK_SIZE: usize = 256;

/// Default room impulse response length in seconds.
pub const DEFAULT_REVERB_DURATION: f32 = 3.0;

/// Default number of taps in generated head-related impulse responses.
pub const DEFAULT_HRIR_TAPS: usize = 32;

/// Whether the host can produce audio output at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCapability {
    /// Audio output exists; the engine runs normally.
    #[default]
    Available,
    /// No audio output; the engine runs in inert silent mode.
    Unavailable,
}

/// Configuration for [`SpatialAudioEngine`](crate::engine::SpatialAudioEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Processing sample rate in Hz
    pub sample_rate: u32,
    /// Frames rendered per internal processing block
    pub block_size: usize,
    /// Speed of sound for Doppler and reflection timing
    pub speed_of_sound: f32,
    /// Enable Doppler pitch shift
    pub doppler_enabled: bool,
    /// Doppler strength coefficient (0.0 = none, 1.0 = physical)
    pub doppler_factor: f32,
    /// Upper bound on the Doppler-adjusted playback rate
    pub max_playback_rate: f32,
    /// Generate a directional response table at startup
    pub hrtf_enabled: bool,
    /// Taps per generated head-related impulse response
    pub hrir_taps: usize,
    /// Room impulse response duration in seconds
    pub reverb_duration: f32,
    /// Seed for the reverb tail noise
    pub reverb_seed: u64,
    /// Master output volume (0.0 - 1.0)
    pub master_volume: f32,
    /// Music category volume (0.0 - 1.0)
    pub music_volume: f32,
    /// Sound effect category volume (0.0 - 1.0)
    pub sfx_volume: f32,
    /// Ambient category volume (0.0 - 1.0)
    pub ambient_volume: f32,
    /// Voice category volume (0.0 - 1.0)
    pub voice_volume: f32,
    /// Capacity of the event channel; events beyond it are dropped
    pub event_capacity: usize,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            speed_of_sound: SPEED_OF_SOUND,
            doppler_enabled: true,
            doppler_factor: 1.0,
            max_playback_rate: 4.0,
            hrtf_enabled: true,
            hrir_taps: DEFAULT_HRIR_TAPS,
            reverb_duration: DEFAULT_REVERB_DURATION,
            reverb_seed: 0x5eed_c0de,
            master_volume: 1.0,
            music_volume: AudioCategory::Music.default_volume(),
            sfx_volume: AudioCategory::Sfx.default_volume(),
            ambient_volume: AudioCategory::Ambient.default_volume(),
            voice_volume: AudioCategory::Voice.default_volume(),
            event_capacity: 1024,
        }
    }
}

impl SpatialConfig {
    /// Set sample rate.
    #[must_use]
    pub const fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Enable or disable the generated HRTF table.
    #[must_use]
    pub const fn with_hrtf(mut self, enabled: bool) -> Self {
        self.hrtf_enabled = enabled;
        self
    }

    /// Set Doppler strength.
    #[must_use]
    pub const fn with_doppler_factor(mut self, factor: f32) -> Self {
        self.doppler_factor = factor;
        self
    }

    /// Set reverb duration in seconds.
    #[must_use]
    pub const fn with_reverb_duration(mut self, seconds: f32) -> Self {
        self.reverb_duration = seconds;
        self
    }

    /// Clamp values to usable ranges.
    pub fn normalize(&mut self) {
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.block_size = self.block_size.clamp(32, 8192).next_power_of_two();
        self.speed_of_sound = self.speed_of_sound.max(1.0);
        self.doppler_factor = self.doppler_factor.clamp(0.0, 2.0);
        self.max_playback_rate = self.max_playback_rate.clamp(1.0, 16.0);
        self.hrir_taps = self.hrir_taps.clamp(8, 512);
        self.reverb_duration = self.reverb_duration.clamp(0.05, 10.0);
        self.master_volume = self.master_volume.clamp(0.0, 1.0);
        self.music_volume = self.music_volume.clamp(0.0, 1.0);
        self.sfx_volume = self.sfx_volume.clamp(0.0, 1.0);
        self.ambient_volume = self.ambient_volume.clamp(0.0, 1.0);
        self.voice_volume = self.voice_volume.clamp(0.0, 1.0);
        self.event_capacity = self.event_capacity.max(1);
    }
}
