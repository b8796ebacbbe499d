//! # Cosmos Audio
//!
//! Environmental spatial audio for a 3D scene.
//!
//! This crate provides:
//! - Acoustic zones (boxes, spheres) whose effect parameters blend by
//!   priority as the listener moves, with fade regions at their edges
//! - Positional sound sources with distance attenuation, sound cones and
//!   Doppler pitch shift
//! - Binaural rendering through a head-related impulse response table with
//!   interaural time difference, falling back to constant-power panning
//! - Procedural room impulse responses applied by FFT convolution
//! - A shared effect chain: filter, distortion, echo, modulation and reverb
//! - Asynchronous payload loading through a host-supplied loader
//! - Zone ambient beds that follow analyzer features
//!
//! ## Threading
//!
//! The engine is driven from one control thread. Loading is cooperative:
//! load futures are polled without blocking on every listener update, so
//! no runtime is required inside the crate.
//!
//! ## Silent mode
//!
//! When the host reports no audio output, every operation succeeds without
//! effect and rendering produces silence.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod convolver;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod events;
pub mod features;
pub mod hrtf;
pub mod listener;
pub mod loader;
pub mod presets;
pub mod reverb;
pub mod source;
pub mod spatial;
pub mod voice;
pub mod zone;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::*;
    pub use crate::engine::*;
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::features::*;
    pub use crate::hrtf::*;
    pub use crate::listener::*;
    pub use crate::loader::*;
    pub use crate::reverb::*;
    pub use crate::source::*;
    pub use crate::spatial::*;
    pub use crate::zone::*;
    pub use cosmos_common::{Aabb, Sphere, SourceId, ZoneGeometry, ZoneId};
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    type LoadFuture = futures::future::BoxFuture<'static, Result<AudioPayload, LoadError>>;

    #[test]
    fn test_prelude_builds_engine() {
        let loader = |_: &LoadRequest| -> LoadFuture {
            Box::pin(async { Err(LoadError::new("offline")) })
        };
        let mut engine = SpatialAudioEngine::new(
            SpatialConfig::default().with_hrtf(false),
            OutputCapability::default(),
            Box::new(loader),
        );
        let zone = engine.create_zone(presets::cosmic_void()).expect("void zone");
        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        assert_eq!(engine.active_zones()[0].id, zone);
    }

    #[test]
    fn test_default_config_is_normalized() {
        let mut config = SpatialConfig::default();
        let before = config.clone();
        config.normalize();
        assert_eq!(config, before);
    }
}
