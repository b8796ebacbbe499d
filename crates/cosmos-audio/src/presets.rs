//! Ready-made zones for the cosmos scene.
//!
//! Ambient payload references use procedural descriptors (`tone:<hz>`,
//! `noise:<name>`) so the presets work without any audio assets.

use cosmos_common::ZoneGeometry;
use glam::Vec3;

use crate::features::FeatureKind;
use crate::zone::{
    AmbientSound, DelayParams, DistortionParams, FilterKind, FilterParams, ModulationKind,
    ModulationParams, ReverbParams, ZoneDesc, ZoneProperties,
};

/// Half extent of the [`cosmic_void`] box.
pub const COSMIC_VOID_EXTENT: f32 = 1000.0;

fn geometry_or_degenerate(geometry: cosmos_common::GeometryResult<ZoneGeometry>) -> ZoneGeometry {
    // Invalid caller dimensions are caught again by create_zone; keep the
    // descriptor constructible so the error surfaces there.
    geometry.unwrap_or(ZoneGeometry::Sphere(cosmos_common::Sphere {
        center: Vec3::ZERO,
        radius: 0.0,
    }))
}

/// Background zone covering the whole scene: vast, dark and quiet.
#[must_use]
pub fn cosmic_void() -> ZoneDesc {
    ZoneDesc::new(
        "cosmic_void",
        geometry_or_degenerate(ZoneGeometry::cuboid(
            Vec3::ZERO,
            Vec3::splat(COSMIC_VOID_EXTENT),
        )),
    )
    .with_priority(0)
    .with_properties(ZoneProperties {
        reverb: ReverbParams {
            room_size: 1.0,
            decay: 6.0,
            damping: 0.7,
            wet_level: 0.35,
        },
        filter: FilterParams {
            kind: FilterKind::Lowpass,
            frequency: 8_000.0,
            q: 0.707,
        },
        modulation: ModulationParams {
            kind: ModulationKind::Chorus,
            rate: 0.1,
            depth: 0.2,
        },
        ambient: Some(
            AmbientSound::new("noise:void", 0.15).reacting_to(FeatureKind::Energy, 0.5),
        ),
        ..ZoneProperties::default()
    })
}

/// Gas cloud: soft, chorused and diffuse.
#[must_use]
pub fn nebula(center: Vec3, radius: f32) -> ZoneDesc {
    ZoneDesc::new("nebula", geometry_or_degenerate(ZoneGeometry::sphere(center, radius)))
        .with_priority(1)
        .with_fade_distance(radius * 0.25)
        .with_properties(ZoneProperties {
            reverb: ReverbParams {
                room_size: 0.7,
                decay: 3.5,
                damping: 0.4,
                wet_level: 0.5,
            },
            filter: FilterParams {
                kind: FilterKind::Lowpass,
                frequency: 4_000.0,
                q: 0.9,
            },
            modulation: ModulationParams {
                kind: ModulationKind::Chorus,
                rate: 0.3,
                depth: 0.5,
            },
            ambient: Some(
                AmbientSound::new("tone:220", 0.2).reacting_to(FeatureKind::Mid, 0.6),
            ),
            ..ZoneProperties::default()
        })
}

/// Star-forming region: bright, shimmering phaser.
#[must_use]
pub fn stellar_nursery(center: Vec3, radius: f32) -> ZoneDesc {
    ZoneDesc::new(
        "stellar_nursery",
        geometry_or_degenerate(ZoneGeometry::sphere(center, radius)),
    )
    .with_priority(2)
    .with_fade_distance(radius * 0.2)
    .with_properties(ZoneProperties {
        reverb: ReverbParams {
            room_size: 0.5,
            decay: 2.0,
            damping: 0.2,
            wet_level: 0.4,
        },
        filter: FilterParams {
            kind: FilterKind::Highpass,
            frequency: 180.0,
            q: 0.707,
        },
        modulation: ModulationParams {
            kind: ModulationKind::Phaser,
            rate: 0.8,
            depth: 0.6,
        },
        ambient: Some(
            AmbientSound::new("tone:880", 0.12).reacting_to(FeatureKind::Treble, 0.8),
        ),
        ..ZoneProperties::default()
    })
}

/// Rocky belt: tight slapback echoes and grit.
#[must_use]
pub fn asteroid_field(center: Vec3, half_extents: Vec3) -> ZoneDesc {
    ZoneDesc::new(
        "asteroid_field",
        geometry_or_degenerate(ZoneGeometry::cuboid(center, half_extents)),
    )
    .with_priority(1)
    .with_fade_distance(10.0)
    .with_properties(ZoneProperties {
        reverb: ReverbParams {
            room_size: 0.25,
            decay: 0.8,
            damping: 0.6,
            wet_level: 0.25,
        },
        filter: FilterParams {
            kind: FilterKind::Bandpass,
            frequency: 1_200.0,
            q: 0.8,
        },
        distortion: DistortionParams {
            amount: 0.15,
            oversample: 2,
        },
        delay: DelayParams {
            time: 0.12,
            feedback: 0.35,
            wet_level: 0.3,
        },
        modulation: ModulationParams {
            kind: ModulationKind::Tremolo,
            rate: 6.0,
            depth: 0.2,
        },
        ambient: Some(
            AmbientSound::new("noise:rubble", 0.1).reacting_to(FeatureKind::Bass, 0.7),
        ),
    })
}

/// Event horizon: crushed, flanged and nearly endless.
#[must_use]
pub fn black_hole(center: Vec3, radius: f32) -> ZoneDesc {
    ZoneDesc::new("black_hole", geometry_or_degenerate(ZoneGeometry::sphere(center, radius)))
        .with_priority(3)
        .with_fade_distance(radius)
        .with_properties(ZoneProperties {
            reverb: ReverbParams {
                room_size: 0.9,
                decay: 8.0,
                damping: 0.9,
                wet_level: 0.6,
            },
            filter: FilterParams {
                kind: FilterKind::Lowpass,
                frequency: 600.0,
                q: 1.4,
            },
            distortion: DistortionParams {
                amount: 0.5,
                oversample: 4,
            },
            delay: DelayParams {
                time: 0.45,
                feedback: 0.6,
                wet_level: 0.25,
            },
            modulation: ModulationParams {
                kind: ModulationKind::Flanger,
                rate: 0.15,
                depth: 0.7,
            },
            ambient: Some(
                AmbientSound::new("tone:40", 0.3).reacting_to(FeatureKind::Bass, 1.0),
            ),
        })
}

/// Looks up a preset by name, placed at `center` with the given size.
///
/// `size` is the radius for spheres and the half extent for boxes; it is
/// ignored by `cosmic_void`.
#[must_use]
pub fn by_name(name: &str, center: Vec3, size: f32) -> Option<ZoneDesc> {
    match name {
        "cosmic_void" => Some(cosmic_void()),
        "nebula" => Some(nebula(center, size)),
        "stellar_nursery" => Some(stellar_nursery(center, size)),
        "asteroid_field" => Some(asteroid_field(center, Vec3::splat(size))),
        "black_hole" => Some(black_hole(center, size)),
        _ => None,
    }
}
