//! Scene files.
//!
//! A scene is a TOML document listing zones and sources:
//!
//! ```toml
//! [[preset]]
//! name = "nebula"
//! center = [0.0, 0.0, 120.0]
//! size = 40.0
//!
//! [[zone]]
//! name = "hangar"
//! geometry = { shape = "box", center = [0.0, 0.0, 0.0], half_extents = [10.0, 5.0, 10.0] }
//! priority = 4
//!
//! [[source]]
//! payload = "tone:330"
//! position = [5.0, 0.0, 40.0]
//! looping = true
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use cosmos_audio::{presets, SourceDesc, SpatialAudioEngine, ZoneDesc};
use cosmos_common::{SourceId, ZoneId};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A zone built from a named preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetSpec {
    /// Preset name (`cosmic_void`, `nebula`, `stellar_nursery`, ...)
    pub name: String,
    /// Zone center
    #[serde(default)]
    pub center: Vec3,
    /// Radius or half extent
    #[serde(default = "default_preset_size")]
    pub size: f32,
}

const fn default_preset_size() -> f32 {
    30.0
}

const fn default_autoplay() -> bool {
    true
}

/// A source and whether it starts with the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Registration parameters
    #[serde(flatten)]
    pub desc: SourceDesc,
    /// Play as soon as the scene is loaded
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
}

/// Zones and sources of one scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    /// Preset zones
    #[serde(rename = "preset")]
    pub presets: Vec<PresetSpec>,
    /// Fully described zones
    #[serde(rename = "zone")]
    pub zones: Vec<ZoneDesc>,
    /// Sources
    #[serde(rename = "source")]
    pub sources: Vec<SourceSpec>,
    /// Flight waypoints; zone centers are visited when empty
    pub waypoints: Vec<Vec3>,
}

/// Ids of everything a scene registered.
#[derive(Debug, Clone, Default)]
pub struct SceneHandles {
    /// Zone ids in scene order, presets first
    pub zones: Vec<ZoneId>,
    /// Source ids in scene order
    pub sources: Vec<SourceId>,
}

impl Scene {
    /// Reads a scene file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scene {}", path.display()))?;
        let scene: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse scene {}", path.display()))?;
        info!(
            "Loaded scene {}: {} presets, {} zones, {} sources",
            path.display(),
            scene.presets.len(),
            scene.zones.len(),
            scene.sources.len()
        );
        Ok(scene)
    }

    /// Built-in tour: every preset and a few beacons along the way.
    pub fn demo() -> Self {
        let preset = |name: &str, center: Vec3, size: f32| PresetSpec {
            name: name.to_string(),
            center,
            size,
        };
        let beacon = |payload: &str, position: Vec3| SourceSpec {
            desc: SourceDesc::new(payload).at(position).looping(true).with_attenuation(80.0, 1.0),
            autoplay: true,
        };
        Self {
            presets: vec![
                preset("cosmic_void", Vec3::ZERO, 0.0),
                preset("nebula", Vec3::new(0.0, 0.0, 120.0), 40.0),
                preset("stellar_nursery", Vec3::new(90.0, 10.0, 200.0), 30.0),
                preset("asteroid_field", Vec3::new(160.0, 0.0, 90.0), 25.0),
                preset("black_hole", Vec3::new(60.0, -20.0, -40.0), 20.0),
            ],
            zones: Vec::new(),
            sources: vec![
                beacon("tone:330", Vec3::new(10.0, 0.0, 110.0)),
                beacon("tone:587", Vec3::new(95.0, 15.0, 190.0)),
                beacon("noise:rubble", Vec3::new(150.0, 5.0, 95.0)),
            ],
            waypoints: Vec::new(),
        }
    }

    /// Resolves presets and explicit zones into descriptions.
    pub fn zone_descs(&self) -> Result<Vec<ZoneDesc>> {
        let mut descs = Vec::with_capacity(self.presets.len() + self.zones.len());
        for spec in &self.presets {
            match presets::by_name(&spec.name, spec.center, spec.size) {
                Some(desc) => descs.push(desc),
                None => bail!("unknown zone preset '{}'", spec.name),
            }
        }
        descs.extend(self.zones.iter().cloned());
        Ok(descs)
    }

    /// Points the flight visits, in order.
    pub fn flight_waypoints(&self) -> Result<Vec<Vec3>> {
        if !self.waypoints.is_empty() {
            return Ok(self.waypoints.clone());
        }
        Ok(self
            .zone_descs()?
            .iter()
            .map(|desc| desc.geometry.center())
            .collect())
    }

    /// Registers every zone and source, starting autoplay sources.
    pub fn populate(&self, engine: &mut SpatialAudioEngine) -> Result<SceneHandles> {
        let mut handles = SceneHandles::default();
        for desc in self.zone_descs()? {
            let name = desc.name.clone();
            let id = engine
                .create_zone(desc)
                .with_context(|| format!("invalid zone '{name}'"))?;
            debug!(zone = %id, %name, "scene zone registered");
            handles.zones.push(id);
        }
        for spec in &self.sources {
            let id = engine
                .register_source(spec.desc.clone())
                .with_context(|| format!("invalid source '{}'", spec.desc.payload))?;
            if spec.autoplay {
                // Start notifications arrive as events.
                drop(engine.play(id)?);
            }
            handles.sources.push(id);
        }
        Ok(handles)
    }
}
