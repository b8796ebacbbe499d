//! Application lifecycle management.
//!
//! The control loop moves the listener along the flight path at the tick
//! rate. The render task pulls stereo blocks from the same engine in real
//! time and optionally writes them to disk. Both share the engine through
//! one mutex.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cosmos_audio::{
    AudioEvent, AudioFeatures, ListenerPose, OutputCapability, SpatialAudioEngine,
};
use glam::Vec3;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::loader::SceneLoader;
use crate::scene::Scene;

/// Frames pulled from the engine per render wakeup.
const RENDER_FRAMES: usize = 1024;

type SharedEngine = Arc<Mutex<SpatialAudioEngine>>;

/// Piecewise-linear listener path through a list of waypoints.
#[derive(Debug, Clone)]
pub struct FlightPath {
    waypoints: Vec<Vec3>,
    duration: f32,
}

impl FlightPath {
    /// Creates a path visiting `waypoints` over `duration` seconds.
    pub fn new(mut waypoints: Vec<Vec3>, duration: f32) -> Self {
        if waypoints.is_empty() {
            waypoints.push(Vec3::ZERO);
        }
        Self {
            waypoints,
            duration: duration.max(f32::EPSILON),
        }
    }

    /// Total flight time in seconds.
    pub const fn duration(&self) -> f32 {
        self.duration
    }

    /// Listener pose at time `t`, facing along the current segment.
    pub fn pose_at(&self, t: f32) -> ListenerPose {
        let segments = self.waypoints.len() - 1;
        if segments == 0 {
            return ListenerPose::at(self.waypoints[0]);
        }
        let segment_time = self.duration / segments as f32;
        let u = t.clamp(0.0, self.duration) / segment_time;
        let index = (u.floor() as usize).min(segments - 1);
        let fraction = u - index as f32;

        let (from, to) = (self.waypoints[index], self.waypoints[index + 1]);
        let position = from.lerp(to, fraction);
        let heading = to - from;
        let velocity = if t < self.duration {
            heading / segment_time
        } else {
            Vec3::ZERO
        };
        ListenerPose::looking_at(position, position + heading, Vec3::Y).with_velocity(velocity)
    }
}

/// Stand-in for the music analyzer: slow oscillations plus a random walk.
#[derive(Debug)]
struct FeatureSynth {
    rng: fastrand::Rng,
    energy: f32,
}

impl FeatureSynth {
    fn new(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            energy: 0.5,
        }
    }

    fn sample(&mut self, t: f32) -> AudioFeatures {
        let wave = |rate: f32, phase: f32| 0.5 + 0.5 * (t * rate + phase).sin();
        self.energy = (self.energy + (self.rng.f32() - 0.5) * 0.05).clamp(0.0, 1.0);
        AudioFeatures {
            bass: wave(0.9, 0.0),
            mid: wave(0.6, 1.0),
            treble: wave(1.7, 2.0),
            energy: self.energy,
            valence: wave(0.2, 0.5),
        }
    }
}

/// What the render task produced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderStats {
    /// Stereo frames rendered
    pub frames: u64,
    /// Largest absolute sample
    pub peak: f32,
    /// Samples outside [-1, 1]
    pub clipped: u64,
}

impl RenderStats {
    fn record(&mut self, interleaved: &[f32]) {
        self.frames += (interleaved.len() / 2) as u64;
        for sample in interleaved {
            let level = sample.abs();
            self.peak = self.peak.max(level);
            if level > 1.0 {
                self.clipped += 1;
            }
        }
    }
}

/// Runs the application.
pub async fn run(config: EngineConfig) -> Result<RenderStats> {
    let scene = match &config.scene_path {
        Some(path) => Scene::load(path)?,
        None => {
            info!("No scene configured, using the demo tour");
            Scene::demo()
        },
    };
    let root = config
        .scene_path
        .as_deref()
        .and_then(Path::parent)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let capability = if config.output_enabled {
        OutputCapability::Available
    } else {
        warn!("Output disabled in config; running silent");
        OutputCapability::Unavailable
    };
    let loader = SceneLoader::new(root, config.audio.sample_rate);
    let engine = SpatialAudioEngine::new(config.audio.clone(), capability, Box::new(loader));
    let sample_rate = engine.config().sample_rate;
    let engine: SharedEngine = Arc::new(Mutex::new(engine));

    let handles = scene.populate(&mut engine.lock())?;
    info!(
        "Scene ready: {} zones, {} sources",
        handles.zones.len(),
        handles.sources.len()
    );
    let flight = FlightPath::new(scene.flight_waypoints()?, config.flight_duration);

    let (stop_tx, stop_rx) = watch::channel(false);
    let render = tokio::spawn(render_loop(
        Arc::clone(&engine),
        sample_rate,
        config.pcm_output.clone(),
        stop_rx,
    ));

    let flown = tokio::select! {
        result = control_loop(&engine, &config, &flight) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping flight");
            Ok(())
        },
    };
    // The render task may already have exited with an error.
    let _ = stop_tx.send(true);
    let stats = render.await.context("render task panicked")??;
    flown?;

    info!(
        "Rendered {} frames ({:.1} s), peak {:.3}, {} clipped samples",
        stats.frames,
        stats.frames as f64 / f64::from(sample_rate),
        stats.peak,
        stats.clipped
    );
    Ok(stats)
}

async fn control_loop(
    engine: &SharedEngine,
    config: &EngineConfig,
    flight: &FlightPath,
) -> Result<()> {
    let dt = config.tick_interval();
    let mut ticker = tokio::time::interval(Duration::from_secs_f32(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut features = FeatureSynth::new(config.feature_seed);

    let mut t = 0.0f32;
    let mut next_report = 0.0f32;
    while t <= flight.duration() {
        ticker.tick().await;
        let pose = flight.pose_at(t);
        let (events, metrics) = {
            let mut engine = engine.lock();
            engine.set_audio_features(features.sample(t));
            engine.set_listener_pose(pose);
            (engine.drain_events(), engine.metrics())
        };
        for event in &events {
            log_event(event);
        }
        if t >= next_report {
            info!(
                elapsed = f64::from(t),
                position = ?pose.position,
                zones = metrics.active_zone_count,
                playing = metrics.active_source_count,
                loads = metrics.pending_loads,
                cost = metrics.estimated_cost,
                "flight"
            );
            next_report += 1.0;
        }
        t += dt;
    }
    Ok(())
}

async fn render_loop(
    engine: SharedEngine,
    sample_rate: u32,
    output: Option<PathBuf>,
    mut stop: watch::Receiver<bool>,
) -> Result<RenderStats> {
    let mut file = match &output {
        Some(path) => Some(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => None,
    };
    let mut buffer = vec![0.0f32; RENDER_FRAMES * 2];
    let period = Duration::from_secs_f64(RENDER_FRAMES as f64 / f64::from(sample_rate));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut stats = RenderStats::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            },
        }
        engine.lock().render(&mut buffer);
        stats.record(&buffer);
        if let Some(file) = file.as_mut() {
            // Native byte order, which is little-endian on supported targets.
            file.write_all(bytemuck::cast_slice(&buffer))
                .await
                .context("failed to write PCM output")?;
        }
    }

    if let (Some(mut file), Some(path)) = (file, output) {
        file.flush().await.context("failed to flush PCM output")?;
        info!("Wrote PCM output to {}", path.display());
    }
    Ok(stats)
}

fn log_event(event: &AudioEvent) {
    match event {
        AudioEvent::ZoneEntered { zone, name } => info!(%zone, "Entered zone '{name}'"),
        AudioEvent::ZoneExited { zone } => info!(%zone, "Left zone"),
        AudioEvent::SourceStarted { source } => debug!(%source, "Source started"),
        AudioEvent::SourceFinished { source } => debug!(%source, "Source finished"),
        AudioEvent::LoadCompleted { source, duration } => {
            debug!(%source, "Payload loaded ({duration:.2} s)");
        },
        AudioEvent::LoadFailed { source, message } => warn!(%source, "Payload failed: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flight_path_endpoints() {
        let path = FlightPath::new(
            vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0), Vec3::new(10.0, 0.0, 10.0)],
            10.0,
        );
        let start = path.pose_at(0.0);
        assert!(start.position.length() < 1e-5);
        assert!((start.velocity - Vec3::new(0.0, 0.0, 2.0)).length() < 1e-5);

        let middle = path.pose_at(5.0);
        assert!((middle.position - Vec3::new(0.0, 0.0, 10.0)).length() < 1e-4);

        let end = path.pose_at(12.0);
        assert!((end.position - Vec3::new(10.0, 0.0, 10.0)).length() < 1e-4);
        assert_eq!(end.velocity, Vec3::ZERO);
    }

    #[test]
    fn test_flight_path_faces_heading() {
        let path = FlightPath::new(vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)], 1.0);
        let pose = path.pose_at(0.5);
        let forward = pose.orientation * Vec3::Z;
        assert!((forward - Vec3::X).length() < 1e-4);
    }

    #[test]
    fn test_flight_path_single_point() {
        let path = FlightPath::new(Vec::new(), 3.0);
        assert_eq!(path.pose_at(1.0), ListenerPose::at(Vec3::ZERO));
    }

    #[test]
    fn test_features_stay_in_range() {
        let mut synth = FeatureSynth::new(3);
        for i in 0..500 {
            let f = synth.sample(i as f32 * 0.1);
            for v in [f.bass, f.mid, f.treble, f.energy, f.valence] {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_render_stats() {
        let mut stats = RenderStats::default();
        stats.record(&[0.5, -1.5, 0.25, 0.0]);
        assert_eq!(stats.frames, 2);
        assert!((stats.peak - 1.5).abs() < f32::EPSILON);
        assert_eq!(stats.clipped, 1);
    }

    fn short_config(dir: &TempDir) -> EngineConfig {
        let mut config = EngineConfig {
            tick_rate: 50,
            flight_duration: 0.2,
            pcm_output: Some(dir.path().join("out.f32")),
            ..EngineConfig::default()
        };
        config.audio.sample_rate = 8_000;
        config.audio.block_size = 64;
        config.audio.reverb_duration = 0.1;
        config.audio.hrir_taps = 16;
        config.validate();
        config
    }

    #[tokio::test]
    async fn test_run_demo_writes_pcm() {
        let dir = TempDir::new().expect("temp dir");
        let config = short_config(&dir);
        let stats = run(config).await.expect("run");
        assert!(stats.frames >= RENDER_FRAMES as u64);

        let bytes = std::fs::metadata(dir.path().join("out.f32")).expect("output").len();
        assert_eq!(bytes, stats.frames * 8);
    }

    #[tokio::test]
    async fn test_run_silent() {
        let dir = TempDir::new().expect("temp dir");
        let mut config = short_config(&dir);
        config.output_enabled = false;
        let stats = run(config).await.expect("run");
        assert!(stats.peak.abs() < f32::EPSILON);
    }
}
