//! Payload loader for the scene runner.
//!
//! Payload references are resolved as:
//! - `tone:<hz>`: a procedural sine that loops seamlessly
//! - `noise:<name>`: procedural filtered noise, seeded by the name
//! - anything else: a raw little-endian f32 mono file, relative to the scene
//!   directory, at the engine sample rate

use std::f32::consts::TAU;
use std::path::PathBuf;

use cosmos_audio::{AudioPayload, LoadError, LoadRequest, PayloadLoader};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

/// Length of procedural payloads in seconds.
const PROCEDURAL_SECONDS: f32 = 4.0;

/// Loads files with `tokio::fs` and synthesizes procedural payloads.
#[derive(Debug, Clone)]
pub struct SceneLoader {
    root: PathBuf,
    sample_rate: u32,
}

impl SceneLoader {
    /// Creates a loader resolving files under `root`.
    pub fn new(root: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            root: root.into(),
            sample_rate,
        }
    }
}

impl PayloadLoader for SceneLoader {
    fn load(&self, request: &LoadRequest) -> BoxFuture<'static, Result<AudioPayload, LoadError>> {
        let sample_rate = self.sample_rate;
        let reference = request.payload.clone();
        let path = self.root.join(&reference);
        async move {
            if let Some(hz) = reference.strip_prefix("tone:") {
                let hz: f32 = hz
                    .trim()
                    .parse()
                    .map_err(|_| LoadError::new(format!("bad tone frequency in '{reference}'")))?;
                return Ok(tone(sample_rate, hz));
            }
            if let Some(name) = reference.strip_prefix("noise:") {
                return Ok(noise(sample_rate, name));
            }

            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                LoadError::new(format!("failed to read {}: {e}", path.display()))
            })?;
            let payload = decode_pcm(sample_rate, &bytes)?;
            debug!(path = %path.display(), frames = payload.frames(), "read PCM payload");
            Ok(payload)
        }
        .boxed()
    }
}

/// Decodes raw little-endian f32 mono samples.
pub fn decode_pcm(sample_rate: u32, bytes: &[u8]) -> Result<AudioPayload, LoadError> {
    if bytes.len() % 4 != 0 {
        return Err(LoadError::new(format!(
            "PCM data length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if samples.is_empty() {
        return Err(LoadError::new("PCM file is empty"));
    }
    if samples.iter().any(|s| !s.is_finite()) {
        return Err(LoadError::new("PCM data contains non-finite samples"));
    }
    Ok(AudioPayload::mono(sample_rate, samples))
}

/// Sine at `hz`, rounded to a whole number of cycles so loops do not click.
fn tone(sample_rate: u32, hz: f32) -> AudioPayload {
    let sr = sample_rate as f32;
    let frames = (PROCEDURAL_SECONDS * sr) as usize;
    // Whole cycles keep the loop seamless.
    let cycles = (hz.abs() * PROCEDURAL_SECONDS).round().max(1.0);
    let step = TAU * cycles / frames as f32;
    let samples = (0..frames)
        .map(|i| (i as f32 * step).sin() * 0.5)
        .collect();
    AudioPayload::mono(sample_rate, samples)
}

/// Brown-ish noise seeded from `name`.
fn noise(sample_rate: u32, name: &str) -> AudioPayload {
    let seed = name
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
    let mut rng = fastrand::Rng::with_seed(seed);
    let frames = (PROCEDURAL_SECONDS * sample_rate as f32) as usize;
    let mut state = 0.0f32;
    let samples = (0..frames)
        .map(|_| {
            state = (state * 0.98 + (rng.f32() * 2.0 - 1.0) * 0.1).clamp(-1.0, 1.0);
            state * 0.6
        })
        .collect();
    AudioPayload::mono(sample_rate, samples)
}
