//! Per-source rendering state.
//!
//! A [`SourceVoice`] reads its payload through a linear-interpolation
//! resampler, runs the directional FIR pair for each ear, delays the far ear
//! by the inter-aural time difference, and mixes into the dry bus and the
//! mono reverb send. Gains and delays ramp across each block; a change of
//! directional response crossfades from the old pair to the new one.

use std::sync::Arc;

use crate::dsp::DelayLine;
use crate::hrtf::{HrirPair, HrtfKey};
use crate::loader::AudioPayload;
use crate::spatial::{constant_power_pan, SpatialParams};

/// Longest inter-aural delay the voice can apply, in seconds.
const MAX_ITD_SECONDS: f32 = 0.0015;

/// What a voice should sound like for the next block.
#[derive(Debug, Clone, Copy)]
pub struct VoiceTarget<'a> {
    /// Spatial state for this tick
    pub params: &'a SpatialParams,
    /// Overall gain: spatial gain x category x master x any bed modulation
    pub gain: f32,
    /// Playback-rate multiplier (Doppler)
    pub rate: f32,
    /// Level sent to the reverb bus
    pub send: f32,
}

/// Result of rendering one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceOutput {
    /// Frames written
    pub frames: usize,
    /// The payload ran out (non-looping only)
    pub finished: bool,
    /// Playhead after the block, in seconds
    pub position: f64,
}

/// Rendering state of one playing source.
#[derive(Debug, Clone)]
pub struct SourceVoice {
    sample_rate: u32,
    cursor: f64,
    history: Vec<f32>,
    history_pos: usize,
    hrir: Option<(HrtfKey, Arc<HrirPair>)>,
    fading_from: Option<Arc<HrirPair>>,
    itd_left: DelayLine,
    itd_right: DelayLine,
    delay: (f32, f32),
    gains: (f32, f32),
    primed: bool,
}

impl SourceVoice {
    /// Creates a voice for an engine running at `sample_rate`.
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        let itd_capacity = (MAX_ITD_SECONDS * sample_rate as f32).ceil() as usize + 4;
        Self {
            sample_rate: sample_rate.max(1),
            cursor: 0.0,
            history: Vec::new(),
            history_pos: 0,
            hrir: None,
            fading_from: None,
            itd_left: DelayLine::new(itd_capacity),
            itd_right: DelayLine::new(itd_capacity),
            delay: (0.0, 0.0),
            gains: (0.0, 0.0),
            primed: false,
        }
    }

    /// Moves the playhead.
    pub fn seek(&mut self, seconds: f64, payload: &AudioPayload) {
        self.cursor = (seconds * f64::from(payload.sample_rate())).max(0.0);
    }

    /// Playhead in seconds.
    #[must_use]
    pub fn position(&self, payload: &AudioPayload) -> f64 {
        self.cursor / f64::from(payload.sample_rate())
    }

    /// Directional response currently in use.
    #[must_use]
    pub fn hrtf_key(&self) -> Option<HrtfKey> {
        self.hrir.as_ref().map(|(key, _)| *key)
    }

    /// Forgets gain and filter history so the next block starts clean.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.itd_left.clear();
        self.itd_right.clear();
        self.fading_from = None;
        self.primed = false;
    }

    fn select_hrir(&mut self, next: Option<&(HrtfKey, Arc<HrirPair>)>) {
        let unchanged = match (&self.hrir, next) {
            (Some((a, _)), Some((b, _))) => a == b,
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            self.fading_from = None;
            return;
        }
        let previous = self.hrir.take().map(|(_, pair)| pair);
        self.hrir = next.cloned();
        let len = self.hrir.as_ref().map_or(0, |(_, pair)| pair.len());
        self.fading_from = previous.filter(|old| self.primed && old.len() == len);
        if self.history.len() != len {
            self.history = vec![0.0; len];
            self.history_pos = 0;
        }
    }

    /// Renders up to `dry_left.len()` frames, accumulating into the buses.
    pub fn render(
        &mut self,
        payload: &AudioPayload,
        looping: bool,
        target: &VoiceTarget<'_>,
        dry_left: &mut [f32],
        dry_right: &mut [f32],
        send: &mut [f32],
    ) -> VoiceOutput {
        let frames = dry_left.len().min(dry_right.len()).min(send.len());
        let params = target.params;
        let binaural = !params.head_relative && params.hrir.is_some();
        self.select_hrir(if binaural { params.hrir.as_ref() } else { None });

        let sr = self.sample_rate as f32;
        let target_delay = if binaural {
            (params.itd.max(0.0) * sr, (-params.itd).max(0.0) * sr)
        } else {
            (0.0, 0.0)
        };
        let target_gains = if binaural {
            (target.gain, target.gain)
        } else {
            let (l, r) = constant_power_pan(if params.head_relative { 0.0 } else { params.pan });
            (target.gain * l, target.gain * r)
        };
        if !self.primed {
            self.gains = target_gains;
            self.delay = target_delay;
            self.primed = true;
        }

        let step = f64::from(target.rate.max(0.0)) * f64::from(payload.sample_rate())
            / f64::from(self.sample_rate);
        let len = payload.frames() as f64;
        let inv = 1.0 / frames.max(1) as f32;
        let (start_gains, start_delay) = (self.gains, self.delay);
        let mut written = 0;
        let mut finished = false;

        for i in 0..frames {
            if !looping && self.cursor >= len {
                finished = true;
                break;
            }
            let t = (i + 1) as f32 * inv;
            let x = payload.sample_at(self.cursor, looping);
            self.cursor += step;
            if looping && self.cursor >= len && len > 0.0 {
                self.cursor = self.cursor.rem_euclid(len);
            }

            let gain_l = start_gains.0 + (target_gains.0 - start_gains.0) * t;
            let gain_r = start_gains.1 + (target_gains.1 - start_gains.1) * t;

            send[i] += x * target.gain * target.send;

            if binaural {
                let (yl, yr) = self.convolve(x, t);
                let delay_l = start_delay.0 + (target_delay.0 - start_delay.0) * t;
                let delay_r = start_delay.1 + (target_delay.1 - start_delay.1) * t;
                self.itd_left.push(yl);
                self.itd_right.push(yr);
                dry_left[i] += self.itd_left.read(1.0 + delay_l) * gain_l;
                dry_right[i] += self.itd_right.read(1.0 + delay_r) * gain_r;
            } else {
                dry_left[i] += x * gain_l;
                dry_right[i] += x * gain_r;
            }
            written += 1;
        }

        self.gains = target_gains;
        self.delay = target_delay;
        self.fading_from = None;

        VoiceOutput {
            frames: written,
            finished,
            position: self.cursor / f64::from(payload.sample_rate()),
        }
    }

    /// Pushes `x` into the FIR history and returns the ear outputs, blending
    /// from the previous response by `t` while a crossfade is pending.
    fn convolve(&mut self, x: f32, t: f32) -> (f32, f32) {
        let Some((_, pair)) = &self.hrir else {
            return (x, x);
        };
        let n = self.history.len();
        if n == 0 {
            return (x, x);
        }
        self.history_pos = (self.history_pos + 1) % n;
        self.history[self.history_pos] = x;

        let fir = |pair: &HrirPair| -> (f32, f32) {
            let (mut l, mut r) = (0.0, 0.0);
            let (hl, hr) = (pair.left(), pair.right());
            for k in 0..n {
                let sample = self.history[(self.history_pos + n - k) % n];
                l += hl[k] * sample;
                r += hr[k] * sample;
            }
            (l, r)
        };
        let (l, r) = fir(pair);
        match &self.fading_from {
            Some(old) => {
                let (ol, or) = fir(old);
                (ol + (l - ol) * t, or + (r - or) * t)
            }
            None => (l, r),
        }
    }
}
