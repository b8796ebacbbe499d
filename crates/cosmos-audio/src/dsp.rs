//! Shared effect chain driven by blended zone parameters.
//!
//! The chain runs on the stereo dry bus after all sources are mixed:
//! filter, distortion, echo, modulation, then the convolved reverb return
//! from the mono send bus is added on top. With no blended effects the dry
//! bus passes through untouched.

use std::f32::consts::{PI, TAU};

use tracing::debug;

use crate::convolver::PartitionedConvolver;
use crate::reverb::{intensity_for_decay, ReverbSynthesizer, RoomDimensions};
use crate::zone::{BlendedEffects, FilterKind, ModulationKind};

/// Longest echo time in seconds.
pub const MAX_DELAY_SECONDS: f32 = 2.0;

/// Room size quantization before a response is requested.
const ROOM_SIZE_STEP: f32 = 0.02;

/// Decay quantization before a response is requested, in seconds.
const DECAY_STEP: f32 = 0.1;

/// Transposed direct form II biquad with RBJ cookbook coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Default for Biquad {
    fn default() -> Self {
        Self::passthrough()
    }
}

impl Biquad {
    /// A filter that returns its input.
    #[must_use]
    pub const fn passthrough() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Recomputes coefficients, keeping the filter state.
    pub fn set(&mut self, kind: FilterKind, frequency: f32, q: f32, sample_rate: u32) {
        let sr = sample_rate as f32;
        let frequency = frequency.clamp(10.0, sr * 0.45);
        let q = q.clamp(0.05, 30.0);
        let w0 = TAU * frequency / sr;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        let (b0, b1, b2) = match kind {
            FilterKind::Lowpass => ((1.0 - cos) * 0.5, 1.0 - cos, (1.0 - cos) * 0.5),
            FilterKind::Highpass => ((1.0 + cos) * 0.5, -(1.0 + cos), (1.0 + cos) * 0.5),
            FilterKind::Bandpass => (alpha, 0.0, -alpha),
            FilterKind::Allpass => (1.0 - alpha, -2.0 * cos, 1.0 + alpha),
        };
        let a0 = 1.0 + alpha;
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    /// Filters one sample.
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    /// Clears the filter state.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// One-pole low-pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OnePole {
    coefficient: f32,
    state: f32,
}

impl OnePole {
    /// Sets the cutoff.
    pub fn set_cutoff(&mut self, cutoff: f32, sample_rate: u32) {
        let sr = sample_rate as f32;
        let cutoff = cutoff.clamp(1.0, sr * 0.49);
        self.coefficient = 1.0 - (-TAU * cutoff / sr).exp();
    }

    /// Filters one sample.
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.state += self.coefficient * (x - self.state);
        self.state
    }
}

/// Circular delay line with fractional reads.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write: usize,
}

impl DelayLine {
    /// Creates a delay line holding up to `capacity` samples of history.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(2)],
            write: 0,
        }
    }

    /// Longest supported delay in samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len() - 1
    }

    /// Appends a sample.
    #[inline]
    pub fn push(&mut self, x: f32) {
        self.buffer[self.write] = x;
        self.write = (self.write + 1) % self.buffer.len();
    }

    /// Reads the sample pushed `delay` samples ago (1.0 = most recent),
    /// linearly interpolated.
    #[inline]
    #[must_use]
    pub fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1.0, self.capacity() as f32);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;
        let a = self.buffer[(self.write + len - whole) % len];
        let b = self.buffer[(self.write + len - (whole + 1).min(len - 1)) % len];
        a + (b - a) * frac
    }

    /// Zeroes the history.
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Normalized `tanh` waveshaper. `amount` 0 is clean.
#[inline]
#[must_use]
pub fn shape(x: f32, amount: f32) -> f32 {
    if amount <= 0.0 {
        return x;
    }
    let drive = 1.0 + amount * 20.0;
    (x * drive).tanh() / drive.tanh()
}

/// Waveshaper with linear-interpolation oversampling and boxcar decimation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Distortion {
    previous: f32,
}

impl Distortion {
    /// Processes one sample at `oversample` times the rate.
    pub fn process(&mut self, x: f32, amount: f32, oversample: u8) -> f32 {
        let factor = oversample.max(1);
        if factor == 1 {
            self.previous = x;
            return shape(x, amount);
        }
        let step = 1.0 / f32::from(factor);
        let mut acc = 0.0;
        for i in 1..=factor {
            let t = f32::from(i) * step;
            acc += shape(self.previous + (x - self.previous) * t, amount);
        }
        self.previous = x;
        acc * step
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct AllpassStage {
    x1: f32,
    y1: f32,
}

impl AllpassStage {
    #[inline]
    fn process(&mut self, x: f32, coefficient: f32) -> f32 {
        let y = coefficient * x + self.x1 - coefficient * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

#[derive(Debug, Clone)]
struct ChannelState {
    filter: Biquad,
    distortion: Distortion,
    echo: DelayLine,
    modulation: DelayLine,
    phaser: [AllpassStage; 4],
    damping: OnePole,
}

impl ChannelState {
    fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Self {
            filter: Biquad::passthrough(),
            distortion: Distortion::default(),
            echo: DelayLine::new((MAX_DELAY_SECONDS * sr) as usize + 2),
            modulation: DelayLine::new((0.05 * sr) as usize + 2),
            phaser: [AllpassStage::default(); 4],
            damping: OnePole::default(),
        }
    }
}

/// Stereo effect chain plus reverb return.
pub struct EffectChain {
    sample_rate: u32,
    block_size: usize,
    effects: Option<BlendedEffects>,
    channels: [ChannelState; 2],
    lfo_phase: f32,
    synthesizer: ReverbSynthesizer,
    convolver: Option<PartitionedConvolver>,
    reverb_key: Option<(u32, u32)>,
    wet: f32,
    wet_left: Vec<f32>,
    wet_right: Vec<f32>,
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectChain")
            .field("effects", &self.effects)
            .field("convolver", &self.convolver)
            .field("wet", &self.wet)
            .finish_non_exhaustive()
    }
}

impl EffectChain {
    /// Creates an idle chain.
    #[must_use]
    pub fn new(sample_rate: u32, block_size: usize, synthesizer: ReverbSynthesizer) -> Self {
        Self {
            sample_rate,
            block_size,
            effects: None,
            channels: [ChannelState::new(sample_rate), ChannelState::new(sample_rate)],
            lfo_phase: 0.0,
            synthesizer,
            convolver: None,
            reverb_key: None,
            wet: 0.0,
            wet_left: vec![0.0; block_size],
            wet_right: vec![0.0; block_size],
        }
    }

    /// Currently applied effects.
    #[must_use]
    pub const fn effects(&self) -> Option<&BlendedEffects> {
        self.effects.as_ref()
    }

    /// Partitions in the loaded room response (0 without one).
    #[must_use]
    pub fn reverb_partitions(&self) -> usize {
        self.convolver.as_ref().map_or(0, PartitionedConvolver::partitions)
    }

    /// Room responses built so far.
    #[must_use]
    pub const fn reverb_builds(&self) -> u64 {
        self.synthesizer.builds()
    }

    /// Clears filter, echo, modulation and reverb history.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.filter.reset();
            channel.echo.clear();
            channel.modulation.clear();
            channel.phaser = [AllpassStage::default(); 4];
        }
        if let Some(convolver) = &mut self.convolver {
            convolver.reset();
        }
        self.wet = 0.0;
    }

    /// Pushes new blended parameters into the chain.
    ///
    /// Leaving bypass clears any history left from the previous zone set.
    ///
    /// Returns true if the room response was regenerated.
    pub fn apply(&mut self, effects: Option<&BlendedEffects>) -> bool {
        let Some(effects) = effects.copied() else {
            if self.effects.take().is_some() {
                debug!("effect chain bypassed");
            }
            return false;
        };

        let brightness = 1.0 - effects.reverb.damping.clamp(0.0, 1.0);
        let damping_cutoff = 500.0 + brightness * (self.sample_rate as f32 * 0.45 - 500.0);
        for channel in &mut self.channels {
            channel.filter.set(
                effects.filter.kind,
                effects.filter.frequency,
                effects.filter.q,
                self.sample_rate,
            );
            channel.damping.set_cutoff(damping_cutoff, self.sample_rate);
        }
        if self.effects.replace(effects).is_none() {
            self.reset();
        }

        let size_steps = (effects.reverb.room_size.clamp(0.0, 1.0) / ROOM_SIZE_STEP).round() as u32;
        let decay_steps =
            (effects.reverb.decay.clamp(0.1, 30.0) / DECAY_STEP).round().max(1.0) as u32;
        let key = (size_steps, decay_steps);
        if self.reverb_key == Some(key) {
            return false;
        }
        self.reverb_key = Some(key);

        let room = RoomDimensions::from_room_size(size_steps as f32 * ROOM_SIZE_STEP);
        let intensity = intensity_for_decay(decay_steps as f32 * DECAY_STEP, self.sample_rate);
        let (response, rebuilt) = self.synthesizer.impulse_response(room, intensity);
        match &mut self.convolver {
            Some(convolver) if rebuilt => {
                convolver.set_impulse_response(response.left(), response.right());
            }
            Some(_) => {}
            None => {
                self.convolver = Some(PartitionedConvolver::new(
                    response.left(),
                    response.right(),
                    self.block_size,
                ));
            }
        }
        rebuilt
    }

    /// Processes one block in place. `send` is the mono reverb send bus.
    ///
    /// All slices must be one block long.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32], send: &[f32]) {
        let Some(effects) = self.effects else {
            return;
        };
        let sr = self.sample_rate as f32;
        let frames = left.len().min(right.len()).min(self.wet_left.len());

        // Reverb return from the send bus.
        let wet_target = effects.reverb.wet_level.clamp(0.0, 1.0);
        if let Some(convolver) = self.convolver.as_mut().filter(|c| c.block_size() == frames) {
            convolver.process_block(
                send,
                &mut self.wet_left[..frames],
                &mut self.wet_right[..frames],
            );
        } else {
            self.wet_left.fill(0.0);
            self.wet_right.fill(0.0);
        }

        let distortion = effects.distortion.amount.clamp(0.0, 1.0);
        let oversample = effects.distortion.oversample;
        let echo_delay = (effects.delay.time.clamp(0.0, MAX_DELAY_SECONDS) * sr).max(1.0);
        let echo_feedback = effects.delay.feedback.clamp(0.0, 0.95);
        let echo_wet = effects.delay.wet_level.clamp(0.0, 1.0);
        let echo_on = effects.delay.time > 0.0 && echo_wet > 0.0;
        let kind = effects.modulation.kind;
        let depth = effects.modulation.depth.clamp(0.0, 1.0);
        let phase_step = TAU * effects.modulation.rate.clamp(0.0, 40.0) / sr;
        let wet_step = (wet_target - self.wet) / frames.max(1) as f32;

        for i in 0..frames {
            self.wet += wet_step;
            let phase = self.lfo_phase;
            self.lfo_phase = (self.lfo_phase + phase_step) % TAU;

            for (c, sample) in [&mut left[i], &mut right[i]].into_iter().enumerate() {
                let state = &mut self.channels[c];
                // Quadrature LFO between the ears.
                let lfo = (phase + c as f32 * PI * 0.5).sin();

                let mut x = state.filter.process(*sample);
                x = state.distortion.process(x, distortion, oversample);

                if echo_on {
                    let echo = state.echo.read(echo_delay);
                    state.echo.push(x + echo * echo_feedback);
                    x += echo * echo_wet;
                } else {
                    state.echo.push(x);
                }

                x = modulate(state, x, kind, depth, lfo, sr);

                let wet = if c == 0 { self.wet_left[i] } else { self.wet_right[i] };
                *sample = x + state.damping.process(wet) * self.wet;
            }
        }
        self.wet = wet_target;
    }
}

fn modulate(
    state: &mut ChannelState,
    x: f32,
    kind: ModulationKind,
    depth: f32,
    lfo: f32,
    sr: f32,
) -> f32 {
    if depth <= 0.0 {
        state.modulation.push(x);
        return x;
    }
    match kind {
        ModulationKind::Tremolo => {
            state.modulation.push(x);
            x * (1.0 - depth * 0.5 * (1.0 - lfo))
        }
        ModulationKind::Chorus => {
            let delay = (0.020 + 0.005 * depth * lfo) * sr;
            let wet = state.modulation.read(delay);
            state.modulation.push(x);
            x * (1.0 - 0.5 * depth) + wet * 0.5 * depth
        }
        ModulationKind::Flanger => {
            let delay = (0.002 + 0.002 * depth * (lfo + 1.0) * 0.5) * sr;
            let wet = state.modulation.read(delay);
            state.modulation.push(x + wet * 0.5 * depth);
            x * (1.0 - 0.5 * depth) + wet * 0.5 * depth
        }
        ModulationKind::Phaser => {
            state.modulation.push(x);
            let sweep = 300.0 + 1500.0 * (lfo + 1.0) * 0.5;
            let t = (PI * sweep / sr).tan();
            let coefficient = (t - 1.0) / (t + 1.0);
            let mut y = x;
            for stage in &mut state.phaser {
                y = stage.process(y, coefficient);
            }
            x * (1.0 - 0.5 * depth) + y * 0.5 * depth
        }
    }
}
