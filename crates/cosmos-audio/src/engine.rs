//! The spatial audio engine.
//!
//! [`SpatialAudioEngine`] owns the zone registry, the source registry, the
//! listener, the directional response table, the load queue and the shared
//! effect chain. It is driven from a single control thread:
//!
//! 1. [`SpatialAudioEngine::set_listener_pose`] once per animation tick. It
//!    collects finished loads, re-evaluates zones, pushes the blended effects
//!    into the chain and spatializes every source.
//! 2. [`SpatialAudioEngine::render`] whenever the output needs samples.
//!
//! Hosts that render on another thread wrap the engine in one mutex.

use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap;
use cosmos_common::{SourceId, ZoneId};
use crossbeam_channel::Receiver;
use glam::Vec3;
use tracing::{debug, info, trace, warn};

use crate::config::{OutputCapability, SpatialConfig};
use crate::dsp::EffectChain;
use crate::error::{AudioError, AudioResult};
use crate::events::{AudioEvent, EventBus};
use crate::features::AudioFeatures;
use crate::hrtf::HrtfTable;
use crate::listener::{ListenerPose, ListenerState};
use crate::loader::{LoadQueue, LoadRequest, PayloadLoader, PlayTicket};
use crate::reverb::ReverbSynthesizer;
use crate::source::{
    validate_volume, AudioCategory, LoadState, PlaybackState, SourceDesc, SourceEntry,
    SourceRegistry, SpatialAudioSource, VolumeSettings,
};
use crate::spatial::{BinauralSpatializer, SpatialParams};
use crate::voice::{SourceVoice, VoiceTarget};
use crate::zone::{AcousticZone, ActiveZone, BlendedEffects, ZoneDesc, ZoneRegistry};

/// Per-frame multiply-accumulates of a voice outside its FIR pair.
const VOICE_OVERHEAD_MACS: usize = 12;

/// Per-frame multiply-accumulates of the effect chain proper.
const EFFECT_CHAIN_MACS: usize = 48;

/// Per-frame multiply-accumulates per convolver partition: two ears, one
/// complex multiply (four real ones) per bin, two bins per frame.
const PARTITION_MACS: usize = 16;

/// Engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EngineMetrics {
    /// Registered zones
    pub zone_count: usize,
    /// Zones that are candidates at the listener
    pub active_zone_count: usize,
    /// Registered sources, including zone ambient beds
    pub source_count: usize,
    /// Sources currently playing
    pub active_source_count: usize,
    /// Loads in flight
    pub pending_loads: usize,
    /// Estimated multiply-accumulates per output frame
    pub estimated_cost: usize,
}

/// Environmental spatial audio engine.
pub struct SpatialAudioEngine {
    config: SpatialConfig,
    capability: OutputCapability,
    zones: ZoneRegistry,
    sources: SourceRegistry,
    listener: ListenerState,
    spatializer: BinauralSpatializer,
    hrtf: Option<HrtfTable>,
    loader: Box<dyn PayloadLoader>,
    loads: LoadQueue,
    effects: EffectChain,
    blended: Option<BlendedEffects>,
    volumes: VolumeSettings,
    features: AudioFeatures,
    events: EventBus,
    active: Vec<ActiveZone>,
    beds: AHashMap<ZoneId, SourceId>,
    bed_levels: AHashMap<SourceId, f32>,
    spatial: AHashMap<SourceId, SpatialParams>,
    dry_left: Vec<f32>,
    dry_right: Vec<f32>,
    send: Vec<f32>,
    output: VecDeque<f32>,
    rendered_frames: u64,
}

impl std::fmt::Debug for SpatialAudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialAudioEngine")
            .field("capability", &self.capability)
            .field("zones", &self.zones.len())
            .field("sources", &self.sources.len())
            .field("hrtf", &self.hrtf.as_ref().map(HrtfTable::len))
            .field("loads", &self.loads)
            .finish_non_exhaustive()
    }
}

impl SpatialAudioEngine {
    /// Creates an engine.
    ///
    /// With [`OutputCapability::Unavailable`] the engine is silent: every
    /// call succeeds without effect and [`render`](Self::render) writes
    /// zeros.
    #[must_use]
    pub fn new(
        mut config: SpatialConfig,
        capability: OutputCapability,
        loader: Box<dyn PayloadLoader>,
    ) -> Self {
        config.normalize();
        let hrtf = if config.hrtf_enabled && capability == OutputCapability::Available {
            match HrtfTable::generate(config.sample_rate, config.hrir_taps) {
                Ok(table) => Some(table),
                Err(e) => {
                    warn!("HRTF table unavailable, falling back to stereo panning: {e}");
                    None
                }
            }
        } else {
            None
        };

        let synthesizer = ReverbSynthesizer::new(config.sample_rate)
            .with_duration(config.reverb_duration)
            .with_speed_of_sound(config.speed_of_sound)
            .with_seed(config.reverb_seed);
        let block = config.block_size;

        match capability {
            OutputCapability::Available => info!(
                "Spatial audio engine started: {} Hz, {} frame blocks, HRTF {}",
                config.sample_rate,
                block,
                if hrtf.is_some() { "on" } else { "off" }
            ),
            OutputCapability::Unavailable => {
                warn!("No audio output available; spatial audio engine is silent");
            }
        }

        Self {
            spatializer: BinauralSpatializer::new(&config),
            effects: EffectChain::new(config.sample_rate, block, synthesizer),
            volumes: VolumeSettings::from_config(&config),
            events: EventBus::new(config.event_capacity),
            capability,
            zones: ZoneRegistry::new(),
            sources: SourceRegistry::new(),
            listener: ListenerState::default(),
            hrtf,
            loader,
            loads: LoadQueue::new(),
            blended: None,
            features: AudioFeatures::default(),
            active: Vec::new(),
            beds: AHashMap::new(),
            bed_levels: AHashMap::new(),
            spatial: AHashMap::new(),
            dry_left: vec![0.0; block],
            dry_right: vec![0.0; block],
            send: vec![0.0; block],
            output: VecDeque::with_capacity(block * 4),
            rendered_frames: 0,
            config,
        }
    }

    /// Returns true if the engine runs without audio output.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.capability == OutputCapability::Unavailable
    }

    /// Normalized configuration.
    #[must_use]
    pub const fn config(&self) -> &SpatialConfig {
        &self.config
    }

    // ---- zones ------------------------------------------------------------

    /// Registers a zone. A zone with an ambient sound also gets a
    /// head-relative looping bed source that it owns.
    pub fn create_zone(&mut self, desc: ZoneDesc) -> AudioResult<ZoneId> {
        if self.is_silent() {
            return Ok(self.zones.reserve_id());
        }
        let ambient = desc.properties.ambient.clone();
        let id = self.zones.create(desc)?;
        if let Some(ambient) = ambient {
            let bed = SourceDesc::new(ambient.payload)
                .head_relative(true)
                .looping(true)
                .with_volume(ambient.volume)
                .with_category(AudioCategory::Ambient);
            match self.sources.register_owned(bed, Some(id)) {
                Ok(bed) => {
                    self.beds.insert(id, bed);
                }
                Err(e) => {
                    self.zones.remove(id);
                    return Err(e);
                }
            }
        }
        Ok(id)
    }

    /// Removes a zone and its ambient bed. Unknown ids are ignored.
    pub fn remove_zone(&mut self, id: ZoneId) {
        if self.is_silent() || self.zones.remove(id).is_none() {
            return;
        }
        for bed in self.sources.owned_by(id) {
            self.drop_source(bed);
        }
        self.beds.remove(&id);
        self.update_zones();
    }

    /// Enables or disables a zone. Takes effect at the next pose update.
    pub fn set_zone_active(&mut self, id: ZoneId, active: bool) -> AudioResult<()> {
        if self.is_silent() {
            return Ok(());
        }
        self.zones.set_active(id, active)
    }

    /// Looks up a zone.
    #[must_use]
    pub fn zone(&self, id: ZoneId) -> Option<&AcousticZone> {
        self.zones.get(id)
    }

    /// Zone registry.
    #[must_use]
    pub const fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    /// Candidate zones at the last listener pose, highest priority first.
    #[must_use]
    pub fn active_zones(&self) -> &[ActiveZone] {
        &self.active
    }

    /// Effects currently blended from the active zones.
    #[must_use]
    pub const fn blended_effects(&self) -> Option<&BlendedEffects> {
        self.blended.as_ref()
    }

    // ---- sources ----------------------------------------------------------

    /// Registers a source.
    pub fn register_source(&mut self, desc: SourceDesc) -> AudioResult<SourceId> {
        if self.is_silent() {
            return Ok(self.sources.reserve_id());
        }
        self.sources.register(desc)
    }

    /// Removes a source, aborting any in-flight load. Waiting tickets resolve
    /// with [`AudioError::PlaybackCancelled`].
    pub fn remove_source(&mut self, id: SourceId) -> AudioResult<()> {
        if self.is_silent() {
            return Ok(());
        }
        if self.drop_source(id) {
            self.beds.retain(|_, bed| *bed != id);
            Ok(())
        } else {
            Err(AudioError::SourceNotFound(id))
        }
    }

    fn drop_source(&mut self, id: SourceId) -> bool {
        let Some(mut entry) = self.sources.remove(id) else {
            return false;
        };
        self.loads.cancel(id);
        entry.resolve_waiters(&Err(AudioError::PlaybackCancelled(id)));
        self.spatial.remove(&id);
        self.bed_levels.remove(&id);
        true
    }

    /// Looks up a source.
    #[must_use]
    pub fn source(&self, id: SourceId) -> Option<&SpatialAudioSource> {
        self.sources.get(id)
    }

    /// Source registry.
    #[must_use]
    pub const fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Spatial parameters computed for a source at the last pose update.
    #[must_use]
    pub fn spatial_params(&self, id: SourceId) -> Option<&SpatialParams> {
        self.spatial.get(&id)
    }

    /// Starts playback, loading the payload first if needed.
    ///
    /// Calling `play` while a load is in flight attaches another ticket to
    /// it; calling it on a playing source returns a resolved ticket. After a
    /// failed load, `play` retries.
    pub fn play(&mut self, id: SourceId) -> AudioResult<PlayTicket> {
        if self.is_silent() {
            return Ok(PlayTicket::resolved(id, Ok(())));
        }
        let entry = self
            .sources
            .entry_mut(id)
            .ok_or(AudioError::SourceNotFound(id))?;

        if entry.source.playback_state() == PlaybackState::Playing {
            return Ok(PlayTicket::resolved(id, Ok(())));
        }

        match entry.source.load_state() {
            LoadState::Loaded => {
                start_entry(entry, &self.events);
                Ok(PlayTicket::resolved(id, Ok(())))
            }
            LoadState::Loading => {
                let (ticket, waiter) = PlayTicket::pending(id);
                entry.waiters.push(waiter);
                entry.start_pending = true;
                Ok(ticket)
            }
            LoadState::Unloaded | LoadState::Failed(_) => {
                entry.generation += 1;
                entry.start_pending = true;
                entry.source.set_load_state(LoadState::Loading);
                let request = LoadRequest {
                    source: id,
                    payload: entry.source.desc().payload.clone(),
                };
                let (ticket, waiter) = PlayTicket::pending(id);
                entry.waiters.push(waiter);
                let future = self.loader.load(&request);
                self.loads.submit(id, entry.generation, future);
                Ok(ticket)
            }
        }
    }

    /// Pauses a playing source, keeping its playhead. Cancels a pending
    /// start if the payload is still loading.
    pub fn pause(&mut self, id: SourceId) -> AudioResult<()> {
        if self.is_silent() {
            return Ok(());
        }
        let entry = self
            .sources
            .entry_mut(id)
            .ok_or(AudioError::SourceNotFound(id))?;
        cancel_pending_start(entry);
        if entry.source.pause() {
            debug!(%id, "source paused");
        }
        Ok(())
    }

    /// Stops a source and rewinds it. Cancels a pending start if the
    /// payload is still loading.
    pub fn stop(&mut self, id: SourceId) -> AudioResult<()> {
        if self.is_silent() {
            return Ok(());
        }
        let entry = self
            .sources
            .entry_mut(id)
            .ok_or(AudioError::SourceNotFound(id))?;
        cancel_pending_start(entry);
        stop_entry(entry);
        Ok(())
    }

    /// Moves the playhead, clamped to `[0, duration]`.
    pub fn seek(&mut self, id: SourceId, seconds: f64) -> AudioResult<()> {
        if self.is_silent() {
            return Ok(());
        }
        let entry = self
            .sources
            .entry_mut(id)
            .ok_or(AudioError::SourceNotFound(id))?;
        entry.source.seek(seconds);
        if let (Some(voice), Some(payload)) = (entry.voice.as_mut(), entry.payload.as_ref()) {
            voice.seek(entry.source.current_time(), payload);
        }
        Ok(())
    }

    fn with_desc(
        &mut self,
        id: SourceId,
        apply: impl FnOnce(&mut SourceDesc),
    ) -> AudioResult<()> {
        if self.is_silent() {
            return Ok(());
        }
        let entry = self
            .sources
            .entry_mut(id)
            .ok_or(AudioError::SourceNotFound(id))?;
        apply(entry.source.desc_mut());
        Ok(())
    }

    fn require_finite(field: &'static str, value: Vec3) -> AudioResult<()> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(AudioError::InvalidSource {
                field,
                reason: format!("must be finite, got {value}"),
            })
        }
    }

    /// Moves a source.
    pub fn set_source_position(&mut self, id: SourceId, position: Vec3) -> AudioResult<()> {
        Self::require_finite("position", position)?;
        self.with_desc(id, |desc| desc.position = position)
    }

    /// Sets a source's velocity.
    pub fn set_source_velocity(&mut self, id: SourceId, velocity: Vec3) -> AudioResult<()> {
        Self::require_finite("velocity", velocity)?;
        self.with_desc(id, |desc| desc.velocity = velocity)
    }

    /// Points a source's cone.
    pub fn set_source_orientation(&mut self, id: SourceId, orientation: Vec3) -> AudioResult<()> {
        Self::require_finite("orientation", orientation)?;
        self.with_desc(id, |desc| desc.orientation = orientation)
    }

    /// Sets a source's volume.
    pub fn set_source_volume(&mut self, id: SourceId, volume: f32) -> AudioResult<()> {
        validate_volume(volume)?;
        self.with_desc(id, |desc| desc.volume = volume)
    }

    // ---- listener ---------------------------------------------------------

    /// Per-tick update: collects finished loads, moves the listener,
    /// re-blends zones and spatializes every source.
    pub fn set_listener_pose(&mut self, pose: ListenerPose) {
        if self.is_silent() {
            return;
        }
        if !pose.is_finite() {
            warn!(?pose, "ignoring non-finite listener pose");
            return;
        }
        self.poll_loads();
        self.listener.apply(pose);
        self.update_zones();
        self.spatialize();
        trace!(
            tick = self.listener.updates(),
            zones = self.active.len(),
            sources = self.sources.len(),
            "listener updated"
        );
    }

    /// Listener state.
    #[must_use]
    pub const fn listener(&self) -> &ListenerState {
        &self.listener
    }

    fn update_zones(&mut self) {
        let next = self.zones.active_zones_for(self.listener.position());
        let mut entered = Vec::new();
        for zone in &next {
            if !self.active.iter().any(|a| a.id == zone.id) {
                entered.push(zone.id);
                let name = self
                    .zones
                    .get(zone.id)
                    .map(|z| z.name().to_string())
                    .unwrap_or_default();
                debug!(zone = %zone.id, %name, weight = zone.weight, "zone entered");
                self.events.publish(AudioEvent::ZoneEntered { zone: zone.id, name });
            }
        }
        for zone in &self.active {
            if !next.iter().any(|n| n.id == zone.id) {
                debug!(zone = %zone.id, "zone exited");
                self.events.publish(AudioEvent::ZoneExited { zone: zone.id });
            }
        }
        self.active = next;

        self.blended = self.zones.blend(&self.active);
        if self.effects.apply(self.blended.as_ref()) {
            debug!("room response regenerated for new zone blend");
        }

        let beds: Vec<(ZoneId, SourceId)> = self.beds.iter().map(|(z, s)| (*z, *s)).collect();
        for (zone, bed) in beds {
            let candidate = self.active.iter().any(|a| a.id == zone);
            let Some(entry) = self.sources.entry_mut(bed) else {
                continue;
            };
            let playing = entry.source.playback_state() == PlaybackState::Playing;
            let starting = entry.start_pending;
            // A failed bed is retried only when its zone is entered again.
            let failed = matches!(entry.source.load_state(), LoadState::Failed(_));
            let retry = !failed || entered.contains(&zone);
            if candidate && !playing && !starting && retry {
                // The ticket is not needed: beds report through events.
                if let Err(e) = self.play(bed).map(drop) {
                    warn!(%bed, "ambient bed failed to start: {e}");
                }
            } else if !candidate && (playing || starting) {
                if let Err(e) = self.pause(bed) {
                    warn!(%bed, "ambient bed failed to pause: {e}");
                }
            }
        }
        self.refresh_bed_levels();
    }

    fn refresh_bed_levels(&mut self) {
        self.bed_levels.clear();
        for zone in &self.active {
            let Some(bed) = self.beds.get(&zone.id) else {
                continue;
            };
            let Some(ambient) = self
                .zones
                .get(zone.id)
                .and_then(|z| z.properties().ambient.as_ref())
            else {
                continue;
            };
            let level = zone.weight * self.features.modulation(ambient.feature, ambient.reactivity);
            self.bed_levels.insert(*bed, level);
        }
    }

    fn spatialize(&mut self) {
        self.spatial.clear();
        for source in self.sources.iter() {
            let params = self
                .spatializer
                .update(source, &self.listener, self.hrtf.as_ref());
            self.spatial.insert(source.id(), params);
        }
    }

    // ---- features, tables, volumes ---------------------------------------

    /// Supplies the latest analyzer features; zone ambient beds follow them.
    pub fn set_audio_features(&mut self, features: AudioFeatures) {
        if self.is_silent() {
            return;
        }
        self.features = features;
        self.refresh_bed_levels();
    }

    /// Last supplied features.
    #[must_use]
    pub const fn audio_features(&self) -> &AudioFeatures {
        &self.features
    }

    /// Replaces the directional response table. `None` falls back to stereo
    /// panning.
    pub fn set_hrtf_table(&mut self, table: Option<HrtfTable>) {
        if self.is_silent() {
            return;
        }
        match &table {
            Some(t) => info!("HRTF table set: {} directions, {} taps", t.len(), t.taps()),
            None => warn!("HRTF table cleared; using stereo panning"),
        }
        self.hrtf = table;
    }

    /// Directional response table, if any.
    #[must_use]
    pub const fn hrtf_table(&self) -> Option<&HrtfTable> {
        self.hrtf.as_ref()
    }

    /// Sets a category volume (0.0 - 1.0).
    pub fn set_category_volume(&mut self, category: AudioCategory, volume: f32) {
        if self.is_silent() {
            return;
        }
        self.volumes.set(category, volume);
    }

    /// Category volumes.
    #[must_use]
    pub const fn volumes(&self) -> &VolumeSettings {
        &self.volumes
    }

    // ---- loading ----------------------------------------------------------

    /// Applies every finished load without blocking. Returns how many
    /// completions were applied; stale ones are discarded.
    pub fn poll_loads(&mut self) -> usize {
        if self.is_silent() {
            return 0;
        }
        let mut applied = 0;
        for outcome in self.loads.poll_ready() {
            let source = outcome.source;
            let Some(entry) = self
                .sources
                .entry_mut(source)
                .filter(|entry| entry.generation == outcome.generation)
            else {
                debug!(%source, generation = outcome.generation, "discarding stale load");
                continue;
            };
            applied += 1;
            match outcome.result {
                Ok(payload) => {
                    let duration = payload.duration();
                    debug!(%source, duration, frames = payload.frames(), "payload loaded");
                    let payload = Arc::new(payload);
                    let mut voice = SourceVoice::new(self.config.sample_rate);
                    entry.source.set_duration(duration);
                    voice.seek(entry.source.current_time(), &payload);
                    entry.voice = Some(voice);
                    entry.payload = Some(payload);
                    entry.source.set_load_state(LoadState::Loaded);
                    self.events.publish(AudioEvent::LoadCompleted { source, duration });
                    if std::mem::take(&mut entry.start_pending) {
                        start_entry(entry, &self.events);
                    }
                    entry.resolve_waiters(&Ok(()));
                }
                Err(e) => {
                    let payload = &entry.source.desc().payload;
                    warn!(%source, %payload, "payload load failed: {e}");
                    entry.source.set_load_state(LoadState::Failed(e.message.clone()));
                    entry.start_pending = false;
                    entry.resolve_waiters(&Err(AudioError::LoadFailed {
                        source_id: source,
                        message: e.message.clone(),
                    }));
                    self.events.publish(AudioEvent::LoadFailed {
                        source,
                        message: e.message,
                    });
                }
            }
        }
        applied
    }

    // ---- output -----------------------------------------------------------

    /// Fills `out` with interleaved stereo samples.
    ///
    /// Only whole frames are rendered. A trailing odd slot is zeroed and the
    /// next call starts on a left sample again.
    pub fn render(&mut self, out: &mut [f32]) {
        if self.is_silent() {
            out.fill(0.0);
            return;
        }
        let n = out.len() & !1;
        while self.output.len() < n {
            self.render_block();
        }
        let (frames, rest) = out.split_at_mut(n);
        for (slot, sample) in frames.iter_mut().zip(self.output.drain(..n)) {
            *slot = sample;
        }
        rest.fill(0.0);
    }

    /// Frames rendered so far.
    #[must_use]
    pub const fn rendered_frames(&self) -> u64 {
        self.rendered_frames
    }

    fn render_block(&mut self) {
        self.dry_left.fill(0.0);
        self.dry_right.fill(0.0);
        self.send.fill(0.0);

        for entry in self.sources.entries_mut() {
            if !entry.source.playback_state().is_active() {
                continue;
            }
            let (Some(voice), Some(payload)) = (entry.voice.as_mut(), entry.payload.as_ref()) else {
                continue;
            };
            let id = entry.source.id();
            let fresh;
            let params = if let Some(params) = self.spatial.get(&id) {
                params
            } else {
                // Started since the last pose update.
                fresh = self
                    .spatializer
                    .update(&entry.source, &self.listener, self.hrtf.as_ref());
                &fresh
            };
            let bed_level = if entry.owner.is_some() {
                self.bed_levels.get(&id).copied().unwrap_or(0.0)
            } else {
                1.0
            };
            let target = VoiceTarget {
                params,
                gain: params.gain
                    * self.volumes.effective(entry.source.desc().category)
                    * bed_level,
                rate: params.doppler,
                send: 1.0,
            };
            let looping = entry.source.desc().looping;
            let rendered = voice.render(
                payload,
                looping,
                &target,
                &mut self.dry_left,
                &mut self.dry_right,
                &mut self.send,
            );
            entry.source.set_playhead(rendered.position);
            if rendered.finished {
                stop_entry(entry);
                self.events.publish(AudioEvent::SourceFinished { source: id });
            }
        }

        self.effects
            .process(&mut self.dry_left, &mut self.dry_right, &self.send);

        for (l, r) in self.dry_left.iter().zip(&self.dry_right) {
            self.output.push_back(*l);
            self.output.push_back(*r);
        }
        self.rendered_frames += self.dry_left.len() as u64;
    }

    // ---- observation ------------------------------------------------------

    /// Engine statistics. All zero in silent mode.
    #[must_use]
    pub fn metrics(&self) -> EngineMetrics {
        if self.is_silent() {
            return EngineMetrics::default();
        }
        let playing = self.sources.playing_count();
        let taps = self.hrtf.as_ref().map_or(0, HrtfTable::taps);
        let chain = if self.blended.is_some() {
            EFFECT_CHAIN_MACS + self.effects.reverb_partitions() * PARTITION_MACS
        } else {
            0
        };
        EngineMetrics {
            zone_count: self.zones.len(),
            active_zone_count: self.active.len(),
            source_count: self.sources.len(),
            active_source_count: playing,
            pending_loads: self.loads.pending(),
            estimated_cost: playing * (2 * taps + VOICE_OVERHEAD_MACS) + chain,
        }
    }

    /// Takes every pending event.
    pub fn drain_events(&self) -> Vec<AudioEvent> {
        self.events.drain()
    }

    /// A receiver for consuming events elsewhere.
    #[must_use]
    pub fn event_receiver(&self) -> Receiver<AudioEvent> {
        self.events.receiver()
    }
}

fn start_entry(entry: &mut SourceEntry, events: &EventBus) {
    let id = entry.source.id();
    if entry.source.playback_state() == PlaybackState::Stopped {
        if let Some(voice) = entry.voice.as_mut() {
            voice.reset();
        }
    }
    entry.source.start();
    debug!(%id, "source started");
    events.publish(AudioEvent::SourceStarted { source: id });
}

fn stop_entry(entry: &mut SourceEntry) {
    entry.source.stop();
    if let (Some(voice), Some(payload)) = (entry.voice.as_mut(), entry.payload.as_ref()) {
        voice.reset();
        voice.seek(0.0, payload);
    }
}

fn cancel_pending_start(entry: &mut SourceEntry) {
    if std::mem::take(&mut entry.start_pending) {
        let id = entry.source.id();
        debug!(%id, "pending start cancelled");
        entry.resolve_waiters(&Err(AudioError::PlaybackCancelled(id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::loader::AudioPayload;
    use crate::presets;
    use crossbeam_channel::{unbounded, Sender};
    use futures::channel::oneshot;
    use futures::future::BoxFuture;
    use futures::FutureExt;

    type Reply = oneshot::Sender<Result<AudioPayload, LoadError>>;

    /// Records every request and lets the test decide when it completes.
    struct ManualLoader {
        requests: Sender<(LoadRequest, Reply)>,
    }

    impl PayloadLoader for ManualLoader {
        fn load(
            &self,
            request: &LoadRequest,
        ) -> BoxFuture<'static, Result<AudioPayload, LoadError>> {
            let (tx, rx) = oneshot::channel();
            let _ = self.requests.send((request.clone(), tx));
            async move {
                rx.await
                    .unwrap_or_else(|_| Err(LoadError::new("loader dropped")))
            }
            .boxed()
        }
    }

    fn test_config() -> SpatialConfig {
        SpatialConfig {
            sample_rate: 8_000,
            block_size: 64,
            reverb_duration: 0.1,
            hrir_taps: 16,
            ..SpatialConfig::default()
        }
    }

    fn engine_with(
        config: SpatialConfig,
        capability: OutputCapability,
    ) -> (SpatialAudioEngine, crossbeam_channel::Receiver<(LoadRequest, Reply)>) {
        let (tx, rx) = unbounded();
        let loader = Box::new(ManualLoader { requests: tx });
        let engine = SpatialAudioEngine::new(config, capability, loader);
        (engine, rx)
    }

    fn engine() -> (SpatialAudioEngine, crossbeam_channel::Receiver<(LoadRequest, Reply)>) {
        engine_with(test_config(), OutputCapability::Available)
    }

    fn tone(frames: usize) -> AudioPayload {
        AudioPayload::mono(
            8_000,
            (0..frames).map(|i| (i as f32 * 0.3).sin() * 0.5).collect(),
        )
    }

    fn count_started(events: &[AudioEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, AudioEvent::SourceStarted { .. }))
            .count()
    }

    #[test]
    fn test_double_play_loads_once() {
        let (mut engine, requests) = engine();
        let id = engine.register_source(SourceDesc::new("clip")).unwrap();

        let mut first = engine.play(id).unwrap();
        let mut second = engine.play(id).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(engine.metrics().pending_loads, 1);
        assert!(first.try_result().is_none());

        let (request, reply) = requests.try_recv().unwrap();
        assert_eq!(request.payload, "clip");
        reply.send(Ok(tone(800))).unwrap();
        assert_eq!(engine.poll_loads(), 1);

        assert_eq!(first.try_result(), Some(Ok(())));
        assert_eq!(second.try_result(), Some(Ok(())));
        let events = engine.drain_events();
        assert_eq!(count_started(&events), 1);
        assert!(events.iter().any(|e| matches!(e, AudioEvent::LoadCompleted { .. })));
        assert_eq!(engine.source(id).unwrap().playback_state(), PlaybackState::Playing);
        assert!((engine.source(id).unwrap().duration() - 0.1).abs() < 1e-9);
        assert!(requests.is_empty());
    }

    #[test]
    fn test_play_while_playing_is_noop() {
        let (mut engine, requests) = engine();
        let id = engine.register_source(SourceDesc::new("clip")).unwrap();
        let _ = engine.play(id).unwrap();
        requests.try_recv().unwrap().1.send(Ok(tone(800))).unwrap();
        engine.poll_loads();
        engine.drain_events();

        let mut again = engine.play(id).unwrap();
        assert_eq!(again.try_result(), Some(Ok(())));
        assert_eq!(count_started(&engine.drain_events()), 0);
        assert!(requests.is_empty());
    }

    #[test]
    fn test_stop_during_load_cancels_start() {
        let (mut engine, requests) = engine();
        let id = engine.register_source(SourceDesc::new("clip")).unwrap();
        let mut ticket = engine.play(id).unwrap();
        engine.stop(id).unwrap();
        assert_eq!(ticket.try_result(), Some(Err(AudioError::PlaybackCancelled(id))));

        requests.try_recv().unwrap().1.send(Ok(tone(800))).unwrap();
        engine.poll_loads();
        let source = engine.source(id).unwrap();
        assert_eq!(source.load_state(), &LoadState::Loaded);
        assert_eq!(source.playback_state(), PlaybackState::Stopped);
        assert_eq!(count_started(&engine.drain_events()), 0);
    }

    #[test]
    fn test_pause_during_load_cancels_start() {
        let (mut engine, requests) = engine();
        let id = engine.register_source(SourceDesc::new("clip")).unwrap();
        let ticket = engine.play(id).unwrap();
        engine.pause(id).unwrap();
        assert_eq!(
            futures::executor::block_on(ticket),
            Err(AudioError::PlaybackCancelled(id))
        );
        requests.try_recv().unwrap().1.send(Ok(tone(800))).unwrap();
        engine.poll_loads();
        assert_eq!(engine.source(id).unwrap().playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_load_failure_then_retry() {
        let (mut engine, requests) = engine();
        let broken = engine.register_source(SourceDesc::new("missing")).unwrap();
        let fine = engine.register_source(SourceDesc::new("clip")).unwrap();

        let mut ticket = engine.play(broken).unwrap();
        let _ = engine.play(fine).unwrap();
        let (_, broken_reply) = requests.try_recv().unwrap();
        let (_, fine_reply) = requests.try_recv().unwrap();
        broken_reply.send(Err(LoadError::new("404"))).unwrap();
        fine_reply.send(Ok(tone(800))).unwrap();
        assert_eq!(engine.poll_loads(), 2);

        assert_eq!(
            ticket.try_result(),
            Some(Err(AudioError::LoadFailed {
                source_id: broken,
                message: "404".into()
            }))
        );
        assert_eq!(
            engine.source(broken).unwrap().load_state(),
            &LoadState::Failed("404".into())
        );
        assert_eq!(engine.source(fine).unwrap().playback_state(), PlaybackState::Playing);
        assert!(engine
            .drain_events()
            .iter()
            .any(|e| matches!(e, AudioEvent::LoadFailed { source, .. } if *source == broken)));

        let _ = engine.play(broken).unwrap();
        assert_eq!(requests.len(), 1, "play after failure retries the load");
    }

    #[test]
    fn test_remove_during_load_discards_result() {
        let (mut engine, requests) = engine();
        let id = engine.register_source(SourceDesc::new("clip")).unwrap();
        let mut ticket = engine.play(id).unwrap();
        engine.remove_source(id).unwrap();
        assert_eq!(ticket.try_result(), Some(Err(AudioError::PlaybackCancelled(id))));
        assert_eq!(engine.metrics().pending_loads, 0);

        let (_, reply) = requests.try_recv().unwrap();
        let _ = reply.send(Ok(tone(800)));
        assert_eq!(engine.poll_loads(), 0);
        assert!(engine.source(id).is_none());
        assert_eq!(engine.remove_source(id), Err(AudioError::SourceNotFound(id)));
    }

    #[test]
    fn test_silent_mode_is_inert() {
        let (mut engine, requests) = engine_with(test_config(), OutputCapability::Unavailable);
        assert!(engine.is_silent());
        let zone = engine
            .create_zone(ZoneDesc::new(
                "bad",
                cosmos_common::ZoneGeometry::Sphere(cosmos_common::Sphere {
                    center: Vec3::ZERO,
                    radius: -1.0,
                }),
            ))
            .unwrap();
        engine.remove_zone(zone);
        let id = engine.register_source(SourceDesc::new("clip")).unwrap();
        let mut ticket = engine.play(id).unwrap();
        assert_eq!(ticket.try_result(), Some(Ok(())));
        engine.set_listener_pose(ListenerPose::at(Vec3::ONE));
        engine.stop(id).unwrap();
        assert!(requests.is_empty());

        let mut out = vec![1.0; 100];
        engine.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(engine.metrics(), EngineMetrics::default());
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let (mut engine, _requests) = engine();
        let zone = ZoneDesc::new(
            "bad",
            cosmos_common::ZoneGeometry::Sphere(cosmos_common::Sphere {
                center: Vec3::ZERO,
                radius: 0.0,
            }),
        );
        assert!(matches!(engine.create_zone(zone), Err(AudioError::InvalidGeometry { .. })));
        assert_eq!(engine.metrics().zone_count, 0);
        assert!(matches!(
            engine.register_source(SourceDesc::new("x").with_attenuation(-1.0, 1.0)),
            Err(AudioError::InvalidSource { field: "max_distance", .. })
        ));
        let id = engine.register_source(SourceDesc::new("x")).unwrap();
        assert!(engine.set_source_volume(id, -2.0).is_err());
        assert!(engine.set_source_position(id, Vec3::NAN).is_err());
        assert_eq!(
            engine.play(SourceId::from_raw(77)).map(drop),
            Err(AudioError::SourceNotFound(SourceId::from_raw(77)))
        );
    }

    #[test]
    fn test_zone_events_and_blend() {
        let (mut engine, _requests) = engine();
        let void = engine
            .create_zone(ZoneDesc::new(
                "void",
                cosmos_common::ZoneGeometry::cuboid(Vec3::ZERO, Vec3::splat(1000.0)).unwrap(),
            ))
            .unwrap();
        let nursery = engine
            .create_zone(presets::stellar_nursery(Vec3::new(50.0, 0.0, 50.0), 30.0))
            .unwrap();

        engine.set_listener_pose(ListenerPose::at(Vec3::new(50.0, 0.0, 50.0)));
        let active = engine.active_zones();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, nursery);
        assert!(active[0].weight > active[1].weight);
        let entered: Vec<ZoneId> = engine
            .drain_events()
            .iter()
            .filter_map(|e| match e {
                AudioEvent::ZoneEntered { zone, .. } => Some(*zone),
                _ => None,
            })
            .collect();
        assert_eq!(entered.len(), 2);
        assert!(engine.blended_effects().is_some());

        engine.set_listener_pose(ListenerPose::at(Vec3::new(-500.0, 0.0, -500.0)));
        assert_eq!(engine.active_zones().len(), 1);
        assert_eq!(engine.active_zones()[0].id, void);
        assert!(engine
            .drain_events()
            .iter()
            .any(|e| *e == AudioEvent::ZoneExited { zone: nursery }));

        engine.remove_zone(ZoneId::from_raw(999));
        assert_eq!(engine.metrics().zone_count, 2);
        engine.remove_zone(void);
        assert!(engine.active_zones().is_empty());
        assert!(engine.blended_effects().is_none());
    }

    #[test]
    fn test_ambient_bed_follows_zone() {
        let (mut engine, requests) = engine();
        let zone = engine.create_zone(presets::nebula(Vec3::ZERO, 10.0)).unwrap();
        assert_eq!(engine.metrics().source_count, 1);

        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        let (request, reply) = requests.try_recv().unwrap();
        assert_eq!(request.payload, "tone:220");
        reply.send(Ok(tone(800))).unwrap();
        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        let bed = request.source;
        assert_eq!(engine.source(bed).unwrap().playback_state(), PlaybackState::Playing);

        let mut out = vec![0.0; 256];
        engine.render(&mut out);
        assert!(out.iter().any(|s| s.abs() > 1e-4));

        engine.set_listener_pose(ListenerPose::at(Vec3::splat(100.0)));
        assert_eq!(engine.source(bed).unwrap().playback_state(), PlaybackState::Paused);

        engine.remove_zone(zone);
        assert!(engine.source(bed).is_none());
        assert_eq!(engine.metrics().source_count, 0);
    }

    #[test]
    fn test_failed_bed_waits_for_reentry() {
        let (mut engine, requests) = engine();
        engine.create_zone(presets::nebula(Vec3::ZERO, 10.0)).unwrap();

        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        let (request, reply) = requests.try_recv().unwrap();
        reply.send(Err(LoadError::new("no such tone"))).unwrap();
        for _ in 0..60 {
            engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        }
        assert!(requests.is_empty(), "failed bed is not reloaded every tick");
        let failures = engine
            .drain_events()
            .iter()
            .filter(|e| matches!(e, AudioEvent::LoadFailed { .. }))
            .count();
        assert_eq!(failures, 1);
        assert!(matches!(
            engine.source(request.source).unwrap().load_state(),
            LoadState::Failed(_)
        ));

        // Leaving and entering again retries once.
        engine.set_listener_pose(ListenerPose::at(Vec3::splat(100.0)));
        assert!(requests.is_empty());
        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        let (retry, _reply) = requests.try_recv().unwrap();
        assert_eq!(retry.source, request.source);
        assert!(requests.is_empty());
    }

    #[test]
    fn test_odd_render_keeps_channel_order() {
        let (mut engine, requests) = engine();
        engine.set_hrtf_table(None);
        let id = engine
            .register_source(SourceDesc::new("clip").at(Vec3::new(-3.0, 0.0, 0.0)))
            .unwrap();
        let _ = engine.play(id).unwrap();
        requests.try_recv().unwrap().1.send(Ok(tone(8_000))).unwrap();
        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));

        let energy = |out: &[f32], skip: usize| -> f32 {
            out.iter().skip(skip).step_by(2).map(|s| s * s).sum()
        };
        let mut odd = vec![1.0; 301];
        engine.render(&mut odd);
        assert_eq!(odd[300], 0.0);
        assert!(energy(&odd[..300], 0) > 10.0 * energy(&odd[..300], 1));

        let mut next = vec![0.0; 256];
        engine.render(&mut next);
        assert!(energy(&next, 0) > 10.0 * energy(&next, 1), "left stays left");
        assert_eq!(engine.rendered_frames() % 64, 0);
    }

    #[test]
    fn test_render_playing_source() {
        let (mut engine, requests) = engine();
        let id = engine
            .register_source(SourceDesc::new("clip").at(Vec3::new(3.0, 0.0, 3.0)))
            .unwrap();
        let _ = engine.play(id).unwrap();
        requests.try_recv().unwrap().1.send(Ok(tone(8_000))).unwrap();
        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        assert!(engine.spatial_params(id).unwrap().hrir.is_some());

        let mut out = vec![0.0; 300];
        engine.render(&mut out);
        let left: f32 = out.iter().step_by(2).map(|s| s * s).sum();
        let right: f32 = out.iter().skip(1).step_by(2).map(|s| s * s).sum();
        assert!(left > 0.0 && right > 0.0);
        assert!(right > left, "source on the right is louder in the right ear");
        assert!(engine.source(id).unwrap().current_time() > 0.0);

        let metrics = engine.metrics();
        assert_eq!(metrics.active_source_count, 1);
        assert_eq!(metrics.estimated_cost, 2 * 16 + VOICE_OVERHEAD_MACS);
    }

    #[test]
    fn test_source_finishes() {
        let (mut engine, requests) = engine();
        let id = engine.register_source(SourceDesc::new("blip")).unwrap();
        let _ = engine.play(id).unwrap();
        requests.try_recv().unwrap().1.send(Ok(tone(100))).unwrap();
        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        engine.drain_events();

        let mut out = vec![0.0; 512];
        engine.render(&mut out);
        let source = engine.source(id).unwrap();
        assert_eq!(source.playback_state(), PlaybackState::Stopped);
        assert!(source.current_time().abs() < 1e-9);
        assert!(engine
            .drain_events()
            .iter()
            .any(|e| *e == AudioEvent::SourceFinished { source: id }));
    }

    #[test]
    fn test_seek_and_pause_keep_playhead() {
        let (mut engine, requests) = engine();
        let id = engine.register_source(SourceDesc::new("clip")).unwrap();
        let _ = engine.play(id).unwrap();
        requests.try_recv().unwrap().1.send(Ok(tone(8_000))).unwrap();
        engine.poll_loads();

        engine.seek(id, 0.5).unwrap();
        engine.pause(id).unwrap();
        assert!((engine.source(id).unwrap().current_time() - 0.5).abs() < 1e-9);
        engine.seek(id, 5.0).unwrap();
        assert!((engine.source(id).unwrap().current_time() - 1.0).abs() < 1e-9);
        engine.stop(id).unwrap();
        assert!(engine.source(id).unwrap().current_time().abs() < 1e-9);
        engine.pause(id).unwrap();
        assert_eq!(engine.source(id).unwrap().playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_hrtf_cleared_falls_back() {
        let (mut engine, requests) = engine();
        engine.set_hrtf_table(None);
        let id = engine
            .register_source(SourceDesc::new("clip").at(Vec3::new(-4.0, 0.0, 0.0)))
            .unwrap();
        let _ = engine.play(id).unwrap();
        requests.try_recv().unwrap().1.send(Ok(tone(8_000))).unwrap();
        engine.set_listener_pose(ListenerPose::at(Vec3::ZERO));
        let params = engine.spatial_params(id).unwrap();
        assert!(params.hrir.is_none());
        assert!(params.pan < -0.99);

        let mut out = vec![0.0; 256];
        engine.render(&mut out);
        let left: f32 = out.iter().step_by(2).map(|s| s * s).sum();
        let right: f32 = out.iter().skip(1).step_by(2).map(|s| s * s).sum();
        assert!(left > right * 100.0);
    }
}
