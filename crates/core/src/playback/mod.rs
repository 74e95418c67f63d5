//! Playback state machine wrapping the lookahead scheduler.
//!
//! The controller is driven from a single thread: UI calls such as
//! [`PlaybackController::pause`] and the periodic [`PlaybackController::tick`]
//! never interleave, so a transition issued between ticks takes effect on the
//! next tick. Fades are scheduled on the master gain; anything that has to
//! wait for a fade to finish (suspending the clock, releasing instruments) is
//! recorded as a deadline and serviced by `tick`.

use std::{mem, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    audio::{AudioClock, AudioDevice, ClockState, GraphHandle},
    config::{EngineConfig, PlaybackConfig, SchedulerConfig},
    generator::SongGenerator,
    graph::GainParam,
    instruments::{InstrumentSink, Voicing},
    scheduler::{LookaheadScheduler, SchedulerEvent, SchedulerState},
    AudioFeatures, AuraError, Result, SongParameters,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

pub struct PlaybackController<C, S> {
    playback: PlaybackConfig,
    scheduling: SchedulerConfig,
    generator: SongGenerator,
    device: AudioDevice<C>,
    graph: GraphHandle,
    sink: S,
    voicing: Box<dyn Voicing>,
    state: PlaybackState,
    song: Option<Arc<SongParameters>>,
    scheduler: Option<LookaheadScheduler>,
    generation: u64,
    /// Clock time after which the pause fade is over and the clock may stop.
    pending_suspend: Option<f64>,
    /// Clock time after which the stop fade is over and instruments go.
    pending_release: Option<f64>,
    /// Events produced outside `tick` (start, resume) awaiting collection.
    outbox: Vec<SchedulerEvent>,
}

impl<C: AudioClock, S: InstrumentSink> PlaybackController<C, S> {
    pub fn new(
        config: &EngineConfig,
        device: AudioDevice<C>,
        sink: S,
        voicing: Box<dyn Voicing>,
    ) -> Self {
        let graph = device.graph();
        Self {
            playback: config.playback.clone(),
            scheduling: config.scheduler.clone(),
            generator: SongGenerator::new(config.generator.clone()),
            device,
            graph,
            sink,
            voicing,
            state: PlaybackState::Stopped,
            song: None,
            scheduler: None,
            generation: 0,
            pending_suspend: None,
            pending_release: None,
            outbox: Vec::new(),
        }
    }

    /// Starts `params` from bar zero. Anything already playing is stopped
    /// first.
    ///
    /// Fails when the audio device cannot be resumed; the controller is then
    /// left `Stopped` and nothing is scheduled.
    pub fn start(&mut self, params: SongParameters) -> Result<()> {
        if self.state != PlaybackState::Stopped {
            self.stop();
        }
        self.launch(Arc::new(params))
    }

    /// Generates a song from `seed` (or a fresh seed) and starts it.
    pub fn start_seed(&mut self, seed: Option<&str>) -> Result<Arc<SongParameters>> {
        let params = self.generator.generate(seed.unwrap_or_default());
        self.start(params)?;
        self.current_song()
    }

    /// Fades out, then suspends the audio clock once the fade is over.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            tracing::debug!(state = ?self.state, "pause ignored");
            return;
        }

        let now = self.device.now();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.halt();
        }
        let fade = self.playback.pause_fade_secs;
        self.fade_master(|gain| gain.fade_to(now, 0.0, fade));
        self.pending_suspend = Some(now + fade + self.playback.suspend_grace_secs);
        self.state = PlaybackState::Paused;
        tracing::info!(generation = self.generation, time = now, "playback paused");
    }

    /// Continues a paused song, or starts a prepared one.
    ///
    /// The musical position is recomputed from the song start on the audio
    /// clock, so it picks up exactly where the clock says it is.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != PlaybackState::Paused {
            tracing::debug!(state = ?self.state, "resume ignored");
            return Ok(());
        }

        if self.scheduler.is_none() {
            let Some(song) = self.song.clone() else {
                self.state = PlaybackState::Stopped;
                return Ok(());
            };
            return self.launch(song);
        }

        let gain = self.playback.master_gain;
        let fade = self.playback.fade_in_secs;
        let now = if self.pending_suspend.take().is_some() {
            // The clock never stopped; fade back from wherever the pause
            // fade got to.
            let now = self.device.now();
            self.fade_master(|param| param.fade_to(now, gain, fade));
            now
        } else {
            self.device.resume()?;
            let now = self.device.now();
            self.fade_master(|param| param.fade_from(now, 0.0, gain, fade));
            now
        };

        let mut events = match self.scheduler.as_mut() {
            Some(scheduler) => scheduler.resume_at(now),
            None => Vec::new(),
        };
        self.state = PlaybackState::Playing;
        tracing::info!(generation = self.generation, time = now, "playback resumed");

        if let Some(scheduler) = self.scheduler.as_mut() {
            events.extend(scheduler.poll(now));
        }
        self.settle(events)
    }

    /// Halts scheduling, purges pending notes and fades out. Instruments are
    /// released once the fade is over.
    pub fn stop(&mut self) {
        if self.state == PlaybackState::Stopped {
            tracing::debug!("stop ignored");
            return;
        }

        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.halt();
        }
        self.sink.cancel_all();
        self.outbox.clear();
        self.pending_suspend = None;

        let now = self.device.now();
        if self.device.clock_state() == ClockState::Suspended {
            self.release_instruments();
        } else {
            let fade = self.playback.stop_fade_secs;
            self.fade_master(|gain| gain.fade_to(now, 0.0, fade));
            self.pending_release = Some(now + fade + self.playback.release_grace_secs);
        }

        self.song = None;
        self.state = PlaybackState::Stopped;
        tracing::info!(generation = self.generation, time = now, "playback stopped");
    }

    /// Stops the current song and starts `params`.
    pub fn skip(&mut self, params: SongParameters) -> Result<()> {
        tracing::info!(seed = %params.seed, "skipping to a new song");
        self.stop();
        self.launch(Arc::new(params))
    }

    pub fn skip_seed(&mut self, seed: Option<&str>) -> Result<Arc<SongParameters>> {
        let params = self.generator.generate(seed.unwrap_or_default());
        self.skip(params)?;
        self.current_song()
    }

    /// Loads `params` without playing it. The controller is left `Paused`
    /// and a later [`resume`](Self::resume) starts the song from bar zero.
    pub fn prepare(&mut self, params: SongParameters) {
        self.stop();
        tracing::info!(seed = %params.seed, "song prepared");
        self.song = Some(Arc::new(params));
        self.state = PlaybackState::Paused;
    }

    /// One wake-up of the driver.
    ///
    /// Services fade deadlines, polls the scheduler while playing and hands
    /// every beat to the voicing. Returns the events emitted since the last
    /// call, in time order.
    pub fn tick(&mut self) -> Result<Vec<SchedulerEvent>> {
        let now = self.device.now();

        if self.pending_release.is_some_and(|at| now >= at) {
            self.release_instruments();
        }

        if self.pending_suspend.is_some_and(|at| now >= at) {
            self.device.suspend()?;
            self.pending_suspend = None;
            if let Some(scheduler) = self.scheduler.as_mut() {
                scheduler.mark_paused(now);
            }
            tracing::debug!(time = now, "audio clock suspended");
        }

        let mut events = mem::take(&mut self.outbox);
        if self.state == PlaybackState::Playing {
            if let Some(scheduler) = self.scheduler.as_mut() {
                let fresh = scheduler.poll(now);
                self.settle(fresh)?;
                events.append(&mut self.outbox);
            }
        }
        Ok(events)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn song(&self) -> Option<&Arc<SongParameters>> {
        self.song.as_ref()
    }

    /// Snapshot of the scheduler, or the neutral state when nothing plays.
    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler
            .as_ref()
            .map(|scheduler| scheduler.state().clone())
            .unwrap_or_default()
    }

    /// Fractional beats since the song started. Frozen at the pause snapshot
    /// while the clock is suspended.
    pub fn musical_position(&self) -> Option<f64> {
        let scheduler = self.scheduler.as_ref()?;
        Some(
            scheduler
                .state()
                .paused_at_musical_beat
                .unwrap_or_else(|| scheduler.musical_position(self.device.now())),
        )
    }

    /// Master gain as currently heard.
    pub fn master_gain(&self) -> Result<f32> {
        self.graph.master_gain_at(self.device.now())
    }

    pub fn features(&self) -> Result<AudioFeatures> {
        self.graph.features()
    }

    /// Number of songs started so far. Every emitted event carries the
    /// generation of the song it belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// How often the driver should call [`tick`](Self::tick).
    pub fn wake_interval(&self) -> Duration {
        self.scheduling.wake_interval()
    }

    pub fn device(&self) -> &AudioDevice<C> {
        &self.device
    }

    pub fn graph(&self) -> GraphHandle {
        self.graph.clone()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn launch(&mut self, song: Arc<SongParameters>) -> Result<()> {
        if self.pending_release.is_some() {
            self.release_instruments();
        }

        if let Err(err) = self.device.resume() {
            tracing::warn!(%err, "audio device unavailable, staying stopped");
            self.song = None;
            self.state = PlaybackState::Stopped;
            return Err(err);
        }

        let now = self.device.now();
        let generation = self.generation + 1;
        let scheduler = LookaheadScheduler::new(
            Arc::clone(&song),
            generation,
            &self.scheduling,
            now + self.scheduling.start_offset_secs,
        )?;

        let instruments = self.voicing.instruments().to_vec();
        let gain = self.playback.master_gain;
        let fade = self.playback.fade_in_secs;
        self.graph.with(|graph| {
            for instrument in instruments {
                graph.connect(instrument);
            }
            graph.master_gain_mut().fade_from(now, 0.0, gain, fade);
        })?;
        self.voicing.reset();

        tracing::info!(generation, seed = %song.seed, time = now, "playback started");
        self.generation = generation;
        self.scheduler = Some(scheduler);
        self.song = Some(song);
        self.state = PlaybackState::Playing;

        let events = match self.scheduler.as_mut() {
            Some(scheduler) => scheduler.poll(now),
            None => Vec::new(),
        };
        self.settle(events)
    }

    /// Voices every beat in `events`, stops on song end and queues the events
    /// for the next `tick`.
    fn settle(&mut self, events: Vec<SchedulerEvent>) -> Result<()> {
        let mut ended = false;
        for event in &events {
            match event {
                SchedulerEvent::Beat(context) => {
                    for note in self.voicing.voice(context) {
                        self.sink.trigger(note)?;
                    }
                }
                SchedulerEvent::SongEnd { .. } => ended = true,
                _ => {}
            }
        }

        if ended {
            tracing::info!(generation = self.generation, "song finished");
            self.stop();
        }
        self.outbox.extend(events);
        Ok(())
    }

    fn release_instruments(&mut self) {
        self.pending_release = None;
        self.sink.release();
        match self.graph.with(|graph| graph.disconnect_all()) {
            Ok(released) => tracing::debug!(released, "instruments released"),
            Err(err) => tracing::warn!(%err, "could not release instruments"),
        }
    }

    fn fade_master(&self, fade: impl FnOnce(&mut GainParam)) {
        if let Err(err) = self.graph.with(|graph| fade(graph.master_gain_mut())) {
            tracing::warn!(%err, "master gain automation skipped");
        }
    }

    fn current_song(&self) -> Result<Arc<SongParameters>> {
        self.song
            .clone()
            .ok_or_else(|| AuraError::msg("no song is loaded"))
    }
}

impl<C, S> std::fmt::Debug for PlaybackController<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("pending_suspend", &self.pending_suspend)
            .field("pending_release", &self.pending_release)
            .finish()
    }
}
