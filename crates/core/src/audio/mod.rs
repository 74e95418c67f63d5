use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use crate::{config::AudioConfig, graph::AudioGraph, AudioFeatures, AuraError, Result};

/// Whether the device clock is currently advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Running,
    Suspended,
}

/// Monotonic time reference owned by the audio output device.
///
/// The clock is distinct from wall time: it only moves while the device is
/// running and can be suspended and resumed explicitly.
pub trait AudioClock {
    /// Current device time in seconds.
    fn now(&self) -> f64;

    fn state(&self) -> ClockState;

    /// Starts or restarts the clock. Fails when the device is unavailable.
    fn resume(&mut self) -> Result<()>;

    fn suspend(&mut self) -> Result<()>;
}

#[derive(Debug)]
struct ManualClockState {
    time: f64,
    state: ClockState,
    freeze_when_suspended: bool,
    available: bool,
}

/// Clock advanced by hand. Used for simulation and tests; clones share the
/// same underlying time so a driver can keep a handle while the controller
/// owns the device.
#[derive(Debug, Clone)]
pub struct ManualClock {
    shared: Arc<Mutex<ManualClockState>>,
}

impl ManualClock {
    /// A running clock at time zero that stops while suspended, like a real
    /// output device.
    pub fn new() -> Self {
        Self::with_state(ManualClockState {
            time: 0.0,
            state: ClockState::Running,
            freeze_when_suspended: true,
            available: true,
        })
    }

    /// A clock that keeps advancing while suspended. Models devices whose
    /// hardware clock cannot be stopped.
    pub fn free_running() -> Self {
        let clock = Self::new();
        clock.lock().freeze_when_suspended = false;
        clock
    }

    /// A clock whose device refuses to start.
    pub fn unavailable() -> Self {
        let clock = Self::new();
        {
            let mut inner = clock.lock();
            inner.available = false;
            inner.state = ClockState::Suspended;
        }
        clock
    }

    /// Connects or disconnects the simulated device. While disconnected both
    /// resume and suspend fail.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    fn with_state(state: ManualClockState) -> Self {
        Self {
            shared: Arc::new(Mutex::new(state)),
        }
    }

    /// Moves time forward by `seconds` unless the clock is frozen.
    pub fn advance(&self, seconds: f64) {
        let mut inner = self.lock();
        if inner.state == ClockState::Running || !inner.freeze_when_suspended {
            inner.time += seconds.max(0.0);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualClockState> {
        // The state is plain data, so a poisoned lock is still usable.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        self.lock().time
    }

    fn state(&self) -> ClockState {
        self.lock().state
    }

    fn resume(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.available {
            return Err(AuraError::device("simulated device is unavailable"));
        }
        inner.state = ClockState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.available {
            return Err(AuraError::device("simulated device is unavailable"));
        }
        inner.state = ClockState::Suspended;
        Ok(())
    }
}

/// Device clock driven by the host's monotonic timer. Time accumulates only
/// while running.
#[derive(Debug, Clone)]
pub struct InstantClock {
    accumulated: f64,
    running_since: Option<Instant>,
}

impl InstantClock {
    pub fn start() -> Self {
        Self {
            accumulated: 0.0,
            running_since: Some(Instant::now()),
        }
    }
}

impl AudioClock for InstantClock {
    fn now(&self) -> f64 {
        self.accumulated
            + self
                .running_since
                .map(|since| since.elapsed().as_secs_f64())
                .unwrap_or(0.0)
    }

    fn state(&self) -> ClockState {
        if self.running_since.is_some() {
            ClockState::Running
        } else {
            ClockState::Suspended
        }
    }

    fn resume(&mut self) -> Result<()> {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed().as_secs_f64();
        }
        Ok(())
    }
}

/// High level audio device façade: a clock plus the signal graph every
/// instrument renders into.
#[derive(Debug)]
pub struct AudioDevice<C> {
    clock: C,
    sample_rate: u32,
    graph: GraphHandle,
}

impl<C: AudioClock> AudioDevice<C> {
    /// Builds the fixed signal graph around `clock`.
    pub fn open(clock: C, config: &AudioConfig) -> Result<Self> {
        let graph = AudioGraph::new(config)?;
        tracing::debug!(sample_rate = config.sample_rate, "audio device opened");
        Ok(Self {
            clock,
            sample_rate: config.sample_rate,
            graph: GraphHandle::new(graph),
        })
    }

    /// Returns the sample rate the device operates at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_state(&self) -> ClockState {
        self.clock.state()
    }

    pub fn resume(&mut self) -> Result<()> {
        self.clock.resume()
    }

    pub fn suspend(&mut self) -> Result<()> {
        self.clock.suspend()
    }

    /// Shared handle to the signal graph.
    pub fn graph(&self) -> GraphHandle {
        self.graph.clone()
    }
}

/// Shared, thread-safe view over the graph owned by [`AudioDevice`].
#[derive(Clone)]
pub struct GraphHandle {
    shared: Arc<Mutex<AudioGraph>>,
}

impl GraphHandle {
    pub(crate) fn new(graph: AudioGraph) -> Self {
        Self {
            shared: Arc::new(Mutex::new(graph)),
        }
    }

    /// Runs `f` with exclusive access to the graph.
    pub fn with<R>(&self, f: impl FnOnce(&mut AudioGraph) -> R) -> Result<R> {
        let mut graph = self.lock()?;
        Ok(f(&mut graph))
    }

    /// Master gain as heard at `time`.
    pub fn master_gain_at(&self, time: f64) -> Result<f32> {
        self.with(|graph| graph.master_gain().value_at(time))
    }

    /// Scalar features read from the analysis tap.
    pub fn features(&self) -> Result<AudioFeatures> {
        let mut graph = self.lock()?;
        graph.features()
    }

    fn lock(&self) -> Result<MutexGuard<'_, AudioGraph>> {
        self.shared
            .lock()
            .map_err(|_| AuraError::Poisoned("audio graph"))
    }
}

impl std::fmt::Debug for GraphHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphHandle").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_freezes_while_suspended() {
        let mut clock = ManualClock::new();
        let driver = clock.clone();

        driver.advance(1.5);
        assert_eq!(clock.now(), 1.5);

        clock.suspend().unwrap();
        driver.advance(10.0);
        assert_eq!(clock.now(), 1.5);

        clock.resume().unwrap();
        driver.advance(0.5);
        assert_eq!(clock.now(), 2.0);
    }

    #[test]
    fn free_running_clock_keeps_advancing() {
        let mut clock = ManualClock::free_running();
        clock.suspend().unwrap();
        clock.advance(3.0);
        assert_eq!(clock.now(), 3.0);
        assert_eq!(clock.state(), ClockState::Suspended);
    }

    #[test]
    fn unavailable_clock_refuses_to_resume() {
        let mut clock = ManualClock::unavailable();
        let err = clock.resume().unwrap_err();
        assert!(matches!(err, AuraError::AudioDevice(_)));
        assert_eq!(clock.state(), ClockState::Suspended);
    }

    #[test]
    fn disconnected_clock_refuses_to_suspend() {
        let mut clock = ManualClock::new();
        clock.set_available(false);
        assert!(clock.suspend().is_err());
        assert_eq!(clock.state(), ClockState::Running);

        clock.set_available(true);
        clock.suspend().unwrap();
        assert_eq!(clock.state(), ClockState::Suspended);
    }

    #[test]
    fn instant_clock_stops_accumulating_when_suspended() {
        let mut clock = InstantClock::start();
        clock.suspend().unwrap();
        let frozen = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.now(), frozen);
        clock.resume().unwrap();
        assert!(clock.now() >= frozen);
    }

    #[test]
    fn device_shares_its_graph() {
        let device = AudioDevice::open(ManualClock::new(), &AudioConfig::default()).unwrap();
        let handle = device.graph();
        handle
            .with(|graph| graph.master_gain_mut().set_value_at_time(0.25, 0.0))
            .unwrap();
        assert_eq!(device.graph().master_gain_at(1.0).unwrap(), 0.25);
    }
}
