//! The fixed master signal chain.
//!
//! ```text
//! instrument ─┬─ dry ──> master gain ──┐
//!             └─ send ─> reverb ───────┴─> compressor ─> analysis tap ─> limiter ─> out
//! ```
//!
//! The reverb return joins after the master gain, so master fades act on the
//! dry signal only.

pub mod convolver;
pub mod dynamics;
pub mod param;

use std::collections::BTreeMap;

use crate::{
    analysis::AnalysisEngine, config::AudioConfig, instruments::InstrumentId, AudioFeatures,
    AuraError, Result,
};

pub use convolver::Convolver;
pub use dynamics::{Dynamics, DynamicsSettings};
pub use param::GainParam;

/// Gain applied to the master bus when nothing is fading.
pub const DEFAULT_MASTER_GAIN: f32 = 0.7;

/// Dry level and reverb send level for one instrument channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendLevels {
    pub dry: f32,
    pub send: f32,
}

impl SendLevels {
    pub fn for_instrument(instrument: InstrumentId) -> Self {
        let (dry, send) = match instrument {
            InstrumentId::Pad => (1.0, 0.2),
            InstrumentId::SubBass => (1.0, 0.0),
            InstrumentId::Arpeggio => (1.0, 0.8),
            InstrumentId::Lead => (1.0, 0.7),
            InstrumentId::TonalPercussion => (0.1, 1.0),
            InstrumentId::Atmosphere => (1.0, 0.0),
        };
        Self { dry, send }
    }
}

#[derive(Debug)]
pub struct AudioGraph {
    sample_rate: u32,
    master: GainParam,
    reverb: Convolver,
    compressor: Dynamics,
    analyser: AnalysisEngine,
    limiter: Dynamics,
    channels: BTreeMap<InstrumentId, SendLevels>,
    send_bus: Vec<f32>,
    reverb_return: Vec<f32>,
}

impl AudioGraph {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let analyser = AnalysisEngine::new(config.sample_rate, config.fft_size)?;
        Ok(Self {
            sample_rate: config.sample_rate,
            master: GainParam::new(DEFAULT_MASTER_GAIN),
            reverb: Convolver::new(config.block_size)?,
            compressor: Dynamics::new(DynamicsSettings::COMPRESSOR, config.sample_rate),
            analyser,
            limiter: Dynamics::new(DynamicsSettings::LIMITER, config.sample_rate),
            channels: BTreeMap::new(),
            send_bus: Vec::with_capacity(config.block_size),
            reverb_return: Vec::with_capacity(config.block_size),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn master_gain(&self) -> &GainParam {
        &self.master
    }

    pub fn master_gain_mut(&mut self) -> &mut GainParam {
        &mut self.master
    }

    pub fn master_gain_at(&self, time: f64) -> f32 {
        self.master.value_at(time)
    }

    /// Routes an instrument into the chain with its default levels.
    pub fn connect(&mut self, instrument: InstrumentId) {
        self.channels
            .insert(instrument, SendLevels::for_instrument(instrument));
    }

    pub fn disconnect(&mut self, instrument: InstrumentId) -> bool {
        self.channels.remove(&instrument).is_some()
    }

    /// Detaches every instrument and returns how many were connected.
    pub fn disconnect_all(&mut self) -> usize {
        let count = self.channels.len();
        self.channels.clear();
        count
    }

    pub fn is_connected(&self, instrument: InstrumentId) -> bool {
        self.channels.contains_key(&instrument)
    }

    pub fn connected(&self) -> impl Iterator<Item = InstrumentId> + '_ {
        self.channels.keys().copied()
    }

    /// Loads the reverb impulse response. The reverb is silent until then.
    pub fn load_impulse_response(&mut self, impulse: &[f32]) -> Result<()> {
        self.reverb.load(impulse)?;
        tracing::debug!(
            taps = impulse.len(),
            partitions = self.reverb.partition_count(),
            "reverb impulse response loaded"
        );
        Ok(())
    }

    pub fn reverb(&self) -> &Convolver {
        &self.reverb
    }

    /// Mixes one block of instrument output through the chain.
    ///
    /// `start_time` is the audio-clock time of the first output sample. Inputs
    /// from instruments that are not connected are ignored.
    pub fn render(
        &mut self,
        start_time: f64,
        inputs: &[(InstrumentId, &[f32])],
        output: &mut [f32],
    ) -> Result<()> {
        if let Some((instrument, _)) = inputs
            .iter()
            .find(|(_, samples)| samples.len() != output.len())
        {
            return Err(AuraError::msg(format!(
                "{instrument} rendered a block of the wrong length"
            )));
        }

        self.send_bus.clear();
        self.send_bus.resize(output.len(), 0.0);
        self.reverb_return.clear();
        self.reverb_return.resize(output.len(), 0.0);

        let sample_period = 1.0 / f64::from(self.sample_rate);
        for (index, (out, send)) in output.iter_mut().zip(&mut self.send_bus).enumerate() {
            let mut dry = 0.0;
            for (instrument, samples) in inputs {
                if let Some(levels) = self.channels.get(instrument) {
                    dry += samples[index] * levels.dry;
                    *send += samples[index] * levels.send;
                }
            }
            let time = start_time + index as f64 * sample_period;
            *out = dry * self.master.value_at(time);
        }

        self.reverb
            .process(&self.send_bus, &mut self.reverb_return)?;
        for (out, wet) in output.iter_mut().zip(&self.reverb_return) {
            *out = self.compressor.process(*out + wet);
        }

        self.analyser.push_samples(output);
        for sample in output.iter_mut() {
            *sample = self.limiter.process(*sample);
        }
        Ok(())
    }

    /// Features of the signal most recently seen by the analysis tap.
    pub fn features(&mut self) -> Result<AudioFeatures> {
        self.analyser.features()
    }

    pub fn analyser(&self) -> &AnalysisEngine {
        &self.analyser
    }
}
