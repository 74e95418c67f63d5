use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{AuraError, Result};

/// Upper edge of the low band.
pub const LOW_BAND_LIMIT_HZ: f32 = 250.0;
/// Upper edge of the mid band.
pub const MID_BAND_LIMIT_HZ: f32 = 2000.0;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const AMPLITUDE_GAIN: f32 = 2.5;
const LOW_BAND_BOOST: f32 = 2.0;
const MID_BAND_BOOST: f32 = 1.5;
const HIGH_BAND_BOOST: f32 = 1.5;

/// Scalar features handed to the visual front end. Every field is in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFeatures {
    pub overall_amplitude: f32,
    pub low_band_energy: f32,
    pub mid_band_energy: f32,
    pub high_band_energy: f32,
}

/// Read-only analysis tap on the master bus. Keeps the most recent
/// `fft_size` samples and derives [`AudioFeatures`] from them on demand.
pub struct AnalysisEngine {
    sample_rate: u32,
    fft_size: usize,
    window: Vec<f32>,
    cursor: usize,
    processed_samples: usize,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl AnalysisEngine {
    pub fn new(sample_rate: u32, fft_size: usize) -> Result<Self> {
        if sample_rate == 0 {
            return Err(AuraError::InvalidInput("analysis requires a sample rate"));
        }
        if fft_size < 2 {
            return Err(AuraError::InvalidInput(
                "analysis requires blocks with at least two samples",
            ));
        }

        Ok(Self {
            sample_rate,
            fft_size,
            window: vec![0.0; fft_size],
            cursor: 0,
            processed_samples: 0,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        })
    }

    /// Returns the sample rate associated with the engine.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of frequency bins produced per analysis.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn processed_samples(&self) -> usize {
        self.processed_samples
    }

    /// Clears the tap while preserving configuration.
    pub fn reset(&mut self) {
        self.window.fill(0.0);
        self.cursor = 0;
        self.processed_samples = 0;
    }

    /// Appends samples to the tap, overwriting the oldest ones.
    pub fn push_samples(&mut self, samples: &[f32]) {
        for sample in samples {
            self.window[self.cursor] = *sample;
            self.cursor = (self.cursor + 1) % self.fft_size;
        }
        self.processed_samples += samples.len();
    }

    /// Time-domain snapshot, oldest sample first.
    pub fn time_domain(&self) -> Vec<f32> {
        let (newest, oldest) = self.window.split_at(self.cursor);
        oldest.iter().chain(newest).copied().collect()
    }

    /// Per-bin magnitudes mapped onto [0, 1] between -100 dB and -30 dB.
    pub fn frequency_data(&mut self) -> Result<Vec<f32>> {
        let samples = self.time_domain();
        let len = samples.len();
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let bins = len / 2;
        Ok(fft
            .spectrum
            .iter()
            .take(bins)
            .map(|bin| normalise_decibels(bin.norm() / len as f32))
            .collect())
    }

    /// Derives amplitude and band energies from the current tap contents.
    pub fn features(&mut self) -> Result<AudioFeatures> {
        let rms = compute_rms(&self.window);
        let spectrum = self.frequency_data()?;

        let nyquist = self.sample_rate as f32 / 2.0;
        let bins = spectrum.len();
        let band_edge = |hz: f32| (((hz / nyquist) * bins as f32).floor() as usize).min(bins);
        let low_end = band_edge(LOW_BAND_LIMIT_HZ);
        let mid_end = band_edge(MID_BAND_LIMIT_HZ).max(low_end);

        Ok(AudioFeatures {
            overall_amplitude: (rms * AMPLITUDE_GAIN).min(1.0),
            low_band_energy: band_energy(&spectrum[..low_end], LOW_BAND_BOOST),
            mid_band_energy: band_energy(&spectrum[low_end..mid_end], MID_BAND_BOOST),
            high_band_energy: band_energy(&spectrum[mid_end..], HIGH_BAND_BOOST),
        })
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        if self.fft.as_ref().is_some_and(|fft| fft.size != size) {
            self.fft = None;
        }

        let planner = &mut self.fft_planner;
        self.fft.get_or_insert_with(|| {
            let plan = planner.plan_fft_forward(size);
            FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            }
        })
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.fft_size)
            .field("processed_samples", &self.processed_samples)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn band_energy(bins: &[f32], boost: f32) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let mean = bins.iter().sum::<f32>() / bins.len() as f32;
    (mean * boost).min(1.0)
}

fn normalise_decibels(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * magnitude.log10();
    ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0)
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
