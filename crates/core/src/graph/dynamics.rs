//! Soft-knee compressor and limiter for the master bus.

/// Static curve and timing of a feed-forward dynamics processor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicsSettings {
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
}

impl DynamicsSettings {
    /// Gentle bus compression.
    pub const COMPRESSOR: DynamicsSettings = DynamicsSettings {
        threshold_db: -20.0,
        knee_db: 30.0,
        ratio: 6.0,
        attack_secs: 0.003,
        release_secs: 0.4,
    };

    /// Hard-knee brickwall just under full scale.
    pub const LIMITER: DynamicsSettings = DynamicsSettings {
        threshold_db: -0.5,
        knee_db: 0.0,
        ratio: 20.0,
        attack_secs: 0.001,
        release_secs: 0.1,
    };

    /// Output level in dB for a static input level.
    pub fn curve(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        if 2.0 * over < -self.knee_db {
            level_db
        } else if self.knee_db > 0.0 && 2.0 * over.abs() <= self.knee_db {
            let knee_in = over + self.knee_db / 2.0;
            level_db + (1.0 / self.ratio - 1.0) * knee_in * knee_in / (2.0 * self.knee_db)
        } else {
            self.threshold_db + over / self.ratio
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dynamics {
    settings: DynamicsSettings,
    attack_coeff: f32,
    release_coeff: f32,
    /// Smoothed gain reduction in dB, always <= 0.
    reduction_db: f32,
}

impl Dynamics {
    pub fn new(settings: DynamicsSettings, sample_rate: u32) -> Self {
        let coeff = |seconds: f32| (-1.0 / (seconds * sample_rate as f32)).exp();
        Self {
            settings,
            attack_coeff: coeff(settings.attack_secs),
            release_coeff: coeff(settings.release_secs),
            reduction_db: 0.0,
        }
    }

    pub fn settings(&self) -> &DynamicsSettings {
        &self.settings
    }

    /// Current gain reduction in dB.
    pub fn reduction_db(&self) -> f32 {
        self.reduction_db
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        let level_db = 20.0 * sample.abs().max(1e-9).log10();
        let target = (self.settings.curve(level_db) - level_db).min(0.0);
        let coeff = if target < self.reduction_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.reduction_db = coeff * self.reduction_db + (1.0 - coeff) * target;
        sample * 10f32.powf(self.reduction_db / 20.0)
    }

    pub fn reset(&mut self) {
        self.reduction_db = 0.0;
    }
}
