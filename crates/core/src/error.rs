/// Result alias that carries the custom [`AuraError`] type.
pub type Result<T> = std::result::Result<T, AuraError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AuraError {
    /// Free-form message for failures that do not deserve their own variant.
    #[error("{0}")]
    Message(String),
    /// A caller handed the engine a value it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The audio output device could not be opened or resumed. Playback is
    /// abandoned but the process keeps running.
    #[error("audio device unavailable: {0}")]
    AudioDevice(String),
    /// A shared handle was poisoned by a panic on another thread.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or song parameters failed to (de)serialise.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// The analysis FFT rejected its buffers.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl AuraError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a device error from anything printable.
    pub fn device<T: Into<String>>(reason: T) -> Self {
        Self::AudioDevice(reason.into())
    }
}

impl From<&str> for AuraError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for AuraError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
