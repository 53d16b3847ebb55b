use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("UI subsystem error: {0}")]
    Ui(#[from] UiError),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Output device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("Device does not support {rate} Hz mono output")]
    RateNotSupported { rate: u32 },

    #[error("Format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("Device is not open")]
    DeviceClosed,

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

/// Startup acquisition failures for the input/output loop. Surfaced to the
/// caller of `start()`; everything after startup is contained and logged.
#[derive(Error, Debug)]
pub enum UiError {
    #[error("Terminal unavailable: {0}")]
    TerminalUnavailable(#[source] std::io::Error),
}

/// Why a PCM buffer was rejected before it reached the device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PcmError {
    #[error("Empty sample buffer")]
    Empty,

    #[error("Odd byte length {len}, expected whole 16-bit frames")]
    OddLength { len: usize },

    #[error("Sample rate must be positive")]
    ZeroRate,
}
