use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure is fatal to the run; nothing here is retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("video source unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),
    #[error("inference request failed: {0}")]
    RemoteRequestFailure(String),
    #[error("no frames were sampled, cannot compute per-frame cost")]
    EmptyResult,
    #[error("target fps must be a positive finite number, got {0}")]
    InvalidSampleRate(f64),
    #[error("video reports an unusable native frame rate ({0})")]
    FrameRateUnavailable(f64),
    #[error("failed to decode video: {0}")]
    Decode(String),
    #[error("failed to encode frame {frame_number}: {source}")]
    Encode {
        frame_number: u32,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
