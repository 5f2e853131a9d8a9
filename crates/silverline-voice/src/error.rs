use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("audio fetch failed with HTTP {status}")]
    FetchStatus { status: u16 },

    #[error("audio fetch failed: {0}")]
    Fetch(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("transcription engine unavailable: {0}")]
    Unavailable(&'static str),
}

impl VoiceError {
    /// Whether retrying the same fetch could succeed.
    ///
    /// Recordings are often not yet published when the webhook arrives, so
    /// 404 counts as transient alongside throttling and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::FetchStatus { status } => {
                matches!(status, 404 | 408 | 429) || (500..600).contains(status)
            }
            Self::Fetch(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Stt(_) | Self::Config(_) | Self::Unavailable(_) => false,
        }
    }
}
