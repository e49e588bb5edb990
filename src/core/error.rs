use thiserror::Error;

/// Errors surfaced by the ingestion pipeline, store, and exposition path.
#[derive(Error, Debug)]
pub enum SpoutError {
    #[error("stream transport error: {0}")]
    Stream(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("exposition encoding error: {0}")]
    Encode(#[from] prometheus::Error),

    #[error("unknown metric category: {0}")]
    UnknownCategory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("channel send error")]
    ChannelSend,

    #[error("buffer full: cannot store more items")]
    BufferFull,
}

/// Result type alias for Spout operations
pub type Result<T> = std::result::Result<T, SpoutError>;

impl SpoutError {
    /// Creates a new stream transport error
    pub fn stream<S: Into<String>>(msg: S) -> Self {
        Self::Stream(msg.into())
    }

    /// Creates a new store error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ChannelSend | Self::BufferFull => true,
            Self::Encode(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Stream(_) => "stream",
            Self::Store(_) => "store",
            Self::Config(_) | Self::ConfigParse(_) => "config",
            Self::Encode(_) => "encode",
            Self::UnknownCategory(_) => "validation",
            Self::Io(_) => "io",
            Self::Join(_) => "async",
            Self::ChannelSend => "channel",
            Self::BufferFull => "buffer",
        }
    }
}
