pub type MapcapResult<T> = Result<T, MapcapError>;

#[derive(thiserror::Error, Debug)]
pub enum MapcapError {
    #[error("validation error: {0}")]
    Validation(String),

    /// Cooperative cancellation. Not a failure: the animation engine swallows
    /// this and maps it to a cancelled run outcome.
    #[error("animation aborted")]
    Aborted,

    /// Encoder backend unavailable or blocked by the environment. Triggers
    /// exactly one fallback hop in the sink selection chain.
    #[error("encoder init error: {0}")]
    EncoderInit(String),

    /// Handshake or finalization exceeded its budget. Fatal for that backend,
    /// never auto-retried.
    #[error("encoding timeout: {0}")]
    EncodingTimeout(String),

    #[error("encoding error: {0}")]
    Encode(String),

    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MapcapError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn encoder_init(msg: impl Into<String>) -> Self {
        Self::EncoderInit(msg.into())
    }

    pub fn encoding_timeout(msg: impl Into<String>) -> Self {
        Self::EncodingTimeout(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }
}
