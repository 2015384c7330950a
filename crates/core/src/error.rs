//! Error types shared by the streaming client and the session controller.

/// Failures of a single streaming call to the generation endpoint.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The request could not be sent or the body could not be read.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The endpoint answered with a non-success status.
    #[error("API error: {status} {body}")]
    Service { status: u16, body: String },
    /// The response body failed mid-stream for a reason other than transport.
    #[error("stream error: {0}")]
    Body(String),
}

/// Errors surfaced by the session controller's actions.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Required input was empty; nothing was dispatched.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("persistence failed: {0}")]
    Persistence(anyhow::Error),
    #[error("export failed: {0}")]
    Export(anyhow::Error),
}

impl GenerationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
