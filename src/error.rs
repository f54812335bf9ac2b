use thiserror::Error;

/// Failure classes surfaced by the pipeline stages. The stage driver maps
/// these onto the failing stage name recorded in the task registry; the
/// variants themselves never reach the user channel verbatim.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("provider failure: {0}")]
    Provider(String),

    #[error("missing resource: {0}")]
    Resource(String),

    #[error("encoding failure: {0}")]
    Encoding(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }
}
