use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("no default backend configured and model carries no '/' passthrough marker")]
    NoDefaultBackend,

    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream timed out after {0}s")]
    Timeout(u64),

    #[error("upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("malformed upstream payload: {0}")]
    MalformedPayload(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
