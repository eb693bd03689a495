use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("Upstream timeout after {ms}ms")]
    UpstreamTimeout { ms: u64 },

    #[error("Upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("JSON-RPC parse error: {0}")]
    RpcParse(String),

    #[error("JSON-RPC method not found: {method}")]
    RpcMethodNotFound { method: String },

    #[error("JSON-RPC invalid params: {0}")]
    RpcInvalidParams(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Short error code used in logs and (where applicable) echoed as part
    /// of a JSON-RPC error body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::Store(_) => "STORE_ERROR",
            GatewayError::UpstreamTransport(_) => "UPSTREAM_TRANSPORT_ERROR",
            GatewayError::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            GatewayError::UpstreamStatus { .. } => "UPSTREAM_STATUS_ERROR",
            GatewayError::RpcParse(_) => "RPC_PARSE_ERROR",
            GatewayError::RpcMethodNotFound { .. } => "RPC_METHOD_NOT_FOUND",
            GatewayError::RpcInvalidParams(_) => "RPC_INVALID_PARAMS",
            GatewayError::Serialization(_) => "SERIALIZATION_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// JSON-RPC 2.0 error code, for variants that originate from the tool
    /// protocol transport. `None` for errors that never cross that boundary
    /// (upstream failures map to HTTP status codes instead, see §7).
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            GatewayError::RpcParse(_) => Some(-32700),
            GatewayError::RpcMethodNotFound { .. } => Some(-32601),
            GatewayError::RpcInvalidParams(_) => Some(-32602),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
