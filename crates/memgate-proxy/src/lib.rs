pub mod backend;
pub mod citation;
pub mod error;
pub mod relay;
pub mod stream;

pub use backend::{resolve, ResolvedBackend};
pub use citation::strip_citations;
pub use error::{ProxyError, Result};
pub use relay::{decide_mode, ChatStream, RelayAccumulator, RelayClient, RelayMode};
