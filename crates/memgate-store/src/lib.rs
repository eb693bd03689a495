pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use manager::{is_system_message, Store};
pub use types::*;
