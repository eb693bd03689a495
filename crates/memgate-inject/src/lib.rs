pub mod engine;
pub mod keywords;

pub use engine::{AutoInjectEngine, MAX_INJECT_CHARS};
