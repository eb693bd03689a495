pub mod janitor;
pub mod pipeline;

pub use janitor::EmbeddingJanitor;
pub use pipeline::{SummaryLlm, SummaryPipeline};
