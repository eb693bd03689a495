pub mod embedding;
pub mod hybrid;
pub mod scene;
pub mod synonym;
pub mod vector_search;

pub use embedding::EmbeddingClient;
pub use hybrid::{HybridRetrieval, RerankClient, RetrievedItem};
pub use scene::{SceneDecision, SceneDetector};
pub use synonym::SynonymExpander;
