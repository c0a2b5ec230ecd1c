pub mod local;
pub mod qdrant;

pub use local::LocalCollection;
pub use qdrant::{QdrantCollection, DEFAULT_QDRANT_TIMEOUT};
