//! Storage backend traits.

mod index;
mod persistence;
mod vector;

pub use index::{MemoryBackend, MemoryBackendKind, MemoryQuery};
pub use persistence::{Forwarder, SignalSink};
pub use vector::{VectorFilter, VectorMatch, VectorStore};
