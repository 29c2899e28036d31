//! Storage seams consumed by the pipeline.
//!
//! The pipeline never owns a database. It talks to four capabilities:
//! - **Vector store**: nearest-neighbour lookup for semantic fingerprints
//! - **Memory backends**: historical context, by vector similarity or keywords
//! - **Signal sink**: persistence of forwarded signals
//! - **Forwarder**: downstream delivery of forwarded signals
//!
//! In-process implementations cover tests and single-node runs; the `SQLite`
//! store doubles as sink and keyword memory backend.

// Allow cast precision loss for score calculations where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod forward;
pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod vector;

pub use forward::JsonLinesForwarder;
pub use memory::InMemoryMemoryStore;
pub use sqlite::SqliteSignalStore;
pub use traits::{
    Forwarder, MemoryBackend, MemoryBackendKind, MemoryQuery, SignalSink, VectorFilter,
    VectorMatch, VectorStore,
};
pub use vector::InMemoryVectorStore;
