//! `SQLite` signal store.
//!
//! One database holds every forwarded signal and an FTS5 index over its
//! summary and text, so the same store serves as [`SignalSink`] and as the
//! keyword [`MemoryBackend`].
//!
//! [`SignalSink`]: crate::storage::SignalSink
//! [`MemoryBackend`]: crate::storage::MemoryBackend

mod connection;
mod store;

pub use connection::{acquire_lock, configure_connection};
pub use store::SqliteSignalStore;
