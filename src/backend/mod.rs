//! Out-of-core persistence: the file backend and its write cache.

mod file_backend;
mod write_cache;

pub use file_backend::{FileBackend, OpenMode, DEFAULT_CACHE_BOXES};
pub use write_cache::WriteCache;
