//! File-backed persistence for leaf event buffers.
//!
//! The backend appends one variable-length record per write and keeps a
//! box-id-to-span index in memory. Writes are buffered through a
//! dirty-aware [`WriteCache`]; a read always observes the latest write
//! for a box id, flushed or not. An I/O failure on one box id never
//! touches any other id's record.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::errors::{StoreError, StoreResult};
use crate::event::Event;

use super::write_cache::WriteCache;

/// Default number of leaf buffers kept resident in the write cache
pub const DEFAULT_CACHE_BOXES: usize = 128;

/// How the backing file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

/// Location of one box's record in the backing file
#[derive(Debug, Clone, Copy)]
struct DiskSpan {
    offset: u64,
    len: u64,
}

struct OpenFile {
    file: File,
    path: PathBuf,
    /// Next append position. Rewrites append a fresh record and repoint
    /// the index; stale space is reclaimed only by rewriting the file.
    end_offset: u64,
}

struct BackendInner {
    open: Option<OpenFile>,
    index: HashMap<u64, DiskSpan>,
    cache: WriteCache,
}

/// Out-of-core store for leaf event buffers, keyed by box id.
pub struct FileBackend {
    inner: Mutex<BackendInner>,
}

impl FileBackend {
    /// Creates a backend with the default cache capacity. No file is
    /// attached until [`open_file`](FileBackend::open_file).
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_BOXES)
    }

    /// Creates a backend holding at most `capacity` resident buffers.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        FileBackend {
            inner: Mutex::new(BackendInner {
                open: None,
                index: HashMap::new(),
                cache: WriteCache::new(capacity),
            }),
        }
    }

    /// Opens the backing file. Any previously open file is flushed and
    /// released first.
    pub fn open_file(&self, path: impl AsRef<Path>, mode: OpenMode) -> StoreResult<()> {
        let path = path.as_ref();
        let mut inner = self.inner.lock();
        if inner.open.is_some() {
            close_locked(&mut inner)?;
        }

        let mut options = OpenOptions::new();
        options.read(true);
        if mode == OpenMode::ReadWrite {
            options.write(true).create(true);
        }
        let file = options.open(path).map_err(|e| StoreError::file(path, e))?;
        let end_offset = file
            .metadata()
            .map_err(|e| StoreError::file(path, e))?
            .len();

        log::debug!("opened event backend at {:?} ({:?})", path, mode);
        inner.open = Some(OpenFile {
            file,
            path: path.to_path_buf(),
            end_offset,
        });
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().open.is_some()
    }

    /// Path of the open backing file, or an empty string when closed.
    pub fn file_name(&self) -> String {
        self.inner
            .lock()
            .open
            .as_ref()
            .map(|o| o.path.display().to_string())
            .unwrap_or_default()
    }

    /// Buffers a box's events for writing. The buffer is observable by
    /// [`read`](FileBackend::read) immediately; it reaches disk on
    /// flush, eviction, or cache spill.
    pub fn write(&self, box_id: u64, events: Vec<Event>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.open.is_none() {
            return Err(StoreError::Closed);
        }
        inner.cache.insert(box_id, events, true);
        spill_over_capacity(&mut inner)
    }

    /// Fetches a box's events from the cache or the backing file.
    ///
    /// Fails with `NotFound` when the id was never written.
    pub fn read(&self, box_id: u64) -> StoreResult<Vec<Event>> {
        let mut inner = self.inner.lock();
        if inner.open.is_none() {
            return Err(StoreError::Closed);
        }
        if let Some(events) = inner.cache.get(box_id) {
            return Ok(events.to_vec());
        }

        let span = *inner
            .index
            .get(&box_id)
            .ok_or(StoreError::NotFound(box_id))?;
        let events = {
            let open = inner.open.as_mut().ok_or(StoreError::Closed)?;
            read_record(open, span)?
        };
        inner.cache.insert(box_id, events.clone(), false);
        spill_over_capacity(&mut inner)?;
        Ok(events)
    }

    /// Drops a box's resident buffer, flushing it first when dirty.
    pub fn evict(&self, box_id: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.open.is_none() {
            return Err(StoreError::Closed);
        }
        let BackendInner { open, index, cache } = &mut *inner;
        if let Some((events, dirty)) = cache.remove(box_id) {
            if dirty {
                let open = open.as_mut().ok_or(StoreError::Closed)?;
                write_record(open, index, box_id, &events)?;
            }
        }
        Ok(())
    }

    /// Synchronously persists every dirty buffer.
    pub fn flush_cache(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.open.is_none() {
            return Err(StoreError::Closed);
        }
        flush_locked(&mut inner)
    }

    /// Flushes and releases the backing file. Further operations fail
    /// with `Closed` until the backend is reopened. Idempotent.
    pub fn close_file(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        close_locked(&mut inner)
    }
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn spill_over_capacity(inner: &mut BackendInner) -> StoreResult<()> {
    let BackendInner { open, index, cache } = inner;
    while cache.needs_eviction() {
        let Some((box_id, events, dirty)) = cache.evict_oldest() else {
            break;
        };
        if dirty {
            let open = open.as_mut().ok_or(StoreError::Closed)?;
            write_record(open, index, box_id, &events)?;
        }
    }
    Ok(())
}

fn flush_locked(inner: &mut BackendInner) -> StoreResult<()> {
    let BackendInner { open, index, cache } = inner;
    let open = open.as_mut().ok_or(StoreError::Closed)?;
    for box_id in cache.dirty_ids() {
        let Some(events) = cache.peek(box_id) else {
            continue;
        };
        write_record(open, index, box_id, events)?;
        cache.mark_clean(box_id);
    }
    open.file
        .sync_all()
        .map_err(|e| StoreError::file(&open.path, e))
}

fn close_locked(inner: &mut BackendInner) -> StoreResult<()> {
    if inner.open.is_none() {
        return Ok(());
    }
    flush_locked(inner)?;
    // Everything is clean after the flush; drop the resident buffers
    // and the span index so a reopen starts from an empty view.
    inner.cache.clear();
    inner.index.clear();
    if let Some(open) = inner.open.take() {
        log::debug!("closed event backend at {:?}", open.path);
    }
    Ok(())
}

/// Appends one box's record and repoints the index at it.
fn write_record(
    open: &mut OpenFile,
    index: &mut HashMap<u64, DiskSpan>,
    box_id: u64,
    events: &[Event],
) -> StoreResult<()> {
    let bytes = bincode::serde::encode_to_vec(events, bincode::config::legacy())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let offset = open.end_offset;
    open.file
        .seek(SeekFrom::Start(offset))
        .map_err(|e| StoreError::file(&open.path, e))?;
    open.file
        .write_all(&bytes)
        .map_err(|e| StoreError::file(&open.path, e))?;
    open.end_offset = offset + bytes.len() as u64;
    index.insert(
        box_id,
        DiskSpan {
            offset,
            len: bytes.len() as u64,
        },
    );
    Ok(())
}

fn read_record(open: &mut OpenFile, span: DiskSpan) -> StoreResult<Vec<Event>> {
    open.file
        .seek(SeekFrom::Start(span.offset))
        .map_err(|e| StoreError::file(&open.path, e))?;
    let mut buffer = vec![0u8; span.len as usize];
    open.file
        .read_exact(&mut buffer)
        .map_err(|e| StoreError::file(&open.path, e))?;
    bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
        .map(|(events, _)| events)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}
