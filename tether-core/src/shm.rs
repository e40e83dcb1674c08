//! Latest-value shared memory cell backed by a memory-mapped file.
//!
//! One process writes, the other reads, and nothing synchronizes the
//! two. A read that races a write may observe a torn frame; the video
//! decoder tolerates that and the next tick replaces it.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::error::BridgeError;

/// Default capacity of the video cell.
pub const DEFAULT_CAPACITY: usize = 10 * 1024 * 1024;

/// A fixed-capacity byte region shared through a file at a well-known path.
pub struct SharedMemoryCell {
    path: PathBuf,
    map: MmapMut,
}

impl SharedMemoryCell {
    /// Create (or truncate) the backing file to exactly `capacity` bytes
    /// and map it.
    pub fn create(path: &Path, capacity: usize) -> Result<Self, BridgeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity as u64)?;
        Self::map(path, &file)
    }

    /// Map an existing backing file. A missing or empty file means the
    /// peer never set the cell up.
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                debug!(path = %path.display(), "cannot open shared cell: {e}");
                BridgeError::NoConnection
            })?;
        if file.metadata()?.len() == 0 {
            return Err(BridgeError::NoConnection);
        }
        Self::map(path, &file)
    }

    /// Open the cell if a peer already created it, otherwise create it.
    ///
    /// An existing file shorter than `capacity` is grown; a longer one is
    /// left alone so the peer's mapping stays valid.
    pub fn attach(path: &Path, capacity: usize) -> Result<Self, BridgeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < capacity as u64 {
            file.set_len(capacity as u64)?;
        }
        Self::map(path, &file)
    }

    fn map(path: &Path, file: &std::fs::File) -> Result<Self, BridgeError> {
        // SAFETY: the mapping is shared with exactly one peer process that
        // only ever overwrites bytes in place; the file is never truncated
        // while mapped. Torn reads are tolerated by the decoder.
        let map = unsafe { MmapMut::map_mut(file)? };
        debug!(path = %path.display(), capacity = map.len(), "shared cell mapped");
        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    /// Copy `bytes` to the start of the region.
    ///
    /// Returns `false` without writing if they do not fit. Bytes past
    /// `bytes.len()` keep whatever an earlier write left there.
    pub fn write(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.map.len() {
            return false;
        }
        self.map[..bytes.len()].copy_from_slice(bytes);
        true
    }

    /// Copy out the full capacity.
    pub fn read(&self) -> Vec<u8> {
        self.map.to_vec()
    }

    /// Borrow the mapped bytes without copying them.
    pub fn view<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.map)
    }

    /// Unmap and delete the backing file.
    pub fn close(self) -> Result<(), BridgeError> {
        let path = self.path.clone();
        drop(self);
        remove_if_exists(&path)?;
        Ok(())
    }
}

impl Drop for SharedMemoryCell {
    fn drop(&mut self) {
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(path = %self.path.display(), "failed to remove shared cell: {e}");
        }
    }
}

impl std::fmt::Debug for SharedMemoryCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemoryCell")
            .field("path", &self.path)
            .field("capacity", &self.map.len())
            .finish()
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
