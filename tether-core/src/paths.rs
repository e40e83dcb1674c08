//! Locations inside the shared container.
//!
//! ```text
//! <root>/<group>/
//!     broadcast_video.shm     latest-value video cell
//!     broadcast_audio.sock    framed audio socket
//!     broadcast_store.json    keep-alive + fps
//!     bus/                    one datagram socket per process
//! ```

use std::path::{Path, PathBuf};

use crate::error::BridgeError;

pub const VIDEO_FILE: &str = "broadcast_video.shm";
pub const AUDIO_SOCKET: &str = "broadcast_audio.sock";
pub const STORE_FILE: &str = "broadcast_store.json";
pub const BUS_DIR: &str = "bus";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPaths {
    dir: PathBuf,
}

impl ContainerPaths {
    /// Paths for the container `group` under `root`.
    pub fn new(root: impl AsRef<Path>, group: &str) -> Self {
        Self {
            dir: root.as_ref().join(group),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn video_cell(&self) -> PathBuf {
        self.dir.join(VIDEO_FILE)
    }

    pub fn audio_socket(&self) -> PathBuf {
        self.dir.join(AUDIO_SOCKET)
    }

    pub fn store(&self) -> PathBuf {
        self.dir.join(STORE_FILE)
    }

    pub fn bus_dir(&self) -> PathBuf {
        self.dir.join(BUS_DIR)
    }

    /// Create the container and bus directories.
    pub fn ensure(&self) -> Result<(), BridgeError> {
        std::fs::create_dir_all(self.bus_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_derived_from_group() {
        let paths = ContainerPaths::new("/tmp/containers", "group.com.example.tether");
        assert_eq!(
            paths.video_cell(),
            Path::new("/tmp/containers/group.com.example.tether/broadcast_video.shm")
        );
        assert_eq!(paths.audio_socket().file_name().unwrap(), AUDIO_SOCKET);
        assert_eq!(paths.store().parent().unwrap(), paths.dir());
        assert!(paths.bus_dir().ends_with("group.com.example.tether/bus"));
    }

    #[test]
    fn ensure_creates_directories() {
        let root = tempfile::tempdir().unwrap();
        let paths = ContainerPaths::new(root.path(), "group.test");
        paths.ensure().unwrap();
        assert!(paths.bus_dir().is_dir());
        paths.ensure().unwrap();
    }
}
