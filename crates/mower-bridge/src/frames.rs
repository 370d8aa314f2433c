//! Camera frame handoff with an advisory lock file.
//!
//! Writer protocol: create `frame.lock` containing the writer PID, write
//! the JPEG, write the metadata sidecar, remove the lock.  Readers skip
//! while the lock exists and retry within their timeout; a frame older
//! than the freshness budget is treated as unavailable.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mower_types::MowerError;

/// Default shared directory for camera frames.
pub const DEFAULT_FRAME_DIR: &str = "/tmp/mower_camera_share";
/// Frames older than this are unavailable to readers.
pub const FRAME_MAX_AGE: Duration = Duration::from_secs(2);

const FRAME_FILE: &str = "current_frame.jpg";
const METADATA_FILE: &str = "frame_metadata.json";
const LOCK_FILE: &str = "frame.lock";

/// Sidecar metadata describing the current frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub frame_count: u64,
    /// Wall-clock write time, seconds since the Unix epoch.
    pub timestamp: f64,
    /// JPEG size in bytes.
    pub size: u64,
    pub writer_pid: u32,
}

/// One end of the frame handoff.  The same type serves both processes;
/// only the controller calls the writing methods.
pub struct FrameShare {
    frame_path: PathBuf,
    metadata_path: PathBuf,
    lock_path: PathBuf,
    frame_count: u64,
}

impl FrameShare {
    /// Open (and create) the share directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, MowerError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| MowerError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            frame_path: dir.join(FRAME_FILE),
            metadata_path: dir.join(METADATA_FILE),
            lock_path: dir.join(LOCK_FILE),
            frame_count: 0,
        })
    }

    /// Publish one JPEG frame (writer side).
    pub fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), MowerError> {
        let result = self.write_frame_locked(jpeg);
        // The lock must never outlive the write, success or not.
        if self.lock_path.exists() && std::fs::remove_file(&self.lock_path).is_err() {
            warn!(path = %self.lock_path.display(), "could not remove frame lock");
        }
        result
    }

    fn write_frame_locked(&mut self, jpeg: &[u8]) -> Result<(), MowerError> {
        let lock_path = self.lock_path.clone();
        self.write_owner_only(&lock_path, std::process::id().to_string().as_bytes())?;

        let frame_path = self.frame_path.clone();
        self.write_owner_only(&frame_path, jpeg)?;

        self.frame_count += 1;
        let metadata = FrameMetadata {
            frame_count: self.frame_count,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            size: jpeg.len() as u64,
            writer_pid: std::process::id(),
        };
        let json = serde_json::to_vec(&metadata)
            .map_err(|e| MowerError::Serialization(e.to_string()))?;
        let metadata_path = self.metadata_path.clone();
        self.write_owner_only(&metadata_path, &json)?;
        debug!(frame = self.frame_count, bytes = jpeg.len(), "frame published");
        Ok(())
    }

    /// The latest frame, waiting up to `timeout` for the writer to finish
    /// and for a fresh frame to appear (reader side).
    pub fn read_frame(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.lock_path.exists() && self.is_frame_available() {
                match std::fs::read(&self.frame_path) {
                    Ok(bytes) if !bytes.is_empty() => return Some(bytes),
                    _ => {}
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Metadata of the current frame, if readable.
    pub fn metadata(&self) -> Option<FrameMetadata> {
        let bytes = std::fs::read(&self.metadata_path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Whether a frame exists and is within the freshness budget.
    pub fn is_frame_available(&self) -> bool {
        let Some(metadata) = self.metadata() else {
            return false;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        now - metadata.timestamp < FRAME_MAX_AGE.as_secs_f64() && self.frame_path.exists()
    }

    /// Remove every shared file (writer-side teardown).
    pub fn cleanup(&self) {
        for path in [&self.frame_path, &self.metadata_path, &self.lock_path] {
            if path.exists() && std::fs::remove_file(path).is_err() {
                warn!(path = %path.display(), "could not remove shared frame file");
            }
        }
    }

    fn write_owner_only(&self, path: &Path, bytes: &[u8]) -> Result<(), MowerError> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| MowerError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        file.write_all(bytes).map_err(|e| MowerError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x42, 0x42, 0xFF, 0xD9];

    fn share() -> (tempfile::TempDir, FrameShare) {
        let dir = tempfile::tempdir().unwrap();
        let share = FrameShare::new(dir.path()).unwrap();
        (dir, share)
    }

    #[test]
    fn frame_roundtrips_with_metadata() {
        let (_dir, mut share) = share();
        share.write_frame(JPEG).unwrap();

        let frame = share.read_frame(Duration::from_millis(200)).unwrap();
        assert_eq!(frame, JPEG);

        let metadata = share.metadata().unwrap();
        assert_eq!(metadata.frame_count, 1);
        assert_eq!(metadata.size, JPEG.len() as u64);
        assert_eq!(metadata.writer_pid, std::process::id());
    }

    #[test]
    fn frame_count_increments_per_write() {
        let (_dir, mut share) = share();
        share.write_frame(JPEG).unwrap();
        share.write_frame(JPEG).unwrap();
        assert_eq!(share.metadata().unwrap().frame_count, 2);
    }

    #[test]
    fn lock_is_removed_after_write() {
        let (dir, mut share) = share();
        share.write_frame(JPEG).unwrap();
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn reader_skips_while_lock_present() {
        let (dir, mut share) = share();
        share.write_frame(JPEG).unwrap();
        // Simulate a writer mid-flight.
        std::fs::write(dir.path().join(LOCK_FILE), b"12345").unwrap();
        assert!(share.read_frame(Duration::from_millis(100)).is_none());
        std::fs::remove_file(dir.path().join(LOCK_FILE)).unwrap();
        assert!(share.read_frame(Duration::from_millis(100)).is_some());
    }

    #[test]
    fn stale_frame_is_unavailable() {
        let (_dir, mut share) = share();
        share.write_frame(JPEG).unwrap();
        // Rewrite the metadata with an ancient timestamp.
        let mut metadata = share.metadata().unwrap();
        metadata.timestamp -= 60.0;
        std::fs::write(
            &share.metadata_path,
            serde_json::to_vec(&metadata).unwrap(),
        )
        .unwrap();
        assert!(!share.is_frame_available());
        assert!(share.read_frame(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn files_are_owner_only() {
        let (_dir, mut share) = share();
        share.write_frame(JPEG).unwrap();
        for path in [&share.frame_path, &share.metadata_path] {
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{}", path.display());
        }
    }

    #[test]
    fn missing_frame_reads_none() {
        let (_dir, share) = share();
        assert!(share.read_frame(Duration::from_millis(50)).is_none());
        assert!(share.metadata().is_none());
        assert!(!share.is_frame_available());
    }

    #[test]
    fn cleanup_removes_all_shared_files() {
        let (dir, mut share) = share();
        share.write_frame(JPEG).unwrap();
        share.cleanup();
        assert!(!dir.path().join(FRAME_FILE).exists());
        assert!(!dir.path().join(METADATA_FILE).exists());
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn corrupt_metadata_means_unavailable() {
        let (_dir, mut share) = share();
        share.write_frame(JPEG).unwrap();
        std::fs::write(&share.metadata_path, b"not json").unwrap();
        assert!(!share.is_frame_available());
    }
}
