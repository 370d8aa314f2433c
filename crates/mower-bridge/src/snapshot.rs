//! Atomic snapshot file exchange.
//!
//! The writer serializes `{ "timestamp": <seconds since epoch>, "data":
//! <snapshot> }` to a sibling `*.tmp` file, fsyncs, and renames over the
//! target, so readers always observe a complete document.  Readers treat
//! anything older than the staleness budget as absent and fall back to the
//! safe sentinel defaults.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mower_types::{MowerError, Snapshot};

/// Default location of the shared snapshot file.
pub const DEFAULT_SNAPSHOT_PATH: &str = "/tmp/mower_sensor_data.json";
/// Readers treat data older than this as stale.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10);

#[derive(Serialize, Deserialize)]
struct Envelope {
    /// Wall-clock write time, seconds since the Unix epoch.
    timestamp: f64,
    data: Snapshot,
}

/// Writer side (controller process).
pub struct SnapshotExporter {
    path: PathBuf,
}

impl SnapshotExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publish `snapshot` atomically.
    pub fn write(&self, snapshot: &Snapshot) -> Result<(), MowerError> {
        let envelope = Envelope {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            data: *snapshot,
        };
        let json = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| MowerError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |e: std::io::Error| MowerError::Io { path, source: e }
        };

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)
            .map_err(io_err(&tmp))?;
        file.write_all(&json).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        drop(file);

        std::fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        debug!(path = %self.path.display(), "snapshot exported");
        Ok(())
    }

    /// Remove the exported file (writer-side teardown).
    pub fn cleanup(&self) {
        for path in [self.path.clone(), self.path.with_extension("tmp")] {
            if path.exists() && std::fs::remove_file(&path).is_err() {
                warn!(path = %path.display(), "could not remove snapshot file");
            }
        }
    }
}

/// Reader side (UI process).
pub struct SnapshotReader {
    path: PathBuf,
    max_age: Duration,
}

impl SnapshotReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// The current fresh snapshot, or `None` when missing, unparsable, or
    /// stale.
    pub fn read_fresh(&self) -> Option<Snapshot> {
        let bytes = std::fs::read(&self.path).ok()?;
        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot file unparsable");
                return None;
            }
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let age = now - envelope.timestamp;
        if age > self.max_age.as_secs_f64() {
            warn!(age_s = age, "shared snapshot is stale");
            return None;
        }
        Some(envelope.data)
    }

    /// Like [`read_fresh`][Self::read_fresh] but degrading to the sentinel
    /// defaults instead of `None`.
    pub fn read_or_default(&self) -> Snapshot {
        self.read_fresh().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn paths() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor_data.json");
        (dir, path)
    }

    #[test]
    fn written_snapshot_reads_back_identical() {
        let (_dir, path) = paths();
        let mut snapshot = Snapshot::default();
        snapshot.imu.heading = 77.5;
        snapshot.tof.left = Some(512.0);

        SnapshotExporter::new(&path).write(&snapshot).unwrap();
        let back = SnapshotReader::new(&path).read_fresh().unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn file_is_owner_only() {
        let (_dir, path) = paths();
        SnapshotExporter::new(&path)
            .write(&Snapshot::default())
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn no_tmp_file_remains_after_write() {
        let (_dir, path) = paths();
        SnapshotExporter::new(&path)
            .write(&Snapshot::default())
            .unwrap();
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn envelope_has_timestamp_and_data_keys() {
        let (_dir, path) = paths();
        SnapshotExporter::new(&path)
            .write(&Snapshot::default())
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(value["timestamp"].is_f64());
        for key in ["imu", "tof", "environment", "power", "gps"] {
            assert!(value["data"].get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn missing_file_reads_as_default() {
        let (_dir, path) = paths();
        let reader = SnapshotReader::new(&path);
        assert!(reader.read_fresh().is_none());
        assert_eq!(reader.read_or_default(), Snapshot::default());
    }

    #[test]
    fn corrupt_file_reads_as_default() {
        let (_dir, path) = paths();
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(SnapshotReader::new(&path).read_fresh().is_none());
    }

    #[test]
    fn stale_file_reads_as_default() {
        let (_dir, path) = paths();
        // Hand-write an envelope with an ancient timestamp.
        let envelope = serde_json::json!({
            "timestamp": 1_000.0,
            "data": Snapshot::default(),
        });
        std::fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();
        assert!(SnapshotReader::new(&path).read_fresh().is_none());
    }

    #[test]
    fn fresh_timestamp_within_budget_is_accepted() {
        let (_dir, path) = paths();
        SnapshotExporter::new(&path)
            .write(&Snapshot::default())
            .unwrap();
        assert!(
            SnapshotReader::new(&path)
                .with_max_age(Duration::from_secs(1))
                .read_fresh()
                .is_some()
        );
    }

    #[test]
    fn cleanup_removes_the_file() {
        let (_dir, path) = paths();
        let exporter = SnapshotExporter::new(&path);
        exporter.write(&Snapshot::default()).unwrap();
        exporter.cleanup();
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_reader_never_sees_partial_json() {
        let (_dir, path) = paths();
        let exporter = SnapshotExporter::new(&path);
        exporter.write(&Snapshot::default()).unwrap();

        let reader_path = path.clone();
        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader_stop = stop.clone();
        let reader = std::thread::spawn(move || {
            let reader = SnapshotReader::new(&reader_path);
            let mut observed = 0usize;
            while !reader_stop.load(std::sync::atomic::Ordering::SeqCst) {
                // Any present file must parse; rename-on-write guarantees it.
                let bytes = std::fs::read(&reader_path).unwrap();
                serde_json::from_slice::<serde_json::Value>(&bytes).unwrap();
                if reader.read_fresh().is_some() {
                    observed += 1;
                }
            }
            observed
        });

        for i in 0..100 {
            let mut snapshot = Snapshot::default();
            snapshot.imu.heading = i as f64;
            exporter.write(&snapshot).unwrap();
        }
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        let observed = reader.join().unwrap();
        assert!(observed > 0);
    }
}
