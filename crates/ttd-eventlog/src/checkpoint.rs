//! Checkpoint payloads.
//!
//! A checkpoint carries a snapshot body plus the counters needed to resume
//! from it. The body can be unloaded once it has been written to the log
//! directory and is read back on demand.

use crate::error::PersistError;
use crate::snapshot::SnapShot;
use crate::value::{IdentityTag, LogTag};
use log::{debug, warn};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Which entry kind a checkpoint is attached to. Decides its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// A dedicated checkpoint entry.
    Snapshot,
    /// Ready-to-run info on a top-level call entry.
    ReadyToRun,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointInfo {
    pub kind: CheckpointKind,
    pub snapshot: Option<Box<SnapShot>>,
    /// Event time the log counter resumes from after a restore.
    pub restore_event_time: u64,
    pub log_tag: LogTag,
    pub identity_tag: IdentityTag,
    /// Whether the body exists on disk.
    pub persisted: bool,
}

impl CheckpointInfo {
    pub fn new(
        kind: CheckpointKind,
        snapshot: SnapShot,
        restore_event_time: u64,
        log_tag: LogTag,
        identity_tag: IdentityTag,
    ) -> Self {
        Self {
            kind,
            snapshot: Some(Box::new(snapshot)),
            restore_event_time,
            log_tag,
            identity_tag,
            persisted: false,
        }
    }

    /// Metadata for a checkpoint whose body is only on disk.
    pub fn persisted(
        kind: CheckpointKind,
        restore_event_time: u64,
        log_tag: LogTag,
        identity_tag: IdentityTag,
    ) -> Self {
        Self {
            kind,
            snapshot: None,
            restore_event_time,
            log_tag,
            identity_tag,
            persisted: true,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn file_name(&self) -> String {
        snapshot_file_name(self.kind, self.restore_event_time)
    }

    pub fn file_path(&self, log_dir: &Path) -> PathBuf {
        log_dir.join(self.file_name())
    }

    /// Write the body to the log directory if it is not there yet.
    pub fn persist(&mut self, log_dir: &Path) -> Result<(), PersistError> {
        if self.persisted {
            return Ok(());
        }
        let Some(snap) = &self.snapshot else {
            return Err(PersistError::malformed(format!(
                "checkpoint {} has neither a body nor a file",
                self.restore_event_time
            )));
        };
        let path = self.file_path(log_dir);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(writer, &**snap)?;
        self.persisted = true;
        debug!("persisted checkpoint body to {}", path.display());
        Ok(())
    }

    /// Load the body back from disk if it was unloaded.
    pub fn ensure_loaded(&mut self, log_dir: &Path) -> Result<&SnapShot, PersistError> {
        if self.snapshot.is_none() {
            let path = self.file_path(log_dir);
            let reader = BufReader::new(File::open(&path)?);
            let snap: SnapShot = serde_json::from_reader(reader)?;
            debug!("reloaded checkpoint body from {}", path.display());
            self.snapshot = Some(Box::new(snap));
        }
        match &self.snapshot {
            Some(snap) => Ok(&**snap),
            None => Err(PersistError::malformed("checkpoint body vanished during load")),
        }
    }

    /// Drop the in-memory body. Bodies that only exist in memory are kept.
    pub fn unload(&mut self) -> bool {
        if self.snapshot.is_none() {
            return false;
        }
        if !self.persisted {
            warn!(
                "not unloading checkpoint {}: body was never persisted",
                self.restore_event_time
            );
            return false;
        }
        self.snapshot = None;
        true
    }
}

pub fn snapshot_file_name(kind: CheckpointKind, time: u64) -> String {
    match kind {
        CheckpointKind::Snapshot => format!("snap_{time}.json"),
        CheckpointKind::ReadyToRun => format!("rtr_{time}.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapContext;
    use tempfile::TempDir;

    fn make_checkpoint(kind: CheckpointKind, time: u64) -> CheckpointInfo {
        let snap = SnapShot {
            contexts: vec![SnapContext {
                log_tag: LogTag(1),
                global: IdentityTag(2),
                roots: vec![],
            }],
            ..Default::default()
        };
        CheckpointInfo::new(kind, snap, time, LogTag(10), IdentityTag(20))
    }

    #[test]
    fn test_file_names() {
        assert_eq!(make_checkpoint(CheckpointKind::Snapshot, 8).file_name(), "snap_8.json");
        assert_eq!(make_checkpoint(CheckpointKind::ReadyToRun, 3).file_name(), "rtr_3.json");
    }

    #[test]
    fn test_unpersisted_body_is_not_unloaded() {
        let mut cp = make_checkpoint(CheckpointKind::Snapshot, 1);
        assert!(!cp.unload());
        assert!(cp.is_loaded());
    }

    #[test]
    fn test_unload_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let mut cp = make_checkpoint(CheckpointKind::Snapshot, 5);
        let original = cp.snapshot.clone();

        cp.persist(temp_dir.path()).unwrap();
        assert!(temp_dir.path().join("snap_5.json").is_file());
        assert!(cp.unload());
        assert!(!cp.is_loaded());

        let reloaded = cp.ensure_loaded(temp_dir.path()).unwrap().clone();
        assert_eq!(Some(Box::new(reloaded)), original);
    }

    #[test]
    fn test_missing_file_fails_to_load() {
        let temp_dir = TempDir::new().unwrap();
        let mut cp =
            CheckpointInfo::persisted(CheckpointKind::Snapshot, 4, LogTag(1), IdentityTag(1));
        assert!(matches!(
            cp.ensure_loaded(temp_dir.path()),
            Err(PersistError::Io(_))
        ));
    }
}
