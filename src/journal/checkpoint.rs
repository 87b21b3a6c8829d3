//! Checkpoint files for resumable transfers.
//!
//! One MessagePack file per `(partner, transfer id)`. Written when a
//! transfer stops after passing a sync point, deleted when it completes.

use std::path::{Path, PathBuf};

use super::{Checkpoint, EventKind, TransferEvent, TransferSink};
use crate::error::Result;

/// Directory of checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, partner: &str, transfer_id: u32) -> PathBuf {
        let partner: String = partner
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{partner}_{transfer_id}.ckpt"))
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        // struct-as-map, not positional
        let encoded = rmp_serde::to_vec_named(checkpoint)?;
        let target = self.file_for(&checkpoint.partner, checkpoint.transfer_id);
        let staging = target.with_extension("tmp");
        std::fs::write(&staging, encoded)?;
        std::fs::rename(staging, target)?;
        Ok(())
    }

    pub fn load(&self, partner: &str, transfer_id: u32) -> Result<Option<Checkpoint>> {
        match std::fs::read(self.file_for(partner, transfer_id)) {
            Ok(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove(&self, partner: &str, transfer_id: u32) -> Result<()> {
        match std::fs::remove_file(self.file_for(partner, transfer_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl TransferSink for CheckpointStore {
    fn record(&self, event: &TransferEvent) -> Result<()> {
        match (event.kind, &event.checkpoint) {
            (EventKind::Interrupted | EventKind::Failed, Some(checkpoint)) => self.save(checkpoint),
            (EventKind::Completed, _) => self.remove(&event.partner, event.transfer_id),
            _ => Ok(()),
        }
    }

    fn checkpoint(&self, partner: &str, transfer_id: u32) -> Result<Option<Checkpoint>> {
        self.load(partner, transfer_id)
    }
}
