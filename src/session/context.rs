//! Per-transfer state.

use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::journal::Checkpoint;
use crate::protocol::RecordFormat;

/// Direction of a transfer, seen from the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Send,
    Receive,
}

/// Position recorded at an acknowledged sync point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMark {
    pub point: u32,
    pub bytes: u64,
    pub records: u64,
}

/// Counters and limits of the active transfer.
///
/// Created when CREATE or SELECT is accepted and dropped at DESELECT. On the
/// receiving side the content accumulates in memory and is handed to the
/// file store at TRANS_END.
#[derive(Debug, Clone)]
pub struct TransferContext {
    pub transfer_id: u32,
    pub filename: String,
    /// Location in the file store.
    pub path: PathBuf,
    pub direction: Direction,
    pub format: RecordFormat,
    /// 0 means articles of any length.
    pub record_length: usize,
    pub max_entity_size: usize,
    /// 0 means no announced size.
    pub announced_size: u64,
    pub overwrite: bool,
    bytes: u64,
    records: u64,
    current_sync: u32,
    restart_point: u32,
    marks: Vec<SyncMark>,
    content: BytesMut,
    resyncs: u32,
    interrupted: bool,
    completed: bool,
}

impl TransferContext {
    pub fn new(transfer_id: u32, filename: impl Into<String>, direction: Direction) -> Self {
        Self {
            transfer_id,
            filename: filename.into(),
            path: PathBuf::new(),
            direction,
            format: RecordFormat::Variable,
            record_length: 0,
            max_entity_size: 0,
            announced_size: 0,
            overwrite: false,
            bytes: 0,
            records: 0,
            current_sync: 0,
            restart_point: 0,
            marks: Vec::new(),
            content: BytesMut::new(),
            resyncs: 0,
            interrupted: false,
            completed: false,
        }
    }

    /// Sending side: the whole file to send.
    pub fn with_source(mut self, source: Bytes) -> Self {
        self.content = BytesMut::from(&source[..]);
        self
    }

    /// Continue from a checkpoint saved by an earlier session.
    pub fn resume_from(&mut self, checkpoint: &Checkpoint) {
        self.bytes = checkpoint.bytes;
        self.records = checkpoint.records;
        self.current_sync = checkpoint.sync_point;
        self.restart_point = checkpoint.sync_point;
        self.marks = vec![SyncMark {
            point: checkpoint.sync_point,
            bytes: checkpoint.bytes,
            records: checkpoint.records,
        }];
        if self.direction == Direction::Receive {
            self.content = BytesMut::from(&checkpoint.data[..]);
        }
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    #[inline]
    pub fn records(&self) -> u64 {
        self.records
    }

    #[inline]
    pub fn current_sync(&self) -> u32 {
        self.current_sync
    }

    /// Sync point the current (or next) data phase starts from.
    #[inline]
    pub fn restart_point(&self) -> u32 {
        self.restart_point
    }

    #[inline]
    pub fn resyncs(&self) -> u32 {
        self.resyncs
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn marks(&self) -> &[SyncMark] {
        &self.marks
    }

    /// Received content so far, or the file being sent.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Account for accepted data. On the receiving side `data` is appended.
    pub fn record_data(&mut self, data: &[u8], records: u64) {
        if self.direction == Direction::Receive {
            self.content.extend_from_slice(data);
        }
        self.bytes += data.len() as u64;
        self.records += records;
    }

    /// Remember an acknowledged sync point at the current position.
    pub fn mark_sync(&mut self, point: u32) {
        self.current_sync = point;
        self.marks.push(SyncMark {
            point,
            bytes: self.bytes,
            records: self.records,
        });
    }

    pub fn mark(&self, point: u32) -> Option<SyncMark> {
        if point == 0 {
            return Some(SyncMark {
                point: 0,
                bytes: 0,
                records: 0,
            });
        }
        self.marks.iter().find(|m| m.point == point).copied()
    }

    pub fn last_mark(&self) -> Option<SyncMark> {
        self.marks.last().copied()
    }

    /// Roll counters and received content back to `mark`.
    ///
    /// Marks after it are forgotten and the transfer counts as resumed. The
    /// sync counter keeps its value so later sync numbers stay increasing.
    pub fn rollback(&mut self, mark: SyncMark) {
        self.bytes = mark.bytes;
        self.records = mark.records;
        self.restart_point = mark.point;
        self.marks.retain(|m| m.point <= mark.point);
        self.interrupted = false;
        if self.direction == Direction::Receive {
            self.content.truncate(mark.bytes as usize);
        }
    }

    /// Start (or restart) a data phase.
    ///
    /// After an interruption counters roll back to the last sync point. A
    /// data phase following a completed one starts a fresh transfer of the
    /// same file: counters, marks and received content are cleared.
    pub fn begin_data_phase(&mut self) {
        if self.completed {
            self.bytes = 0;
            self.records = 0;
            self.current_sync = 0;
            self.restart_point = 0;
            self.resyncs = 0;
            self.marks.clear();
            if self.direction == Direction::Receive {
                self.content.clear();
            }
        } else if self.interrupted {
            let mark = self.last_mark().unwrap_or(SyncMark {
                point: 0,
                bytes: 0,
                records: 0,
            });
            self.rollback(mark);
        }
        self.interrupted = false;
        self.completed = false;
    }

    pub fn count_resync(&mut self) {
        self.resyncs += 1;
    }

    pub fn set_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub fn set_completed(&mut self) {
        self.completed = true;
    }

    /// Checkpoint at the last acknowledged sync point, if there is one.
    pub fn checkpoint(&self, partner: &str) -> Option<Checkpoint> {
        let mark = self.last_mark()?;
        let data = match self.direction {
            Direction::Receive => {
                let end = (mark.bytes as usize).min(self.content.len());
                Bytes::copy_from_slice(&self.content[..end])
            }
            Direction::Send => Bytes::new(),
        };
        Some(Checkpoint {
            partner: partner.to_string(),
            transfer_id: self.transfer_id,
            filename: self.filename.clone(),
            sync_point: mark.point,
            bytes: mark.bytes,
            records: mark.records,
            data,
            saved_at: Utc::now(),
        })
    }
}
