//! Transfer lifecycle sink.
//!
//! A session reports what happened to each transfer through a
//! [`TransferSink`]. Sinks are shared by every connection and must accept
//! concurrent calls. Their failures are logged by the caller and never
//! change protocol state.
//!
//! Provided sinks:
//! - [`MemoryJournal`]: keeps everything in memory (tests, embedding)
//! - [`JsonLinesJournal`]: append-only JSON audit log
//! - [`CheckpointStore`]: MessagePack checkpoint files for resumable transfers
//! - [`Fanout`]: forwards to several sinks

mod checkpoint;
mod jsonl;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::diagnostic::Diagnostic;
use crate::error::Result;
use crate::session::Direction;

pub use checkpoint::CheckpointStore;
pub use jsonl::JsonLinesJournal;

/// Lifecycle step of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    /// A sync point was acknowledged.
    Progressed,
    Completed,
    Failed,
    /// Stopped but resumable from the last acknowledged sync point.
    Interrupted,
}

/// Position a transfer can resume from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub partner: String,
    pub transfer_id: u32,
    pub filename: String,
    pub sync_point: u32,
    pub bytes: u64,
    pub records: u64,
    /// Content received up to `bytes` (empty on the sending side).
    pub data: Bytes,
    pub saved_at: DateTime<Utc>,
}

/// One lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    pub partner: String,
    pub transfer_id: u32,
    pub filename: String,
    pub direction: Direction,
    pub bytes: u64,
    pub records: u64,
    pub sync_point: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
    /// Set on interrupted and failed transfers that passed a sync point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
}

/// Receiver of transfer lifecycle events.
pub trait TransferSink: Send + Sync {
    fn record(&self, event: &TransferEvent) -> Result<()>;

    /// Last checkpoint saved for `(partner, transfer_id)`, if any.
    fn checkpoint(&self, _partner: &str, _transfer_id: u32) -> Result<Option<Checkpoint>> {
        Ok(None)
    }

    /// A complete free-text message from a partner.
    fn message(&self, _partner: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TransferSink for NullSink {
    fn record(&self, _event: &TransferEvent) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps events, messages and checkpoints in memory.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<TransferEvent>>,
    messages: Mutex<Vec<(String, String)>>,
    checkpoints: Mutex<HashMap<(String, u32), Checkpoint>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn last(&self) -> Option<TransferEvent> {
        self.events.lock().last().cloned()
    }

    /// `(partner, text)` pairs in arrival order.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    /// Seed a checkpoint, as if a previous session had saved it.
    pub fn save_checkpoint(&self, checkpoint: Checkpoint) {
        self.checkpoints.lock().insert(
            (checkpoint.partner.clone(), checkpoint.transfer_id),
            checkpoint,
        );
    }
}

impl TransferSink for MemoryJournal {
    fn record(&self, event: &TransferEvent) -> Result<()> {
        let key = (event.partner.clone(), event.transfer_id);
        match (&event.kind, &event.checkpoint) {
            (EventKind::Interrupted | EventKind::Failed, Some(checkpoint)) => {
                self.checkpoints.lock().insert(key, checkpoint.clone());
            }
            (EventKind::Completed, _) => {
                self.checkpoints.lock().remove(&key);
            }
            _ => {}
        }
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn checkpoint(&self, partner: &str, transfer_id: u32) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .lock()
            .get(&(partner.to_string(), transfer_id))
            .cloned())
    }

    fn message(&self, partner: &str, text: &str) -> Result<()> {
        self.messages
            .lock()
            .push((partner.to_string(), text.to_string()));
        Ok(())
    }
}

/// Forwards every call to each inner sink in order.
///
/// All sinks are called even when one fails; the first error is returned.
/// Checkpoint lookups return the first hit.
#[derive(Default, Clone)]
pub struct Fanout {
    sinks: Vec<Arc<dyn TransferSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TransferSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each(&self, f: impl Fn(&dyn TransferSink) -> Result<()>) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = f(sink.as_ref()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl TransferSink for Fanout {
    fn record(&self, event: &TransferEvent) -> Result<()> {
        self.each(|sink| sink.record(event))
    }

    fn checkpoint(&self, partner: &str, transfer_id: u32) -> Result<Option<Checkpoint>> {
        for sink in &self.sinks {
            if let Some(found) = sink.checkpoint(partner, transfer_id)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn message(&self, partner: &str, text: &str) -> Result<()> {
        self.each(|sink| sink.message(partner, text))
    }
}

#[cfg(test)]
pub(crate) fn sample_event(kind: EventKind) -> TransferEvent {
    TransferEvent {
        at: Utc::now(),
        kind,
        partner: "LOOP".into(),
        transfer_id: 1,
        filename: "FILE".into(),
        direction: Direction::Receive,
        bytes: 51,
        records: 2,
        sync_point: 1,
        diagnostic: None,
        checkpoint: None,
    }
}

#[cfg(test)]
pub(crate) fn sample_checkpoint() -> Checkpoint {
    Checkpoint {
        partner: "LOOP".into(),
        transfer_id: 1,
        filename: "FILE".into(),
        sync_point: 1,
        bytes: 4,
        records: 1,
        data: Bytes::from_static(b"abcd"),
        saved_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PesitError;

    struct Failing;

    impl TransferSink for Failing {
        fn record(&self, _event: &TransferEvent) -> Result<()> {
            Err(PesitError::Protocol("sink down".into()))
        }
    }

    #[test]
    fn test_memory_journal_tracks_checkpoints() {
        let journal = MemoryJournal::new();
        let mut interrupted = sample_event(EventKind::Interrupted);
        interrupted.checkpoint = Some(sample_checkpoint());
        journal.record(&interrupted).unwrap();
        assert!(journal.checkpoint("LOOP", 1).unwrap().is_some());
        assert!(journal.checkpoint("LOOP", 2).unwrap().is_none());

        journal.record(&sample_event(EventKind::Completed)).unwrap();
        assert!(journal.checkpoint("LOOP", 1).unwrap().is_none());
        assert_eq!(
            journal.kinds(),
            vec![EventKind::Interrupted, EventKind::Completed]
        );
    }

    #[test]
    fn test_fanout_calls_every_sink() {
        let a = Arc::new(MemoryJournal::new());
        let b = Arc::new(MemoryJournal::new());
        let fanout = Fanout::new()
            .with(Arc::new(Failing))
            .with(a.clone())
            .with(b.clone());

        let result = fanout.record(&sample_event(EventKind::Started));
        assert!(result.is_err());
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);

        fanout.message("LOOP", "hello").unwrap();
        assert_eq!(a.messages(), vec![("LOOP".to_string(), "hello".to_string())]);
    }

    #[test]
    fn test_fanout_checkpoint_first_hit() {
        let empty = Arc::new(MemoryJournal::new());
        let full = Arc::new(MemoryJournal::new());
        full.save_checkpoint(sample_checkpoint());
        let fanout = Fanout::new().with(empty).with(full);
        assert_eq!(fanout.checkpoint("LOOP", 1).unwrap().unwrap().bytes, 4);
    }

    #[test]
    fn test_event_json_shape() {
        let mut event = sample_event(EventKind::Failed);
        event.diagnostic = Some(Diagnostic::D2_220);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["direction"], "receive");
        assert_eq!(json["diagnostic"]["reason"], 220);
        assert!(json.get("checkpoint").is_none());
    }
}
