// ABOUTME: Append-only history log of every accepted envelope
// ABOUTME: Written synchronously before routing so delivered means durable

//! The history log (C10).
//!
//! An append-only journal with a monotonically increasing sequence. Every
//! accepted envelope is appended before it is routed, so anything a
//! recipient sees is already in the log. The welcome builder never replays
//! history — late joiners get a snapshot instead — the log exists for audit
//! and external observers, optionally mirrored to a JSONL file.

use crate::envelope::Envelope;
use crate::error::Result;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// One accepted envelope plus its reception timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub envelope: Envelope,
    pub received_at: DateTime<Utc>,
}

/// The journal (C10).
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    next_sequence: u64,
    sink: Option<File>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal with a JSONL file sink appended alongside the in-memory log.
    pub fn with_file(path: &Path) -> Result<Self> {
        let sink = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            entries: Vec::new(),
            next_sequence: 0,
            sink: Some(sink),
        })
    }

    /// Append an accepted envelope. Returns its sequence number.
    pub fn append(&mut self, envelope: Envelope) -> Result<u64> {
        let entry = HistoryEntry {
            sequence: self.next_sequence,
            envelope,
            received_at: Utc::now(),
        };
        if let Some(sink) = &mut self.sink {
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            sink.write_all(&line)?;
        }
        self.next_sequence += 1;
        self.entries.push(entry);
        Ok(self.next_sequence - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-only snapshot access for audit.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}
