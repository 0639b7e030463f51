//! Event records: one JSON object per line, flushed per call.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{Event, EventKind, ObjectTree};

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("serializing event record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("writing event record: {0}")]
    Io(#[from] io::Error),
}

#[derive(Serialize)]
struct Record<'a> {
    time: String,
    level: &'static str,
    msg: &'static str,
    group: &'a str,
    version: &'a str,
    kind: &'a str,
    #[serde(rename = "eventType")]
    event_type: EventKind,
    obj: &'a ObjectTree,
}

/// Serializes events to an output stream. Writes are serialized by a mutex so
/// records from concurrently running watch units never interleave.
pub struct EventEmitter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl EventEmitter {
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        Self { out: Mutex::new(Box::new(out)) }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn emit(&self, event: &Event<'_>) -> Result<(), EmitError> {
        let record = Record {
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: "INFO",
            msg: "Event",
            group: &event.identity.group,
            version: &event.identity.version,
            kind: &event.identity.resource,
            event_type: event.kind,
            obj: &event.obj,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        out.write_all(&line)?;
        out.flush()?;
        Ok(())
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

/// In-memory output stream, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Parsed records, skipping lines that are not JSON.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.contents().lines().filter_map(|l| serde_json::from_str(l).ok()).collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
