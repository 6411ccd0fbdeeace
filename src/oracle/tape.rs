//! JSONL decision tape: one header line, then one entry per oracle answer.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{Fragment, NodeId};

use super::Decision;

pub const DECISION_TAPE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum TapeError {
    #[error("tape IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid tape line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("tape header must be the first JSONL line")]
    HeaderNotFirst,

    #[error("missing tape header")]
    MissingHeader,

    #[error("unsupported tape schema version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionTapeEntry {
    Classification {
        seq: u64,
        ts_ms: u64,
        node: NodeId,
        request: String,
        fragments: Vec<Fragment>,
    },
    Decision {
        seq: u64,
        ts_ms: u64,
        node: NodeId,
        fragment: Fragment,
        decision: Decision,
    },
    /// The backing oracle failed; replay fails the same way
    Failure {
        seq: u64,
        ts_ms: u64,
        node: NodeId,
        fragment: Option<Fragment>,
        error: String,
    },
    Note {
        seq: u64,
        ts_ms: u64,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DecisionTapeJsonlLine {
    Header {
        schema_version: u32,
        created_at_ms: u64,
        oracle: String,
    },
    Entry {
        entry: DecisionTapeEntry,
    },
}

#[derive(Debug, Clone)]
pub struct DecisionTape {
    pub schema_version: u32,
    pub created_at_ms: u64,
    /// Name of the oracle that produced the entries
    pub oracle: String,
    pub entries: Vec<DecisionTapeEntry>,
}

impl DecisionTape {
    pub fn new(oracle: impl Into<String>) -> Self {
        Self {
            schema_version: DECISION_TAPE_SCHEMA_VERSION,
            created_at_ms: now_ms(),
            oracle: oracle.into(),
            entries: Vec::new(),
        }
    }

    pub fn write_jsonl_to_path(&self, path: &Path) -> Result<(), TapeError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let header = DecisionTapeJsonlLine::Header {
            schema_version: self.schema_version,
            created_at_ms: self.created_at_ms,
            oracle: self.oracle.clone(),
        };
        writeln!(
            writer,
            "{}",
            serde_json::to_string(&header).map_err(io::Error::other)?
        )?;
        for entry in &self.entries {
            let line = DecisionTapeJsonlLine::Entry {
                entry: entry.clone(),
            };
            writeln!(
                writer,
                "{}",
                serde_json::to_string(&line).map_err(io::Error::other)?
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_jsonl_from_path(path: &Path) -> Result<Self, TapeError> {
        let file = File::open(path)?;
        Self::read_jsonl(BufReader::new(file))
    }

    pub fn read_jsonl(reader: impl BufRead) -> Result<Self, TapeError> {
        let mut header: Option<(u32, u64, String)> = None;
        let mut entries = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: DecisionTapeJsonlLine =
                serde_json::from_str(&line).map_err(|source| TapeError::Parse {
                    line: idx + 1,
                    source,
                })?;
            match parsed {
                DecisionTapeJsonlLine::Header {
                    schema_version,
                    created_at_ms,
                    oracle,
                } => {
                    if idx != 0 {
                        return Err(TapeError::HeaderNotFirst);
                    }
                    if schema_version != DECISION_TAPE_SCHEMA_VERSION {
                        return Err(TapeError::UnsupportedVersion(schema_version));
                    }
                    header = Some((schema_version, created_at_ms, oracle));
                }
                DecisionTapeJsonlLine::Entry { entry } => {
                    if header.is_none() {
                        return Err(TapeError::MissingHeader);
                    }
                    entries.push(entry);
                }
            }
        }

        let (schema_version, created_at_ms, oracle) = header.ok_or(TapeError::MissingHeader)?;
        Ok(Self {
            schema_version,
            created_at_ms,
            oracle,
            entries,
        })
    }
}

/// Appends entries to a tape file as they happen.
pub struct DecisionTapeWriter {
    seq: AtomicU64,
    writer: Mutex<BufWriter<File>>,
}

impl DecisionTapeWriter {
    pub fn create(path: &Path, oracle: &str) -> Result<Self, TapeError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let header = DecisionTapeJsonlLine::Header {
            schema_version: DECISION_TAPE_SCHEMA_VERSION,
            created_at_ms: now_ms(),
            oracle: oracle.to_string(),
        };
        writeln!(
            writer,
            "{}",
            serde_json::to_string(&header).map_err(io::Error::other)?
        )?;
        writer.flush()?;
        Ok(Self {
            seq: AtomicU64::new(1),
            writer: Mutex::new(writer),
        })
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn append(&self, entry: DecisionTapeEntry) -> Result<(), TapeError> {
        let line = DecisionTapeJsonlLine::Entry { entry };
        let json = serde_json::to_string(&line).map_err(io::Error::other)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }
}

pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
