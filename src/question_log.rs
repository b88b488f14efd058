//! Append-only JSON log of accepted questions.
//!
//! The log is a single pretty-printed JSON array of
//! `{chat_id, question, timestamp}` objects in insertion order.  An existing
//! file that fails to parse is never overwritten.  Appends are serialised
//! within the process and persisted through a temp file in the same
//! directory followed by an atomic rename, so readers only ever observe a
//! complete document.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticSink;
use crate::error::StoreError;
use crate::security_log::local_timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionLogEntry {
    pub chat_id: i64,
    pub question: String,
    pub timestamp: String,
}

pub struct QuestionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl QuestionLog {
    pub fn new(path: impl Into<PathBuf>, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            diagnostics,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry.  Failures are reported to the diagnostics sink and
    /// otherwise swallowed; the return value says whether the entry landed.
    pub fn append(&self, chat_id: i64, question: &str) -> bool {
        let _guard = match self.write_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = QuestionLogEntry {
            chat_id,
            question: question.to_string(),
            timestamp: local_timestamp(),
        };
        match self.try_append(entry) {
            Ok(()) => true,
            Err(err) => {
                self.diagnostics.record("question_log", &err.to_string());
                false
            }
        }
    }

    fn try_append(&self, entry: QuestionLogEntry) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        entries.push(entry);
        self.persist(&entries)
    }

    /// Reads the current sequence.  A missing file is an empty log.
    pub fn load(&self) -> Result<Vec<QuestionLogEntry>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn persist(&self, entries: &[QuestionLogEntry]) -> Result<(), StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        };
        // serde_json leaves non-ASCII characters unescaped.
        let body = serde_json::to_string_pretty(entries).map_err(|source| StoreError::Parse {
            path: self.path.display().to_string(),
            source,
        })?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(body.as_bytes()).map_err(io_err)?;
        // Keep the mode of the file being replaced; a first write stays 0600.
        if let Ok(meta) = fs::metadata(&self.path) {
            tmp.as_file()
                .set_permissions(meta.permissions())
                .map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
