//! Best-effort, append-only log of rejected input.
//!
//! Lines are flat text (`<local timestamp> - Suspicious input: <text>`).  The
//! underlying writer can rotate by size and gzip backups; with no size limit
//! configured it only ever appends.  The file is not touched until the first
//! line is recorded.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::RotationConfig;
use crate::diagnostics::DiagnosticSink;

/// Local wall-clock timestamp at second resolution.
pub fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Size-based rotating writer.  Backups are named by appending `.1` ..
/// `.<keep>` to the full file name (`security_log.txt.2`), plus `.gz` when
/// compression is on.  `.1` is always the newest.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(path: &str, rotation: &RotationConfig) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes: rotation.max_bytes,
            keep: rotation.keep,
            compress: rotation.compress,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            if self.exceeds_limit(limit) {
                self.rotate_backups();
                self.compress_latest_backup();
                self.reopen_current();
            }
        }
        writeln!(self.file, "{}", line)?;
        self.file.flush()
    }

    fn exceeds_limit(&self, limit: u64) -> bool {
        self.path
            .metadata()
            .map(|meta| meta.len() >= limit)
            .unwrap_or(false)
    }

    fn backup_path(&self, idx: usize, gz: bool) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{}", idx));
        if gz {
            name.push(".gz");
        }
        PathBuf::from(name)
    }

    fn rotate_backups(&self) {
        if self.keep == 0 {
            return;
        }
        let _ = fs::remove_file(self.backup_path(self.keep, false));
        let _ = fs::remove_file(self.backup_path(self.keep, true));
        for idx in (2..=self.keep).rev() {
            for gz in [false, true] {
                let old = self.backup_path(idx - 1, gz);
                if old.exists() {
                    let _ = fs::rename(&old, self.backup_path(idx, gz));
                }
            }
        }
        if self.path.exists() {
            let _ = fs::rename(&self.path, self.backup_path(1, false));
        }
    }

    fn compress_latest_backup(&self) {
        if !self.compress || self.keep == 0 {
            return;
        }
        let rotated = self.backup_path(1, false);
        if let Ok(data) = fs::read(&rotated) {
            let mut gz = GzEncoder::new(Vec::new(), Compression::default());
            if gz.write_all(&data).is_ok() {
                if let Ok(buf) = gz.finish() {
                    if fs::write(self.backup_path(1, true), buf).is_ok() {
                        let _ = fs::remove_file(&rotated);
                    }
                }
            }
        }
    }

    fn reopen_current(&mut self) {
        if let Ok(newf) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = newf;
        }
    }
}

pub struct SecurityLog {
    path: String,
    rotation: RotationConfig,
    writer: Mutex<Option<RotatingWriter>>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl SecurityLog {
    /// Creates the log without touching the filesystem.  The file is opened
    /// on the first recorded line; failure to open is reported then and the
    /// line is dropped, while the input is still rejected.
    pub fn new(
        path: impl Into<String>,
        rotation: &RotationConfig,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            path: path.into(),
            rotation: rotation.clone(),
            writer: Mutex::new(None),
            diagnostics,
        }
    }

    pub fn record_suspicious(&self, text: &str) {
        let line = format!("{} - Suspicious input: {}", local_timestamp(), text);
        let mut guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            match RotatingWriter::open(&self.path, &self.rotation) {
                Ok(w) => *guard = Some(w),
                Err(e) => {
                    self.diagnostics.record(
                        "security_log",
                        &format!(
                            "failed to open suspicious-activity log {}: {}; line dropped",
                            self.path, e
                        ),
                    );
                    return;
                }
            }
        }
        let Some(writer) = guard.as_mut() else {
            return;
        };
        if let Err(e) = writer.write_line(&line) {
            self.diagnostics.record(
                "security_log",
                &format!("failed to write suspicious-activity line: {}", e),
            );
        }
    }
}
