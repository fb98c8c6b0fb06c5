//! Append-only log of OCR reads that matched no plate grammar.
//!
//! One line per rejected read: `Frame <n>: <raw text>`. The file is opened on
//! the first rejection and kept open; it is never read back.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};

pub struct RejectionLog {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl RejectionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            file: Mutex::new(None),
        }
    }

    /// A log that discards every entry.
    pub fn discard() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, frame_index: u64, raw_text: &str) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("rejection log lock poisoned"))?;
        if file.is_none() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("create {}", parent.display()))?;
                }
            }
            let opened = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open rejection log {}", path.display()))?;
            *file = Some(opened);
        }
        if let Some(file) = file.as_mut() {
            writeln!(file, "{}", format_entry(frame_index, raw_text))?;
        }
        Ok(())
    }
}

/// Line breaks inside OCR output are flattened so each entry stays one line.
fn format_entry(frame_index: u64, raw_text: &str) -> String {
    let flat: String = raw_text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!("Frame {}: {}", frame_index, flat)
}
