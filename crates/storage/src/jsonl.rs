use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tabscope_core::Result;
use tracing::{debug, error};

/// Append-only JSON-lines writer that rotates to a new file each UTC day.
///
/// Files are named `<stem>-YYYY-MM-DD.jsonl` inside `dir`. Every `append`
/// writes exactly one line and flushes, so a crash loses at most the record
/// being written.
pub struct JsonlWriter {
    dir: PathBuf,
    stem: String,
    current_date: String,
    file: Option<BufWriter<File>>,
}

impl JsonlWriter {
    pub fn new(dir: impl Into<PathBuf>, stem: &str) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.to_string(),
            current_date: today(),
            file: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.rotate_if_needed();

        if self.file.is_none() {
            std::fs::create_dir_all(&self.dir)?;
            let path = self.path_for(&self.current_date);
            debug!(path = %path.display(), "Opening record file");
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.file = Some(BufWriter::new(file));
        }

        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{}", json)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Path of the file that records for `date` (YYYY-MM-DD) land in.
    pub fn path_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.jsonl", self.stem, date))
    }

    pub fn current_path(&self) -> PathBuf {
        self.path_for(&today())
    }

    /// Read records for a specific date. Unparsable lines are logged and skipped.
    pub fn read_day(&self, date: &str) -> Result<Vec<Value>> {
        read_jsonl(&self.path_for(date))
    }

    pub fn read_today(&self) -> Result<Vec<Value>> {
        self.read_day(&today())
    }

    fn rotate_if_needed(&mut self) {
        let now = today();
        if now != self.current_date {
            self.current_date = now;
            self.file = None;
        }
    }
}

pub fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to parse record line");
            }
        }
    }
    Ok(records)
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
