use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::record::Record;

pub const RUN_LOG: &str = "run.jsonl";
pub const HEALTH_REPORT: &str = "health_report.json";
pub const DIFF_REPORT: &str = "diff.json";
pub const RUN_SUMMARY: &str = "run_summary.json";
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// On-disk layout of one run: `<data_root>/<site>/<YYYY-MM-DD>/`.
#[derive(Debug, Clone)]
pub struct RunLayout {
    data_root: PathBuf,
    site: String,
    date: NaiveDate,
}

impl RunLayout {
    pub fn new(data_root: impl Into<PathBuf>, site: &str, date: NaiveDate) -> Self {
        RunLayout {
            data_root: data_root.into(),
            site: site.to_string(),
            date,
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn site_dir(&self) -> PathBuf {
        self.data_root.join(&self.site)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.site_dir().join(self.date.format("%Y-%m-%d").to_string())
    }

    pub fn run_log(&self) -> PathBuf {
        self.run_dir().join(RUN_LOG)
    }

    pub fn health_report(&self) -> PathBuf {
        self.run_dir().join(HEALTH_REPORT)
    }

    pub fn diff_report(&self) -> PathBuf {
        self.run_dir().join(DIFF_REPORT)
    }

    pub fn run_summary(&self) -> PathBuf {
        self.run_dir().join(RUN_SUMMARY)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.run_dir().join(SNAPSHOTS_DIR)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let snaps = self.snapshots_dir();
        fs::create_dir_all(&snaps)
            .with_context(|| format!("Failed to create run directory {}", snaps.display()))
    }
}

// ── Record log ──

/// Append-only newline-delimited JSON writer. Every record reaches the OS before
/// `append` returns; `close` additionally syncs to disk.
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open run log {}", path.display()))?;
        Ok(RunLog {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn append(&mut self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .with_context(|| format!("Failed to append to {}", self.path.display()))
    }

    pub fn append_all<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) -> Result<usize> {
        let mut n = 0;
        for rec in records {
            self.append(rec)?;
            n += 1;
        }
        Ok(n)
    }

    pub fn close(self) -> Result<()> {
        self.file
            .sync_all()
            .with_context(|| format!("Failed to sync {}", self.path.display()))
    }
}

/// Read every well-formed record object from a log. Blank, non-JSON and
/// non-object lines are skipped; a missing file reads as empty.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    // Raw bytes: a torn trailing write may end mid-character.
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read run log {}", path.display()))?;
    let mut records = Vec::new();
    for (lineno, line) in bytes.split(|&b| b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(map)) => records.push(Record::from(map)),
            Ok(_) => debug!("{}:{} not a record object, skipped", path.display(), lineno + 1),
            Err(e) => debug!("{}:{} malformed ({}), skipped", path.display(), lineno + 1, e),
        }
    }
    Ok(records)
}

// ── Reports and snapshots ──

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Save page HTML (and PNG when available) as `<name>.html` / `<name>.png`.
pub fn save_snapshot(dir: &Path, name: &str, html: &str, png: Option<&[u8]>) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let html_path = dir.join(format!("{}.html", name));
    fs::write(&html_path, html)
        .with_context(|| format!("Failed to write snapshot {}", html_path.display()))?;
    if let Some(bytes) = png.filter(|b| !b.is_empty()) {
        let png_path = dir.join(format!("{}.png", name));
        fs::write(&png_path, bytes)
            .with_context(|| format!("Failed to write screenshot {}", png_path.display()))?;
        return Ok(png_path);
    }
    Ok(html_path)
}

pub fn write_error_note(dir: &Path, name: &str, error: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}-error.txt", name));
    fs::write(&path, format!("{}\n", error))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

// ── Tests ──
