use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;
use crate::store::{read_records, RUN_LOG};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub ratio_change: f64,
    pub prev_dir: Option<String>,
}

/// Distinct string values of every field whose key ends in `image` or `image_url`.
pub fn image_urls<'a>(records: impl IntoIterator<Item = &'a Record>) -> BTreeSet<String> {
    records
        .into_iter()
        .flat_map(|r| r.iter())
        .filter(|(k, _)| k.ends_with("image") || k.ends_with("image_url"))
        .filter_map(|(_, v)| match v {
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

/// Previous run: the second-to-last sibling directory in sorted order.
/// Assumes one dated directory per run, with the current run sorting last.
pub fn previous_run_dir(run_dir: &Path) -> Result<Option<PathBuf>> {
    let Some(parent) = run_dir.parent() else {
        return Ok(None);
    };
    if !parent.exists() {
        return Ok(None);
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(parent)
        .with_context(|| format!("Failed to list runs in {}", parent.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    if dirs.len() < 2 {
        return Ok(None);
    }
    Ok(Some(dirs.swap_remove(dirs.len() - 2)))
}

fn load_urls(run_dir: &Path) -> Result<BTreeSet<String>> {
    let records = read_records(&run_dir.join(RUN_LOG))?;
    Ok(image_urls(&records))
}

/// Compare this run's image URL set against the previous run's. Read-only.
pub fn compute_diff(run_dir: &Path) -> Result<DiffReport> {
    let current = load_urls(run_dir)?;
    let prev_dir = previous_run_dir(run_dir)?;
    let previous = match &prev_dir {
        Some(dir) => load_urls(dir)?,
        None => BTreeSet::new(),
    };
    Ok(diff_sets(&current, &previous, prev_dir.as_deref()))
}

pub fn diff_sets(
    current: &BTreeSet<String>,
    previous: &BTreeSet<String>,
    prev_dir: Option<&Path>,
) -> DiffReport {
    let added: Vec<String> = current.difference(previous).cloned().collect();
    let removed: Vec<String> = previous.difference(current).cloned().collect();
    let ratio_change = (added.len() + removed.len()) as f64 / previous.len().max(1) as f64;
    DiffReport {
        added,
        removed,
        ratio_change,
        prev_dir: prev_dir.map(|p| p.display().to_string()),
    }
}

// ── Tests ──
