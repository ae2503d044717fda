//! Resumable record of which requesters the merge sweep has already settled.
//! A crashed or restarted sweep skips everything recorded here; deleting the
//! file resets the sweep.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    schema_version: u32,
    #[serde(default)]
    processed_requesters: Vec<String>,
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    done: BTreeSet<u64>,
}

impl CheckpointStore {
    /// Loads the checkpoint, starting fresh (with a warning) when the file is
    /// unreadable, unparseable, or from an unknown schema version.
    pub fn load(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            done: read_done_set(path),
        }
    }

    pub fn is_done(&self, requester_id: u64) -> bool {
        self.done.contains(&requester_id)
    }

    /// Records a settled requester in memory; [`CheckpointStore::save`]
    /// persists it.
    pub fn mark_done(&mut self, requester_id: u64) {
        self.done.insert(requester_id);
    }

    pub fn done_count(&self) -> usize {
        self.done.len()
    }

    pub fn save(&self) -> Result<()> {
        let file = CheckpointFile {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            processed_requesters: self.done.iter().map(u64::to_string).collect(),
        };
        let encoded =
            serde_json::to_string_pretty(&file).context("failed to encode merge checkpoint")?;
        write_text_atomic(&self.path, &encoded)
    }
}

fn read_done_set(path: &Path) -> BTreeSet<u64> {
    if !path.exists() {
        return BTreeSet::new();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            eprintln!(
                "failed to read merge checkpoint {}: {error}; starting fresh",
                path.display()
            );
            return BTreeSet::new();
        }
    };
    let parsed = match serde_json::from_str::<CheckpointFile>(&raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            eprintln!(
                "failed to parse merge checkpoint {}: {error}; starting fresh",
                path.display()
            );
            return BTreeSet::new();
        }
    };
    if parsed.schema_version != CHECKPOINT_SCHEMA_VERSION {
        eprintln!(
            "merge checkpoint {} has unsupported schema_version {}; starting fresh",
            path.display(),
            parsed.schema_version
        );
        return BTreeSet::new();
    }
    parsed
        .processed_requesters
        .iter()
        .filter_map(|id| id.parse().ok())
        .collect()
}

fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "checkpoint".to_string());
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_path = path.with_file_name(format!(".{file_name}.{timestamp}.tmp"));

    {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| format!("failed to open temp file {}", temp_path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", temp_path.display()))?;
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to atomically replace {} with {}",
            path.display(),
            temp_path.display()
        )
    })
}
