use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::domain::models::ConfigEntry;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Unchanged,
    Replaced,
    Appended,
    Created,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: Vec<(ConfigEntry, String)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Rewrites `KEY=value` lines in env-style files.
///
/// One writer is one run: each file gets a `.bak` copy before the first
/// time this writer changes it.
#[derive(Debug, Default)]
pub struct ConfigWriter {
    backed_up: HashSet<PathBuf>,
}

impl ConfigWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a batch. A missing parent directory aborts the batch; any
    /// other failure skips that entry.
    pub fn apply(&mut self, entries: &[ConfigEntry]) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for entry in entries {
            match self.upsert(&entry.file, &entry.key, &entry.value) {
                Ok(UpsertOutcome::Unchanged) => report.unchanged += 1,
                Ok(outcome) => {
                    log::info!(
                        "{:?} {}={} in {}",
                        outcome,
                        entry.key,
                        entry.value,
                        entry.file.display()
                    );
                    report.changed += 1;
                }
                Err(e @ SyncError::MissingParent { .. }) => return Err(e),
                Err(e) => {
                    log::warn!("Skipping {}: {}", entry.key, e);
                    report.skipped.push((entry.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    pub fn upsert(&mut self, path: &Path, key: &str, value: &str) -> Result<UpsertOutcome> {
        let write_error = |source: io::Error| SyncError::ConfigWrite {
            path: path.to_path_buf(),
            key: key.to_string(),
            source,
        };

        if key.is_empty() || key.contains('=') || key.contains(char::is_whitespace) {
            return Err(write_error(io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid key {:?}", key),
            )));
        }

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.is_dir() {
            return Err(SyncError::MissingParent {
                path: path.to_path_buf(),
            });
        }

        let existing = match fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(write_error(e)),
        };

        let (content, outcome) = match &existing {
            None => (format!("{}={}\n", key, value), UpsertOutcome::Created),
            Some(current) => rewrite(current, key, value),
        };

        if outcome == UpsertOutcome::Unchanged {
            return Ok(outcome);
        }
        if existing.is_some() {
            self.backup_once(path).map_err(write_error)?;
        }
        fs::write(path, content).map_err(write_error)?;
        Ok(outcome)
    }

    fn backup_once(&mut self, path: &Path) -> io::Result<()> {
        if self.backed_up.contains(path) {
            return Ok(());
        }
        let backup = backup_path(path);
        fs::copy(path, &backup)?;
        log::debug!("Backed up {} to {}", path.display(), backup.display());
        self.backed_up.insert(path.to_path_buf());
        Ok(())
    }
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

/// Replaces the first `key=` line, drops later duplicates, or appends.
/// Line endings of untouched lines are preserved.
pub fn rewrite(content: &str, key: &str, value: &str) -> (String, UpsertOutcome) {
    let prefix = format!("{}=", key);
    let wanted = format!("{}={}", key, value);
    let mut out = String::with_capacity(content.len() + wanted.len() + 1);
    let mut found = false;
    let mut changed = false;

    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        if !body.starts_with(&prefix) {
            out.push_str(line);
            continue;
        }
        if found {
            changed = true;
            continue;
        }
        found = true;
        if body != wanted {
            changed = true;
        }
        out.push_str(&wanted);
        out.push_str(&line[body.len()..]);
    }

    if found {
        let outcome = if changed {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Unchanged
        };
        return (out, outcome);
    }

    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&wanted);
    out.push('\n');
    (out, UpsertOutcome::Appended)
}
