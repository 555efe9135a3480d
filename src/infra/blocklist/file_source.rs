// File-backed block-term source.
//
// Reads a plain text file, one term per line, into an immutable
// TermSnapshot. The loader owns all filesystem concerns; the classifier
// only ever sees published snapshots.

use crate::core::classifier::TermSnapshot;
use std::io;
use std::path::PathBuf;

pub struct FileBlockTermSource {
    path: PathBuf,
}

impl FileBlockTermSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read and parse the term file. Blank lines and surrounding whitespace
    /// are dropped.
    pub fn load(&self) -> io::Result<TermSnapshot> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(TermSnapshot::new(
            raw.lines().map(|line| line.trim().to_string()),
        ))
    }

    /// Load, falling back to an empty snapshot when the file is missing or
    /// unreadable. A deployment without a block file runs with pattern
    /// detection only.
    pub fn load_or_empty(&self) -> TermSnapshot {
        match self.load() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "block-term file unavailable; using empty snapshot"
                );
                TermSnapshot::default()
            }
        }
    }
}
