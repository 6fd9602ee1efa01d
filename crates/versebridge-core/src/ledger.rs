//! The durable ledger of unsupported song/artist pairs.
//!
//! A flat text file, one `"<song> by <artist>"` line per pair, append
//! order chronological. Pairs land here when they are verified
//! unsupported and leave when a contributor resolves them (issue-closed
//! webhook) or a maintainer removes them by hand.
//!
//! Every read-modify-write sequence is serialized behind a single mutex,
//! and rewrites go through a temp file in the same directory followed by
//! a rename, so an interrupted process never leaves a half-written
//! ledger. A concurrent append from another *process* during a rewrite
//! can still be lost; this service is the file's only writer.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::song::SongQuery;

/// Append-with-deletion ledger of unsupported pairs.
#[derive(Debug)]
pub struct UnsupportedLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UnsupportedLedger {
    /// Use the ledger file at `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full ledger contents. A missing file reads as empty.
    pub fn contents(&self) -> Result<String> {
        let _guard = self.guard();
        self.read_unlocked()
    }

    /// Exact-line membership test for a pair.
    pub fn contains(&self, query: &SongQuery) -> Result<bool> {
        let _guard = self.guard();
        let line = query.to_string();
        Ok(self.read_unlocked()?.lines().any(|l| l == line))
    }

    /// Append one pair. Does not deduplicate; callers gate on
    /// [`contains`](Self::contains) to keep the ledger near-unique.
    pub fn append(&self, query: &SongQuery) -> Result<()> {
        let _guard = self.guard();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{query}")?;
        Ok(())
    }

    /// Remove every line exactly equal to the pair's text form; returns
    /// the number of lines removed (0 when the pair was absent).
    pub fn remove_all(&self, query: &SongQuery) -> Result<usize> {
        let _guard = self.guard();
        let contents = self.read_unlocked()?;
        let line = query.to_string();

        let mut removed = 0;
        let mut kept = String::with_capacity(contents.len());
        for l in contents.lines() {
            if l == line {
                removed += 1;
            } else {
                kept.push_str(l);
                kept.push('\n');
            }
        }

        if removed > 0 {
            self.rewrite_unlocked(&kept)?;
            log::info!("removed {removed} ledger line(s) for {query}");
        }
        Ok(removed)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // A poisoned lock only means another thread panicked mid-hold;
        // the ledger itself is still consistent on disk.
        self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_unlocked(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whole-file rewrite via temp file + rename in the same directory.
    fn rewrite_unlocked(&self, contents: &str) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
