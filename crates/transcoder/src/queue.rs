use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::debug;
use tempfile::NamedTempFile;
use thiserror::Error;

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("path is not valid UTF-8: {0}")]
    NotUtf8(PathBuf),
    #[error("path contains a line break: {0:?}")]
    LineBreak(String),
}

/// Ordered, persistent list of files waiting for conversion
pub trait QueueStore {
    /// Add a path to the back of the queue
    fn append(&self, path: &Path) -> Result<()>;
    /// Take the path at the front of the queue, or None when the queue is empty
    fn pop_front(&self) -> Result<Option<PathBuf>>;
    /// Number of pending entries
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Queue kept in a plain text file, one path per line.
///
/// An empty queue is represented by the absence of the file. Removing the
/// head rewrites the remaining lines into a temporary file next to the queue
/// and renames it over the original, so a killed process leaves either the
/// old or the new contents behind.
#[derive(Debug, Clone)]
pub struct FileQueue {
    path: PathBuf,
}

impl FileQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Option<Vec<String>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read queue file: {}", self.path.display()))?;
        let entries = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        Ok(Some(entries))
    }

    fn rewrite(&self, entries: &[String]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary queue file in {}", dir.display()))?;
        for entry in entries {
            tmp.write_all(entry.as_bytes())?;
            tmp.write_all(LINE_ENDING.as_bytes())?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace queue file: {}", self.path.display()))?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to delete queue file: {}", self.path.display()))
    }
}

impl QueueStore for FileQueue {
    fn append(&self, path: &Path) -> Result<()> {
        let entry = path.to_str().ok_or_else(|| QueueError::NotUtf8(path.to_path_buf()))?;
        if entry.contains(['\n', '\r']) {
            return Err(QueueError::LineBreak(entry.to_string()).into());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open queue file: {}", self.path.display()))?;
        write!(file, "{}{}", entry, LINE_ENDING)
            .with_context(|| format!("Failed to append to queue file: {}", self.path.display()))?;
        file.sync_data()?;

        debug!("Queued {}", entry);
        Ok(())
    }

    fn pop_front(&self) -> Result<Option<PathBuf>> {
        let Some(mut entries) = self.read_entries()? else {
            return Ok(None);
        };

        if entries.len() > 1 {
            let head = entries.remove(0);
            self.rewrite(&entries)?;
            Ok(Some(PathBuf::from(head)))
        } else {
            // Last entry (or only blank lines): the queue becomes empty
            self.remove()?;
            Ok(entries.pop().map(PathBuf::from))
        }
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read_entries()?.map_or(0, |entries| entries.len()))
    }
}
