use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use log::debug;
use sysinfo::System;
use crate::config::{GuardKind, TranscodeConfig};

/// Proof that this process may drain the queue. Dropping it releases exclusivity.
#[derive(Debug)]
pub struct ExclusivityToken {
    _lock: Option<File>,
}

impl ExclusivityToken {
    fn unlocked() -> Self {
        Self { _lock: None }
    }
}

/// Decides whether this invocation may process the queue now
pub trait InstanceGuard {
    /// Returns None when another instance owns the queue and processing should be deferred
    fn try_acquire(&self) -> Result<Option<ExclusivityToken>>;
}

impl<G: InstanceGuard + ?Sized> InstanceGuard for Box<G> {
    fn try_acquire(&self) -> Result<Option<ExclusivityToken>> {
        (**self).try_acquire()
    }
}

/// Build the guard selected by `cfg.instance_guard`
pub fn guard_from_config(cfg: &TranscodeConfig) -> Box<dyn InstanceGuard> {
    match cfg.instance_guard {
        GuardKind::LockFile => Box::new(LockFileGuard::new(&cfg.lock_file)),
        GuardKind::ProcessScan => Box::new(ProcessScanGuard::new()),
    }
}

/// Exclusivity via an OS advisory lock on a lock file
#[derive(Debug, Clone)]
pub struct LockFileGuard {
    path: PathBuf,
}

impl LockFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InstanceGuard for LockFileGuard {
    fn try_acquire(&self) -> Result<Option<ExclusivityToken>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("Failed to open lock file: {}", self.path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired lock: {}", self.path.display());
                Ok(Some(ExclusivityToken { _lock: Some(file) }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to lock: {}", self.path.display())),
        }
    }
}

/// Advisory check for another running process with this program's name.
///
/// Racy: two instances started together may both see each other and both defer,
/// or both miss each other and drain the same queue.
#[derive(Debug, Default, Clone)]
pub struct ProcessScanGuard;

impl ProcessScanGuard {
    pub fn new() -> Self {
        Self
    }

    /// True if a process with the same name but a different pid is running
    pub fn is_another_instance_running(&self) -> Result<bool> {
        let system = System::new_all();
        let me = sysinfo::get_current_pid().map_err(|e| anyhow!("Failed to get current pid: {}", e))?;
        let Some(current) = system.process(me) else {
            return Ok(false);
        };
        let own_threads = current.tasks();

        let other = system.processes().iter().find(|(pid, process)| {
            **pid != me
                && process.name() == current.name()
                && !own_threads.is_some_and(|tasks| tasks.contains(*pid))
        });

        if let Some((pid, _)) = other {
            debug!("Found another instance with pid {}", pid);
        }
        Ok(other.is_some())
    }
}

impl InstanceGuard for ProcessScanGuard {
    fn try_acquire(&self) -> Result<Option<ExclusivityToken>> {
        if self.is_another_instance_running()? {
            Ok(None)
        } else {
            Ok(Some(ExclusivityToken::unlocked()))
        }
    }
}
