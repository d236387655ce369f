//! In-memory program store standing in for the VFS.
//!
//! Paths are matched exactly; there is no directory tree.

use alloc::string::String;
use alloc::vec::Vec;

use log::debug;

use crate::error::{ExecError, ExecResult};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// Simulated media failure for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFault {
    Open,
    Read,
}

struct ProgramEntry {
    path: String,
    image: Vec<u8>,
    mode: FileMode,
    fault: Option<MediaFault>,
}

/// An open program. Not `Clone`: it must go back through
/// [`ProgramRegistry::close`] exactly once.
#[derive(Debug)]
pub struct ProgramHandle {
    index: usize,
    path: String,
}

impl ProgramHandle {
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Default)]
pub struct ProgramRegistry {
    entries: Vec<ProgramEntry>,
    open_handles: usize,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the program at `path`.
    pub fn install(&mut self, path: &str, image: Vec<u8>, mode: FileMode) {
        self.insert(ProgramEntry {
            path: path.into(),
            image,
            mode,
            fault: None,
        });
    }

    pub fn install_faulty(&mut self, path: &str, image: Vec<u8>, fault: MediaFault) {
        self.insert(ProgramEntry {
            path: path.into(),
            image,
            mode: FileMode::READ | FileMode::EXECUTE,
            fault: Some(fault),
        });
    }

    fn insert(&mut self, entry: ProgramEntry) {
        match self.entries.iter_mut().find(|e| e.path == entry.path) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn open(&mut self, path: &str) -> ExecResult<ProgramHandle> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.path == path)
            .ok_or(ExecError::NotFound)?;

        let entry = &self.entries[index];
        if entry.fault == Some(MediaFault::Open) {
            return Err(ExecError::IoError);
        }
        if !entry.mode.contains(FileMode::READ | FileMode::EXECUTE) {
            return Err(ExecError::PermissionDenied);
        }

        self.open_handles += 1;
        debug!("opened {} ({} bytes)", path, entry.image.len());
        Ok(ProgramHandle {
            index,
            path: path.into(),
        })
    }

    pub fn read(&self, handle: &ProgramHandle) -> ExecResult<&[u8]> {
        let entry = self.entries.get(handle.index).ok_or(ExecError::IoError)?;
        if entry.fault == Some(MediaFault::Read) {
            return Err(ExecError::IoError);
        }
        Ok(&entry.image)
    }

    pub fn close(&mut self, handle: ProgramHandle) {
        self.open_handles = self.open_handles.saturating_sub(1);
        debug!("closed {}", handle.path);
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles
    }
}
