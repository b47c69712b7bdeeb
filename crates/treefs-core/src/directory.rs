//! Directories and their lock-scoped entry maps

use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::types::DirEntry;

type Entries = HashMap<String, File>;

/// A directory node.
///
/// The entry map is only reachable through [`Directory::locked`], so every
/// read or write of it happens while this directory's lock is held.
#[derive(Default)]
pub struct Directory {
    entries: Arc<Mutex<Entries>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire this directory's lock.
    ///
    /// The returned guard owns its hold on the lock, so it can outlive the
    /// borrow of `self` and be handed back to callers. Locks are not
    /// reentrant: locking a directory twice from one thread deadlocks.
    pub fn locked(&self) -> LockedDir {
        LockedDir {
            entries: self.entries.lock_arc(),
        }
    }

    /// Acquire this directory's lock only if it is free right now.
    pub fn try_locked(&self) -> Option<LockedDir> {
        self.entries
            .try_lock_arc()
            .map(|entries| LockedDir { entries })
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("addr", &(self as *const Self))
            .finish_non_exhaustive()
    }
}

/// A held lock on one directory's entry map. Dropping it releases the lock.
pub struct LockedDir {
    entries: ArcMutexGuard<RawMutex, Entries>,
}

impl LockedDir {
    /// Lock two directories in a stable address order.
    ///
    /// Returns the guards in argument order; the second is `None` when both
    /// arguments are the same directory, which is then locked only once.
    pub fn pair(first: &Directory, second: &Directory) -> (LockedDir, Option<LockedDir>) {
        if ptr::eq(first, second) {
            return (first.locked(), None);
        }
        if (first as *const Directory) < (second as *const Directory) {
            let a = first.locked();
            let b = second.locked();
            (a, Some(b))
        } else {
            let b = second.locked();
            let a = first.locked();
            (a, Some(b))
        }
    }

    pub fn get_entry(&self, name: &str) -> Option<File> {
        self.entries.get(name).cloned()
    }

    /// Insert or replace the entry `name`, returning the replaced entry.
    pub fn insert_entry(&mut self, name: &str, file: File) -> FsResult<Option<File>> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidName);
        }
        Ok(self.entries.insert(name.to_string(), file))
    }

    pub fn remove_entry(&mut self, name: &str) -> Option<File> {
        self.entries.remove(name)
    }

    /// Handles to every directory entry
    pub fn subdirectories(&self) -> Vec<Arc<Directory>> {
        self.entries
            .values()
            .filter_map(|file| file.as_directory().cloned())
            .collect()
    }

    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Listing of this directory, sorted by name
    pub fn entries(&self) -> Vec<DirEntry> {
        let mut entries: Vec<DirEntry> = self
            .entries
            .iter()
            .map(|(name, file)| DirEntry {
                name: name.clone(),
                kind: file.kind(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for LockedDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedDir")
            .field("entries", &self.entry_names())
            .finish()
    }
}
