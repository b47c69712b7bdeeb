//! File nodes: regular files and directories

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::directory::Directory;
use crate::error::FsResult;
use crate::storage::{read_slice, resize_content, write_slice, BridgedStore};
use crate::types::{ContentId, FileKind};

/// A shared handle to a filesystem node.
///
/// Equality is handle identity: two `File`s are equal only when they refer
/// to the same node.
#[derive(Clone)]
pub enum File {
    Regular(Arc<RegularFile>),
    Directory(Arc<Directory>),
}

impl File {
    pub fn kind(&self) -> FileKind {
        match self {
            File::Regular(_) => FileKind::File,
            File::Directory(_) => FileKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, File::Directory(_))
    }

    pub fn as_directory(&self) -> Option<&Arc<Directory>> {
        match self {
            File::Directory(dir) => Some(dir),
            File::Regular(_) => None,
        }
    }

    pub fn into_directory(self) -> Option<Arc<Directory>> {
        match self {
            File::Directory(dir) => Some(dir),
            File::Regular(_) => None,
        }
    }

    pub fn as_regular(&self) -> Option<&Arc<RegularFile>> {
        match self {
            File::Regular(file) => Some(file),
            File::Directory(_) => None,
        }
    }
}

impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (File::Regular(a), File::Regular(b)) => Arc::ptr_eq(a, b),
            (File::Directory(a), File::Directory(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for File {}

impl From<Arc<RegularFile>> for File {
    fn from(file: Arc<RegularFile>) -> Self {
        File::Regular(file)
    }
}

impl From<Arc<Directory>> for File {
    fn from(dir: Arc<Directory>) -> Self {
        File::Directory(dir)
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            File::Regular(file) => write!(f, "File::Regular({:p})", Arc::as_ptr(file)),
            File::Directory(dir) => write!(f, "File::Directory({:p})", Arc::as_ptr(dir)),
        }
    }
}

enum Content {
    Memory(Mutex<Vec<u8>>),
    Stored {
        store: Arc<BridgedStore>,
        id: ContentId,
    },
}

/// A regular file whose bytes live in memory or in a bridged store
pub struct RegularFile {
    content: Content,
}

impl RegularFile {
    pub fn new() -> Self {
        Self::with_data(Vec::new())
    }

    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            content: Content::Memory(Mutex::new(data)),
        }
    }

    /// Create a file whose content is allocated in `store`.
    ///
    /// Every access blocks the calling thread until the store's runtime has
    /// serviced it.
    pub fn in_store(store: Arc<BridgedStore>, initial: &[u8]) -> FsResult<Self> {
        let id = store.allocate(initial)?;
        Ok(Self {
            content: Content::Stored { store, id },
        })
    }

    pub fn len(&self) -> FsResult<u64> {
        match &self.content {
            Content::Memory(data) => Ok(data.lock().len() as u64),
            Content::Stored { store, id } => store.len(*id),
        }
    }

    pub fn is_empty(&self) -> FsResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        match &self.content {
            Content::Memory(data) => Ok(read_slice(&data.lock(), offset, buf)),
            Content::Stored { store, id } => store.read(*id, offset, buf),
        }
    }

    /// Write `data` at `offset`, zero-filling any gap past the current end.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        match &self.content {
            Content::Memory(content) => write_slice(&mut content.lock(), offset, data),
            Content::Stored { store, id } => store.write(*id, offset, data),
        }
    }

    pub fn truncate(&self, new_len: u64) -> FsResult<()> {
        match &self.content {
            Content::Memory(content) => resize_content(&mut content.lock(), new_len),
            Content::Stored { store, id } => store.truncate(*id, new_len),
        }
    }
}

impl Default for RegularFile {
    fn default() -> Self {
        Self::new()
    }
}
