//! Virtual filesystem tree for TreeFS Core

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::directory::{Directory, LockedDir};
use crate::error::{FsError, FsResult};
use crate::file::{File, RegularFile};
use crate::paths::{split_path, ABSOLUTE_MARKER};
use crate::types::DirEntry;

/// A directory tree with a fixed root and a current working directory.
///
/// The working directory is a non-owning reference: if the directory it
/// names is unlinked and every other handle to it dropped, relative paths
/// fail with [`FsError::NotFound`].
pub struct Vfs {
    root: Arc<Directory>,
    cwd: RwLock<Weak<Directory>>,
    /// Held by every rename that moves a directory
    rename_lock: Mutex<()>,
}

impl Vfs {
    pub fn new() -> Self {
        let root = Arc::new(Directory::new());
        let cwd = RwLock::new(Arc::downgrade(&root));
        Self {
            root,
            cwd,
            rename_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Arc<Directory> {
        &self.root
    }

    pub fn cwd(&self) -> FsResult<Arc<Directory>> {
        self.cwd.read().upgrade().ok_or(FsError::NotFound)
    }

    pub fn chdir(&self, path: &str) -> FsResult<()> {
        let dir = self.lookup_dir(path)?;
        *self.cwd.write() = Arc::downgrade(&dir);
        debug!("Changed working directory to {}", path);
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> FsResult<Arc<Directory>> {
        let dir = Arc::new(Directory::new());
        self.create_entry(path, File::Directory(Arc::clone(&dir)))?;
        Ok(dir)
    }

    pub fn create_file(&self, path: &str) -> FsResult<Arc<RegularFile>> {
        let file = Arc::new(RegularFile::new());
        self.create_entry(path, File::Regular(Arc::clone(&file)))?;
        Ok(file)
    }

    /// Link an existing file under `path`, which must not exist yet.
    pub fn link_file(&self, path: &str, file: Arc<RegularFile>) -> FsResult<()> {
        self.create_entry(path, File::Regular(file))
    }

    fn create_entry(&self, path: &str, file: File) -> FsResult<()> {
        let segments = split_path(path);
        let mut parsed = self.parsed_path(&segments, None)?;
        if parsed.child.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let (name, _) = split_name(&segments)?;
        let kind = file.kind();
        parsed.parent.insert_entry(name, file)?;
        debug!("Created {:?} at {}", kind, path);
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let segments = split_path(path);
        let mut parsed = self.parsed_path(&segments, None)?;
        match parsed.child {
            None => Err(FsError::NotFound),
            Some(File::Directory(_)) => Err(FsError::IsADirectory),
            Some(File::Regular(_)) => {
                let (name, _) = split_name(&segments)?;
                parsed.parent.remove_entry(name);
                debug!("Unlinked {}", path);
                Ok(())
            }
        }
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        let segments = split_path(path);
        let (name, prefix) = split_name(&segments)?;
        let parent_dir = self.directory(prefix, None)?;
        let entry = parent_dir.locked().get_entry(name);
        let target = match entry {
            None => return Err(FsError::NotFound),
            Some(File::Regular(_)) => return Err(FsError::NotADirectory),
            Some(File::Directory(dir)) => dir,
        };

        // The emptiness check and the removal need both locks at once.
        let (mut parent, locked_target) = LockedDir::pair(&parent_dir, &target);
        let Some(locked_target) = locked_target else {
            return Err(FsError::Busy);
        };
        if parent.get_entry(name) != Some(File::Directory(Arc::clone(&target))) {
            return Err(FsError::NotFound);
        }
        if !locked_target.is_empty() {
            return Err(FsError::NotEmpty);
        }
        parent.remove_entry(name);
        debug!("Removed directory {}", path);
        Ok(())
    }

    /// Move the entry at `old` to `new`, replacing a compatible destination.
    ///
    /// Moving a directory into its own subtree fails with
    /// [`FsError::ForbiddenAncestor`].
    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let old_segments = split_path(old);
        let new_segments = split_path(new);
        let (old_name, old_prefix) = split_name(&old_segments)?;
        let (new_name, new_prefix) = split_name(&new_segments)?;

        let old_parent = self.directory(old_prefix, None)?;
        let source = old_parent
            .locked()
            .get_entry(old_name)
            .ok_or(FsError::NotFound)?;

        // Only directory renames move directories; holding this keeps the
        // subtree check valid until the entries are swapped.
        let _moving = source.is_dir().then(|| self.rename_lock.lock());

        let new_parent = self.directory(new_prefix, Some(&source))?;
        if let File::Directory(dir) = &source {
            if subtree_contains(dir, &new_parent) {
                return Err(FsError::ForbiddenAncestor);
            }
        }

        let (mut from, to) = LockedDir::pair(&old_parent, &new_parent);
        if from.get_entry(old_name).as_ref() != Some(&source) {
            return Err(FsError::NotFound);
        }

        let existing = match &to {
            Some(to) => to.get_entry(new_name),
            None => from.get_entry(new_name),
        };
        if let Some(existing) = existing {
            if existing == source {
                return Ok(());
            }
            check_replaceable(&source, &existing)?;
        }

        from.remove_entry(old_name);
        match to {
            Some(mut to) => to.insert_entry(new_name, source)?,
            None => from.insert_entry(new_name, source)?,
        };
        debug!("Renamed {} to {}", old, new);
        Ok(())
    }

    pub fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let dir = self.lookup_dir(path)?;
        let entries = dir.locked().entries();
        Ok(entries)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Last segment of a path and the segments before it.
///
/// The bare root has no name of its own and cannot be created, removed or
/// moved.
fn split_name(segments: &[String]) -> FsResult<(&str, &[String])> {
    match segments.split_last() {
        None => Err(FsError::NotFound),
        Some((last, [])) if last == ABSOLUTE_MARKER => Err(FsError::Busy),
        Some((last, prefix)) => Ok((last.as_str(), prefix)),
    }
}

/// Whether `target` is `root` itself or lies anywhere below it.
///
/// Locks one directory at a time.
fn subtree_contains(root: &Arc<Directory>, target: &Arc<Directory>) -> bool {
    let mut pending = vec![Arc::clone(root)];
    while let Some(dir) = pending.pop() {
        if Arc::ptr_eq(&dir, target) {
            return true;
        }
        pending.extend(dir.locked().subdirectories());
    }
    false
}

fn check_replaceable(source: &File, existing: &File) -> FsResult<()> {
    match (source, existing) {
        (File::Regular(_), File::Regular(_)) => Ok(()),
        (File::Regular(_), File::Directory(_)) => Err(FsError::IsADirectory),
        (File::Directory(_), File::Regular(_)) => Err(FsError::NotADirectory),
        (File::Directory(_), File::Directory(dir)) => {
            // Both parents are held already, so only try the third lock.
            let locked = dir.try_locked().ok_or(FsError::Busy)?;
            if locked.is_empty() {
                Ok(())
            } else {
                Err(FsError::NotEmpty)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileKind;

    #[test]
    fn test_mkdir_and_readdir() {
        let vfs = Vfs::new();
        vfs.mkdir("/a").unwrap();
        vfs.mkdir("/a/b").unwrap();
        vfs.create_file("/a/f").unwrap();

        let entries = vfs.readdir("/a").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["b", "f"]);
        assert_eq!(entries[0].kind, FileKind::Directory);
        assert_eq!(entries[1].kind, FileKind::File);
    }

    #[test]
    fn test_create_existing_fails() {
        let vfs = Vfs::new();
        vfs.mkdir("/a").unwrap();
        assert!(matches!(vfs.mkdir("/a"), Err(FsError::AlreadyExists)));
        assert!(matches!(vfs.create_file("/a"), Err(FsError::AlreadyExists)));
        assert!(matches!(vfs.mkdir("/"), Err(FsError::AlreadyExists)));
    }

    #[test]
    fn test_create_under_file_fails() {
        let vfs = Vfs::new();
        vfs.create_file("/f").unwrap();
        assert!(matches!(vfs.mkdir("/f/x"), Err(FsError::NotADirectory)));
        assert!(matches!(vfs.mkdir("/missing/x"), Err(FsError::NotFound)));
    }

    #[test]
    fn test_unlink() {
        let vfs = Vfs::new();
        vfs.create_file("/f").unwrap();
        vfs.mkdir("/d").unwrap();

        assert!(matches!(vfs.unlink("/d"), Err(FsError::IsADirectory)));
        vfs.unlink("/f").unwrap();
        assert!(matches!(vfs.unlink("/f"), Err(FsError::NotFound)));
    }

    #[test]
    fn test_unlinked_file_survives_through_handle() {
        let vfs = Vfs::new();
        let file = vfs.create_file("/f").unwrap();
        file.write_at(0, b"data").unwrap();
        vfs.unlink("/f").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn test_rmdir() {
        let vfs = Vfs::new();
        vfs.mkdir("/d").unwrap();
        vfs.create_file("/d/f").unwrap();
        vfs.create_file("/g").unwrap();

        assert!(matches!(vfs.rmdir("/d"), Err(FsError::NotEmpty)));
        assert!(matches!(vfs.rmdir("/g"), Err(FsError::NotADirectory)));
        assert!(matches!(vfs.rmdir("/"), Err(FsError::Busy)));

        vfs.unlink("/d/f").unwrap();
        vfs.rmdir("/d").unwrap();
        assert!(matches!(vfs.rmdir("/d"), Err(FsError::NotFound)));
    }

    #[test]
    fn test_rename_file() {
        let vfs = Vfs::new();
        vfs.mkdir("/a").unwrap();
        vfs.mkdir("/b").unwrap();
        let file = vfs.create_file("/a/f").unwrap();

        vfs.rename("/a/f", "/b/g").unwrap();
        assert!(matches!(vfs.resolve("/a/f"), Err(FsError::NotFound)));
        assert_eq!(vfs.resolve("/b/g").unwrap(), File::Regular(file));
    }

    #[test]
    fn test_rename_within_directory() {
        let vfs = Vfs::new();
        let file = vfs.create_file("/f").unwrap();
        vfs.rename("/f", "/g").unwrap();
        assert_eq!(vfs.resolve("/g").unwrap(), File::Regular(file));
        assert!(vfs.resolve("/f").is_err());
    }

    #[test]
    fn test_rename_into_own_subtree() {
        let vfs = Vfs::new();
        vfs.mkdir("/a").unwrap();
        vfs.mkdir("/a/b").unwrap();

        let err = vfs.rename("/a", "/a/b/c").unwrap_err();
        assert!(matches!(err, FsError::ForbiddenAncestor));
        assert_eq!(err.errno(), libc::EINVAL);

        let err = vfs.rename("/a", "/a/c").unwrap_err();
        assert!(matches!(err, FsError::ForbiddenAncestor));
    }

    #[test]
    fn test_rename_into_subtree_through_cwd() {
        let vfs = Vfs::new();
        vfs.mkdir("/a").unwrap();
        vfs.mkdir("/a/b").unwrap();
        vfs.mkdir("/a/b/deep").unwrap();

        vfs.chdir("/a/b").unwrap();
        let err = vfs.rename("/a", "c").unwrap_err();
        assert!(matches!(err, FsError::ForbiddenAncestor));
        assert_eq!(err.errno(), libc::EINVAL);

        vfs.chdir("/a/b/deep").unwrap();
        assert!(matches!(vfs.rename("/a", "c"), Err(FsError::ForbiddenAncestor)));
        assert!(matches!(vfs.rename("/a/b", "c"), Err(FsError::ForbiddenAncestor)));

        // Nothing moved
        assert!(vfs.resolve("/a/b/deep").unwrap().is_dir());
        assert!(matches!(vfs.resolve("/a/b/deep/c"), Err(FsError::NotFound)));

        // A sibling subtree is still a valid destination from the same CWD
        vfs.mkdir("/x").unwrap();
        vfs.rename("/x", "moved").unwrap();
        assert!(vfs.resolve("/a/b/deep/moved").unwrap().is_dir());
    }

    #[test]
    fn test_rename_file_into_cwd() {
        let vfs = Vfs::new();
        vfs.mkdir("/a").unwrap();
        let file = vfs.create_file("/f").unwrap();
        vfs.chdir("/a").unwrap();
        vfs.rename("/f", "g").unwrap();
        assert_eq!(vfs.resolve("/a/g").unwrap(), File::Regular(file));
    }

    #[test]
    fn test_rename_replacement_rules() {
        let vfs = Vfs::new();
        vfs.mkdir("/d").unwrap();
        vfs.mkdir("/full").unwrap();
        vfs.create_file("/full/x").unwrap();
        vfs.mkdir("/empty").unwrap();
        vfs.create_file("/f").unwrap();
        vfs.create_file("/g").unwrap();

        assert!(matches!(vfs.rename("/f", "/d"), Err(FsError::IsADirectory)));
        assert!(matches!(vfs.rename("/d", "/f"), Err(FsError::NotADirectory)));
        assert!(matches!(vfs.rename("/d", "/full"), Err(FsError::NotEmpty)));
        vfs.rename("/d", "/empty").unwrap();
        vfs.rename("/f", "/g").unwrap();
        vfs.rename("/g", "/g").unwrap();
        assert!(vfs.resolve("/g").is_ok());
    }

    #[test]
    fn test_rename_root_is_busy() {
        let vfs = Vfs::new();
        vfs.mkdir("/a").unwrap();
        assert!(matches!(vfs.rename("/", "/a/r"), Err(FsError::Busy)));
        assert!(matches!(vfs.rename("/a", "/"), Err(FsError::Busy)));
    }

    #[test]
    fn test_chdir_and_relative_paths() {
        let vfs = Vfs::new();
        vfs.mkdir("/home").unwrap();
        vfs.chdir("/home").unwrap();
        vfs.mkdir("user").unwrap();

        assert!(vfs.resolve("/home/user").unwrap().is_dir());
        assert!(matches!(vfs.chdir("/nope"), Err(FsError::NotFound)));
    }

    #[test]
    fn test_dangling_cwd() {
        let vfs = Vfs::new();
        vfs.mkdir("/tmp").unwrap();
        vfs.chdir("/tmp").unwrap();
        vfs.rmdir("/tmp").unwrap();

        assert!(matches!(vfs.cwd(), Err(FsError::NotFound)));
        assert!(matches!(vfs.resolve("x"), Err(FsError::NotFound)));
        assert!(vfs.resolve("/").is_ok());
    }
}
