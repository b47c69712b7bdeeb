//! Path splitting and resolution against the directory tree
//!
//! Resolution takes one directory lock at a time. Every intermediate lookup
//! holds its directory's lock only for that lookup; the final parent of a
//! [`ParsedPath`] stays locked until the caller drops it, so check-then-act
//! sequences (create, unlink, rename) cannot race another thread mutating the
//! same directory.

use std::sync::Arc;

use tracing::trace;

use crate::directory::{Directory, LockedDir};
use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::vfs::Vfs;

/// First segment of an absolute path
pub const ABSOLUTE_MARKER: &str = "/";

pub type PathSegments = Vec<String>;

/// Split a path into segments.
///
/// A leading `/` becomes an [`ABSOLUTE_MARKER`] segment. Repeated and
/// trailing separators produce no empty segments. `.` and `..` are kept as
/// ordinary names.
pub fn split_path(raw: &str) -> PathSegments {
    let mut segments = PathSegments::new();
    if raw.starts_with('/') {
        segments.push(ABSOLUTE_MARKER.to_string());
    }
    segments.extend(
        raw.split('/')
            .filter(|part| !part.is_empty())
            .map(str::to_string),
    );
    segments
}

/// A locked parent directory and the entry found under the last segment.
///
/// `child` is `None` when nothing by that name exists yet. The parent stays
/// locked until this value (or `parent`) is dropped.
#[derive(Debug)]
pub struct ParsedPath {
    pub parent: LockedDir,
    pub child: Option<File>,
}

impl Vfs {
    /// Resolve everything but the last segment to a directory, lock it, and
    /// look up the last segment.
    ///
    /// Intermediate entries equal to `forbidden` fail with
    /// [`FsError::ForbiddenAncestor`]. The path `/` yields the locked root
    /// as parent and the root itself as child.
    pub fn parsed_path(
        &self,
        segments: &[String],
        forbidden: Option<&File>,
    ) -> FsResult<ParsedPath> {
        if segments.is_empty() {
            return Err(FsError::NotFound);
        }

        let (mut current, rest) = self.origin(segments)?;
        let Some((last, intermediate)) = rest.split_last() else {
            return Ok(ParsedPath {
                parent: current.locked(),
                child: Some(File::Directory(current)),
            });
        };

        for segment in intermediate {
            current = descend(&current, segment, forbidden)?;
        }

        let parent = current.locked();
        trace!("Looking up '{}' in {:?}", last, parent);
        let child = parent.get_entry(last);
        Ok(ParsedPath { parent, child })
    }

    /// Resolve every segment and require the result to be a directory.
    ///
    /// Every walked entry, the final one included, is checked against
    /// `forbidden`: the returned directory is the ancestor of whatever the
    /// caller places in it. An empty slice resolves to the working directory.
    pub fn directory(
        &self,
        segments: &[String],
        forbidden: Option<&File>,
    ) -> FsResult<Arc<Directory>> {
        let (start, rest) = self.origin(segments)?;
        let mut current = File::Directory(start);

        for segment in rest {
            let dir = current.into_directory().ok_or(FsError::NotADirectory)?;
            let entry = dir.locked().get_entry(segment);
            trace!("Walked '{}': {:?}", segment, entry);

            let entry = entry.ok_or(FsError::NotFound)?;
            if forbidden == Some(&entry) {
                return Err(FsError::ForbiddenAncestor);
            }
            current = entry;
        }

        current.into_directory().ok_or(FsError::NotADirectory)
    }

    /// Split `path` and return the entry it names.
    pub fn resolve(&self, path: &str) -> FsResult<File> {
        let parsed = self.parsed_path(&split_path(path), None)?;
        parsed.child.ok_or(FsError::NotFound)
    }

    /// Split `path` and return the directory it names.
    pub fn lookup_dir(&self, path: &str) -> FsResult<Arc<Directory>> {
        self.directory(&split_path(path), None)
    }

    /// Starting directory for `segments` and the segments left to walk
    fn origin<'a>(&self, segments: &'a [String]) -> FsResult<(Arc<Directory>, &'a [String])> {
        match segments.split_first() {
            Some((first, rest)) if first == ABSOLUTE_MARKER => Ok((Arc::clone(self.root()), rest)),
            _ => Ok((self.cwd()?, segments)),
        }
    }
}

/// Look up one intermediate segment, holding `dir`'s lock only for the lookup
fn descend(dir: &Directory, segment: &str, forbidden: Option<&File>) -> FsResult<Arc<Directory>> {
    let entry = dir.locked().get_entry(segment);
    trace!("Walked '{}': {:?}", segment, entry);

    let entry = entry.ok_or(FsError::NotFound)?;
    if forbidden == Some(&entry) {
        return Err(FsError::ForbiddenAncestor);
    }
    entry.into_directory().ok_or(FsError::NotADirectory)
}
