//! TreeFS Core: in-memory directory tree with blocking access to async I/O
//!
//! This crate provides path resolution over a lock-per-directory tree and a
//! bridge that lets blocking callers drive asynchronous storage backends.

pub mod bridge;
pub mod config;
pub mod directory;
pub mod error;
pub mod file;
pub mod paths;
pub mod storage;
pub mod types;
pub mod vfs;

// Re-export key types for convenience
pub use bridge::{Bridge, Completion, Resume};
pub use config::{BridgeConfig, FsConfig};
pub use directory::{Directory, LockedDir};
pub use error::{FsError, FsResult};
pub use file::{File, RegularFile};
pub use paths::{split_path, ParsedPath, PathSegments, ABSOLUTE_MARKER};
pub use storage::{AsyncStore, BridgedStore, MemoryStore, MAX_FILE_SIZE};
pub use types::*;
pub use vfs::Vfs;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FsError::NotFound;
        assert_eq!(err.to_string(), "not found");
        assert_eq!(FsError::NotADirectory.to_string(), "not a directory");
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::NotADirectory.errno(), libc::ENOTDIR);
        assert_eq!(FsError::ForbiddenAncestor.errno(), libc::EINVAL);
        assert_eq!(FsError::NotEmpty.errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::InvalidArgument.errno(), libc::EINVAL);
        assert_eq!(FsError::NoSpace.errno(), libc::ENOSPC);
    }

    #[test]
    fn test_config_creation() {
        let config = FsConfig {
            bridge: BridgeConfig {
                thread_name: "io-bridge".to_string(),
                stack_size: Some(1024 * 1024),
            },
        };
        // Basic smoke test - config can be created
        assert_eq!(config.bridge.thread_name, "io-bridge");
    }

    #[test]
    fn test_config_partial_json() {
        let config: FsConfig =
            serde_json::from_str(r#"{"bridge": {"stack_size": 65536}}"#).unwrap();
        assert_eq!(config.bridge.thread_name, "treefs-bridge");
        assert_eq!(config.bridge.stack_size, Some(65536));
    }
}
