//! TreeFS probe: builds an in-memory tree and reports path lookups
//!
//! Directories and files named on the command line are created in order,
//! then each positional path is resolved and printed in POSIX style.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use treefs_core::{BridgedStore, FileKind, FsConfig, MemoryStore, RegularFile, Vfs};

#[derive(Parser)]
#[command(about = "Build a directory tree and resolve paths against it")]
struct Args {
    /// Paths to resolve after the tree is built
    lookups: Vec<String>,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to create (repeatable, created in order)
    #[arg(short, long = "dir")]
    dirs: Vec<String>,

    /// Regular file to create (repeatable, after all directories)
    #[arg(short, long = "file")]
    files: Vec<String>,

    /// Working directory for relative lookups
    #[arg(long)]
    cwd: Option<String>,

    /// Keep file contents in an async store reached through a bridge
    #[arg(long)]
    bridged: bool,
}

fn load_config(config_path: Option<PathBuf>) -> Result<FsConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: FsConfig = serde_json::from_str(&content)?;
            Ok(config)
        }
        None => Ok(FsConfig::default()),
    }
}

/// Backing for files created with `--bridged`
struct BridgedBacking {
    store: Arc<BridgedStore>,
    // Drops after `store`, whose bridge still hands work to it
    _runtime: Runtime,
}

impl BridgedBacking {
    fn new(config: &FsConfig) -> Result<Self> {
        let runtime = Runtime::new().context("starting tokio runtime")?;
        let store = BridgedStore::with_config(
            Arc::new(MemoryStore::new()),
            runtime.handle().clone(),
            &config.bridge,
        )?;
        Ok(Self {
            store: Arc::new(store),
            _runtime: runtime,
        })
    }
}

fn build_tree(vfs: &Vfs, args: &Args, backing: Option<&BridgedBacking>) -> Result<()> {
    for dir in &args.dirs {
        vfs.mkdir(dir)
            .with_context(|| format!("creating directory {}", dir))?;
        debug!("Created directory {}", dir);
    }

    for file in &args.files {
        let created = match backing {
            Some(backing) => {
                let content = RegularFile::in_store(Arc::clone(&backing.store), &[])?;
                vfs.link_file(file, Arc::new(content))
            }
            None => vfs.create_file(file).map(|_| ()),
        };
        created.with_context(|| format!("creating file {}", file))?;
        debug!("Created file {}", file);
    }

    if let Some(cwd) = &args.cwd {
        vfs.chdir(cwd)
            .with_context(|| format!("changing directory to {}", cwd))?;
    }
    Ok(())
}

/// One output line for `path`
fn describe(vfs: &Vfs, path: &str) -> String {
    match vfs.resolve(path) {
        Ok(file) => match file.kind() {
            FileKind::Directory => format!("{}: directory", path),
            FileKind::File => format!("{}: file", path),
        },
        Err(err) => format!("{}: {} (errno {})", path, err, err.errno()),
    }
}

fn run(args: &Args, config: &FsConfig) -> Result<Vec<String>> {
    let backing = if args.bridged {
        Some(BridgedBacking::new(config)?)
    } else {
        None
    };

    let vfs = Vfs::new();
    build_tree(&vfs, args, backing.as_ref())?;
    info!(
        "Tree built: {} directories, {} files",
        args.dirs.len(),
        args.files.len()
    );

    Ok(args.lookups.iter().map(|path| describe(&vfs, path)).collect())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(args.config.clone())?;
    info!("Configuration loaded: {:?}", config);

    for line in run(&args, &config)? {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("treefs-probe").chain(argv.iter().copied()))
    }

    #[test]
    fn test_config_loading_default() {
        let config = load_config(None).unwrap();
        assert_eq!(config.bridge.thread_name, "treefs-bridge");
        assert!(config.bridge.stack_size.is_none());
    }

    #[test]
    fn test_config_loading_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_json = r#"{
            "bridge": {
                "thread_name": "probe-io",
                "stack_size": 262144
            }
        }"#;
        temp_file.write_all(config_json.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(Some(temp_file.path().to_path_buf())).unwrap();
        assert_eq!(config.bridge.thread_name, "probe-io");
        assert_eq!(config.bridge.stack_size, Some(262144));
    }

    #[test]
    fn test_config_loading_rejects_bad_json() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ not json").unwrap();
        temp_file.flush().unwrap();
        assert!(load_config(Some(temp_file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_lookups_report_kind_and_errno() {
        let args = args(&[
            "--dir", "/a", "--dir", "/a/b", "--file", "/a/f", "/a", "/a/f", "/a/x", "/a/f/y",
        ]);
        let lines = run(&args, &FsConfig::default()).unwrap();
        assert_eq!(
            lines,
            [
                "/a: directory".to_string(),
                "/a/f: file".to_string(),
                "/a/x: not found (errno 2)".to_string(),
                "/a/f/y: not a directory (errno 20)".to_string(),
            ]
        );
    }

    #[test]
    fn test_relative_lookups_use_cwd() {
        let args = args(&["--dir", "/a", "--dir", "/a/b", "--cwd", "/a", "b", "a"]);
        let lines = run(&args, &FsConfig::default()).unwrap();
        assert_eq!(lines[0], "b: directory");
        assert!(lines[1].starts_with("a: not found"));
    }

    #[test]
    fn test_bridged_files() {
        let args = args(&["--bridged", "--dir", "/d", "--file", "/d/f", "/d/f"]);
        let lines = run(&args, &FsConfig::default()).unwrap();
        assert_eq!(lines, ["/d/f: file".to_string()]);
    }

    #[test]
    fn test_build_failure_is_reported() {
        let args = args(&["--dir", "/missing/child"]);
        let err = run(&args, &FsConfig::default()).unwrap_err();
        assert!(err.to_string().contains("/missing/child"));
    }
}
