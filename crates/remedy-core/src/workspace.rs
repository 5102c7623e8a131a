use ignore::WalkBuilder;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::RunError;

const BACKUP_SUFFIX: &str = ".backup";

/// Which files under the target directory get remediated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFilter {
    pub extensions: Vec<String>,
    /// File names starting with any of these are skipped
    pub exclude_prefixes: Vec<String>,
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self {
            extensions: vec!["py".to_string()],
            exclude_prefixes: vec!["test_".to_string()],
        }
    }
}

impl SourceFilter {
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if self.exclude_prefixes.iter().any(|p| name.starts_with(p.as_str())) {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

/// Walk `root` honouring ignore files and return matching sources, sorted
pub fn discover_sources(root: &Path, filter: &SourceFilter) -> io::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut files = Vec::new();
    for entry in WalkBuilder::new(root).require_git(false).build() {
        let entry = entry.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if entry.file_type().is_some_and(|t| t.is_file()) && filter.matches(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolve `path` against `root`, refusing anything that lands outside it.
/// Relative paths are taken relative to `root`.
fn resolve_within(root: &Path, path: &Path) -> Result<PathBuf, RunError> {
    let root_abs = root.canonicalize().map_err(|source| RunError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root_abs.join(path)
    };
    let mut target = normalize(&joined);
    if let Ok(real) = target.canonicalize() {
        target = real;
    }

    if !target.starts_with(&root_abs) {
        return Err(RunError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        });
    }
    Ok(target)
}

/// Write `contents` to `path`, refusing anything that resolves outside `root`.
pub fn write_within(root: &Path, path: &Path, contents: &str) -> Result<(), RunError> {
    let target = resolve_within(root, path)?;
    std::fs::write(&target, contents).map_err(|source| RunError::Write {
        path: target.clone(),
        source,
    })
}

/// `calc.py` backs up to `calc.py.backup` in the same directory
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

/// Like [`write_within`], but first copies the existing file to its
/// [`backup_path`]. Returns the backup, or `None` if there was no file yet.
pub fn replace_within(root: &Path, path: &Path, contents: &str) -> Result<Option<PathBuf>, RunError> {
    let target = resolve_within(root, path)?;

    let backup = if target.is_file() {
        let backup = backup_path(&target);
        std::fs::copy(&target, &backup).map_err(|source| RunError::Write {
            path: backup.clone(),
            source,
        })?;
        Some(backup)
    } else {
        None
    };

    std::fs::write(&target, contents).map_err(|source| RunError::Write {
        path: target.clone(),
        source,
    })?;
    Ok(backup)
}
