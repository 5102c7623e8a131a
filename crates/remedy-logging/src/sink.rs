use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::ExperimentLogEntry;

/// Append-only destination for experiment log entries.
///
/// Implementations must serialize concurrent appends so records never interleave.
pub trait LogSink: Send + Sync {
    fn append(&self, entry: &ExperimentLogEntry) -> io::Result<()>;
}

/// JSON lines file sink; one entry per line, flushed after every record.
pub struct JsonlSink {
    file: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlSink {
    /// Open `path` for appending, creating parent directories as needed
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for JsonlSink {
    fn append(&self, entry: &ExperimentLogEntry) -> io::Result<()> {
        let json = serde_json::to_string(entry)?;
        let mut writer = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "experiment log lock poisoned"))?;
        writeln!(writer, "{}", json)?;
        writer.flush()
    }
}

/// In-memory sink for tests and replay
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<ExperimentLogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far, in append order
    pub fn entries(&self) -> Vec<ExperimentLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemorySink {
    fn append(&self, entry: &ExperimentLogEntry) -> io::Result<()> {
        self.entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory sink lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}

/// Default log location: `<data_dir>/remedy/runs/<timestamp>_<hash>.jsonl`,
/// where the hash is taken over the target directory.
pub fn default_log_path(target_dir: &Path) -> io::Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "Could not determine data directory",
        )
    })?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();

    let mut hasher = Sha256::new();
    hasher.update(target_dir.to_string_lossy().as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(data_dir
        .join("remedy")
        .join("runs")
        .join(format!("{}_{}.jsonl", timestamp, &hash[..6])))
}
