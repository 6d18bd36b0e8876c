use crate::domain::AuditEvent;
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum SpoolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid spool path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Active spool file; rotated siblings live in the same directory.
    pub path: PathBuf,
    /// Size threshold past which the active file is rotated out.
    pub max_file_size: u64,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("spool/audit-events.ndjson"),
            max_file_size: 50 * 1024 * 1024,
        }
    }
}

/// Append-only, size-rotated NDJSON store for events that could not be
/// delivered. One serialized event per line; a corrupt line never
/// invalidates the rest of the file.
///
/// All file operations are serialized by an internal async mutex, so
/// concurrent append/read/rotate cannot interleave. Single-process
/// ownership is assumed; there is no cross-process coordination.
pub struct EventSpool {
    config: SpoolConfig,
    file_lock: Mutex<()>,
}

impl EventSpool {
    pub fn new(config: SpoolConfig) -> Result<Self, SpoolError> {
        if config.path.file_stem().is_none() {
            return Err(SpoolError::InvalidPath(config.path.display().to_string()));
        }
        Ok(Self {
            config,
            file_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Appends each event as one JSON line, rotating first if the active
    /// file already exceeds the size threshold. Creates the directory and
    /// file on demand.
    pub async fn append_events(&self, events: &[AuditEvent]) -> Result<(), SpoolError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut lines = String::new();
        for event in events {
            lines.push_str(&serde_json::to_string(event)?);
            lines.push('\n');
        }

        let _guard = self.file_lock.lock().await;

        if let Some(parent) = self.config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        self.rotate_if_needed().await?;

        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.config.path)
            .await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(count = events.len(), "spooled events to disk");
        Ok(())
    }

    /// Reads every well-formed line from the active file. Missing file reads
    /// as empty; malformed lines are skipped with a warning.
    pub async fn read_events(&self) -> Result<Vec<AuditEvent>, SpoolError> {
        let _guard = self.file_lock.lock().await;
        Self::read_file(&self.config.path).await
    }

    /// Reads every well-formed line from an arbitrary spool file (typically
    /// a rotated sibling).
    pub async fn read_events_from_file(&self, path: &Path) -> Result<Vec<AuditEvent>, SpoolError> {
        let _guard = self.file_lock.lock().await;
        Self::read_file(path).await
    }

    /// Deletes the active file. Call only after its full contents are
    /// confirmed delivered.
    pub async fn clear(&self) -> Result<(), SpoolError> {
        let _guard = self.file_lock.lock().await;
        match fs::remove_file(&self.config.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves the active file aside as a rotated sibling and returns its new
    /// path, or `None` when there is nothing to move. Appends arriving after
    /// the rename land in a fresh active file, so the caller can deliver and
    /// delete the snapshot without racing concurrent writers.
    pub async fn rotate_for_read(&self) -> Result<Option<PathBuf>, SpoolError> {
        let _guard = self.file_lock.lock().await;
        let size = match fs::metadata(&self.config.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if size == 0 {
            return Ok(None);
        }

        let rotated = self.rotated_name();
        fs::rename(&self.config.path, &rotated).await?;
        tracing::debug!(to = %rotated.display(), bytes = size, "snapshotted active spool file");
        Ok(Some(rotated))
    }

    /// Deletes a specific (usually rotated) file once fully drained.
    pub async fn delete_file(&self, path: &Path) -> Result<(), SpoolError> {
        let _guard = self.file_lock.lock().await;
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists rotated siblings of the active file. Order is not guaranteed;
    /// callers sort if ordering matters.
    pub async fn rotated_files(&self) -> Result<Vec<PathBuf>, SpoolError> {
        let _guard = self.file_lock.lock().await;
        self.list_rotated().await
    }

    /// Cheap probe: any undelivered events on disk (active or rotated)?
    pub async fn has_events(&self) -> bool {
        let _guard = self.file_lock.lock().await;
        if let Ok(meta) = fs::metadata(&self.config.path).await
            && meta.len() > 0
        {
            return true;
        }
        self.list_rotated()
            .await
            .map(|files| !files.is_empty())
            .unwrap_or(false)
    }

    /// Total bytes held on disk across the active file and rotations.
    pub async fn size(&self) -> u64 {
        let _guard = self.file_lock.lock().await;
        let mut total = fs::metadata(&self.config.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if let Ok(files) = self.list_rotated().await {
            for file in files {
                total += fs::metadata(&file).await.map(|m| m.len()).unwrap_or(0);
            }
        }
        total
    }

    async fn rotate_if_needed(&self) -> Result<(), SpoolError> {
        let size = match fs::metadata(&self.config.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if size < self.config.max_file_size {
            return Ok(());
        }

        let rotated = self.rotated_name();
        fs::rename(&self.config.path, &rotated).await?;
        tracing::info!(
            from = %self.config.path.display(),
            to = %rotated.display(),
            bytes = size,
            "rotated spool file"
        );
        Ok(())
    }

    fn rotated_name(&self) -> PathBuf {
        let stem = self
            .config
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("spool");
        let ext = self
            .config
            .path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("ndjson");
        // Nanosecond stamp keeps back-to-back rotations from colliding.
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%9f");
        self.config
            .path
            .with_file_name(format!("{stem}_{stamp}Z.{ext}"))
    }

    async fn list_rotated(&self) -> Result<Vec<PathBuf>, SpoolError> {
        let parent = match self.config.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = self
            .config
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("spool")
            .to_string();
        let prefix = format!("{stem}_");

        let mut files = Vec::new();
        let mut entries = match fs::read_dir(&parent).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str()
                && name.starts_with(&prefix)
                && entry.file_type().await?.is_file()
            {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    async fn read_file(path: &Path) -> Result<Vec<AuditEvent>, SpoolError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        file = %path.display(),
                        line = index + 1,
                        error = %e,
                        "skipping malformed spool line"
                    );
                }
            }
        }
        Ok(events)
    }
}

impl std::fmt::Debug for EventSpool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSpool")
            .field("path", &self.config.path)
            .field("max_file_size", &self.config.max_file_size)
            .finish()
    }
}
