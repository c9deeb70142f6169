//! JSON-lines file backend.
//!
//! One entry per line, opened in append mode for every write.

use crate::audit::backend::{AuditBackend, BackendType};
use crate::audit::entry::{AuditEntry, EntryId};
use crate::audit::filter::AuditFilter;
use crate::core::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Append-only audit file.
pub struct FileBackend {
    path: PathBuf,
    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Create a backend writing to `path`; parent directories must exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %self.path.display(), line = line_no + 1, error = %e, "skipping corrupt audit line"),
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl AuditBackend for FileBackend {
    async fn record(&self, entry: AuditEntry) -> Result<EntryId> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::AuditWrite(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::AuditWrite(format!("{}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| Error::AuditWrite(format!("{}: {}", self.path.display(), e)))?;
        Ok(entry.id)
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let entries = self.read_all().await?;
        Ok(filter.apply(entries.iter()))
    }

    fn backend_type(&self) -> BackendType {
        BackendType::File
    }

    async fn health_check(&self) -> Result<bool> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{verify_chain, EntryType};

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("audit.jsonl"));
        assert!(backend.health_check().await.unwrap());
        assert_eq!(backend.count().await.unwrap(), 0);

        let mut prev = None;
        for i in 0..3 {
            let mut entry = AuditEntry::new(EntryType::StateTransition, "controller", "t", "us-east-1")
                .with_metadata("i", i);
            prev = Some(entry.seal(prev));
            backend.record(entry).await.unwrap();
        }

        let entries = backend.query(&AuditFilter::new()).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(verify_chain(&entries), Ok(()));
    }

    #[tokio::test]
    async fn test_missing_directory_fails_write() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nope").join("audit.jsonl"));
        assert!(!backend.health_check().await.unwrap());

        let result = backend
            .record(AuditEntry::new(EntryType::DnsMutation, "dns", "upsert", "app"))
            .await;
        assert!(matches!(result, Err(Error::AuditWrite(_))));
    }
}
