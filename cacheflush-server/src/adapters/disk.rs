use super::{AdapterError, FlushAdapter, FlushOutcome};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Adapter clearing a file-backed cache directory
///
/// Every file below `directory` is removed; the directory itself is kept. A
/// missing directory is an empty layer.
pub struct DiskCacheAdapter {
    directory: PathBuf,
}

impl DiskCacheAdapter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn clear_directory(&self) -> std::result::Result<(u64, u64), AdapterError> {
        let mut files = 0u64;
        let mut bytes = 0u64;
        let mut pending = vec![self.directory.clone()];
        let mut subdirs = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path.clone());
                    subdirs.push(path);
                    continue;
                }

                let len = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        files += 1;
                        bytes += len;
                    }
                    // Removed concurrently by the layer's own eviction
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        // Deepest first
        for dir in subdirs.into_iter().rev() {
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                warn!("Could not remove cache subdirectory {:?}: {}", dir, e);
            }
        }

        Ok((files, bytes))
    }
}

#[async_trait]
impl FlushAdapter for DiskCacheAdapter {
    async fn flush(
        &self,
        layer_id: &str,
        timeout: Duration,
    ) -> std::result::Result<FlushOutcome, AdapterError> {
        let (files, bytes) = tokio::time::timeout(timeout, self.clear_directory())
            .await
            .map_err(|_| AdapterError::Timeout)??;

        debug!(
            "Disk layer {} flushed: {} files, {} bytes from {:?}",
            layer_id, files, bytes, self.directory
        );
        Ok(FlushOutcome::from_bytes(files, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flush_removes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), vec![0u8; 100]).unwrap();
        std::fs::create_dir_all(dir.path().join("img/icons")).unwrap();
        std::fs::write(dir.path().join("img/logo.png"), vec![0u8; 50]).unwrap();
        std::fs::write(dir.path().join("img/icons/x.svg"), vec![0u8; 25]).unwrap();

        let adapter = DiskCacheAdapter::new(dir.path());
        let outcome = adapter
            .flush("cdn_asset_cache", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.items_cleared, 3);
        assert!(dir.path().exists());
        assert!(!dir.path().join("img").exists());

        let again = adapter
            .flush("cdn_asset_cache", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(again.items_cleared, 0);
        assert_eq!(again.size_cleared_mb, 0.0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty_layer() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = DiskCacheAdapter::new(dir.path().join("never-created"));

        let outcome = adapter
            .flush("cdn_asset_cache", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, FlushOutcome::default());
    }
}
