//! Local file storage with filesystem change notification.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::storage::{required, runtime_handle, NotifyFn, Params, Storage, StorageError};

/// A configuration source backed by a single file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    name: String,
}

impl FileStorage {
    /// Create a storage for `path`. The display name is the file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }

    /// Build from `{path}` parameters.
    pub fn from_params(params: &Params) -> Result<Self, String> {
        Ok(Self::new(required(params, "path")?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory to watch. Editors often replace files by rename, so the
    /// parent is watched and events are filtered by file name.
    fn watch_target(&self) -> Result<(PathBuf, OsString), StorageError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| StorageError::NotFound(self.path.display().to_string()))?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((dir, file_name))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load(&self) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(self.path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, data: &[u8]) -> Result<(), StorageError> {
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }

    fn register_notify(
        &self,
        cancel: CancellationToken,
        callback: NotifyFn,
    ) -> Result<(), StorageError> {
        let handle = runtime_handle()?;
        let (dir, file_name) = self.watch_target()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let name = self.name.clone();
        let path = self.path.clone();
        handle.spawn(async move {
            // Dropping the watcher at the end of this task stops the OS watch.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => {
                        if msg.is_none() {
                            break;
                        }
                        // A single write usually produces a burst of events.
                        while rx.try_recv().is_ok() {}
                        tracing::info!(source = %name, "Config source change detected");
                        callback(&name);
                    }
                }
            }
            tracing::debug!(path = ?path, "File watcher stopped");
        });

        tracing::info!(path = ?self.path, "File watcher started");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
