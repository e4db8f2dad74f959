//! Durable file-backed fallback queue: one JSON envelope per file in a
//! spool directory. Used when the broker is unreachable so signals survive
//! a process restart; the consumer polls it on an interval.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::SignalError;
use crate::types::SignalEnvelope;

pub struct FileSpool {
    dir: PathBuf,
    retention: usize,
}

impl FileSpool {
    pub async fn new(dir: impl AsRef<Path>, retention: usize) -> Result<Self, SignalError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, retention })
    }

    /// Write one envelope, atomically (write to a temp name, then rename so
    /// the poller never observes a half-written file). File names sort by
    /// enqueue time, which gives FIFO draining.
    pub async fn enqueue(&self, envelope: &SignalEnvelope) -> Result<(), SignalError> {
        let name = format!(
            "{}_{}.json",
            chrono::Utc::now().timestamp_millis(),
            envelope.opportunity.id
        );
        let tmp = self.dir.join(format!(".{}.tmp", name));
        let dst = self.dir.join(&name);
        let body = serde_json::to_vec_pretty(envelope)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &dst).await?;
        debug!(target: "signal::spool", file = %dst.display(), "spooled signal");
        self.prune().await;
        Ok(())
    }

    /// Remove and return the oldest spooled envelope, if any. Undecodable
    /// files are moved to a `quarantine/` subdirectory rather than retried
    /// forever, and stay there for inspection.
    pub async fn drain_oldest(&self) -> Result<Option<SignalEnvelope>, SignalError> {
        let Some(path) = self.oldest_file().await? else {
            return Ok(None);
        };
        let body = tokio::fs::read(&path).await?;
        match serde_json::from_slice::<SignalEnvelope>(&body) {
            Ok(env) => {
                tokio::fs::remove_file(&path).await?;
                Ok(Some(env))
            }
            Err(e) => {
                warn!(target: "signal::spool", file = %path.display(), error = %e, "quarantining undecodable spool file");
                self.quarantine(&path).await;
                Err(SignalError::Decode(e))
            }
        }
    }

    async fn quarantine(&self, path: &Path) {
        let dir = self.dir.join("quarantine");
        let moved = match tokio::fs::create_dir_all(&dir).await {
            Ok(()) => match path.file_name() {
                Some(name) => tokio::fs::rename(path, dir.join(name)).await,
                None => Ok(()),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = moved {
            // Must not leave the file where the poller will pick it up again.
            warn!(target: "signal::spool", file = %path.display(), error = %e, "quarantine failed, removing file");
            let _ = tokio::fs::remove_file(path).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.list_files().await.map(|f| f.len()).unwrap_or(0)
    }

    async fn oldest_file(&self) -> Result<Option<PathBuf>, SignalError> {
        let mut files = self.list_files().await?;
        files.sort();
        Ok(files.into_iter().next())
    }

    async fn list_files(&self) -> Result<Vec<PathBuf>, SignalError> {
        let mut out = Vec::new();
        let mut rd = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = rd.next_entry().await? {
            let path = entry.path();
            let is_json = path.extension().map_or(false, |e| e == "json");
            let is_tmp = entry.file_name().to_string_lossy().starts_with('.');
            if is_json && !is_tmp {
                out.push(path);
            }
        }
        Ok(out)
    }

    /// Keep only the newest `retention` files. Dropping the oldest loses
    /// signals that would have expired before consumption anyway.
    async fn prune(&self) {
        let Ok(mut files) = self.list_files().await else {
            return;
        };
        if files.len() <= self.retention {
            return;
        }
        files.sort();
        let excess = files.len() - self.retention;
        for path in files.into_iter().take(excess) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(target: "signal::spool", file = %path.display(), error = %e, "failed to prune spool file");
            }
        }
    }
}
