use crate::{MemoryError, Result};
use fs2::FileExt;
use std::path::PathBuf;
use std::time::Instant;

const SLOW_LOCK_WAIT_MS: u128 = 1_000;

/// Exclusive writer lock for one project's record. Released on drop.
pub(crate) struct ProjectWriteLock {
    file: std::fs::File,
}

impl Drop for ProjectWriteLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub(crate) async fn acquire_project_write_lock(path: PathBuf) -> Result<ProjectWriteLock> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::task::spawn_blocking(move || -> Result<ProjectWriteLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                MemoryError::Persistence(format!("open lock {}: {err}", path.display()))
            })?;

        let start = Instant::now();
        file.lock_exclusive().map_err(|err| {
            MemoryError::Persistence(format!("acquire lock {}: {err}", path.display()))
        })?;
        let waited = start.elapsed().as_millis();
        if waited >= SLOW_LOCK_WAIT_MS {
            log::warn!("Waited {waited}ms for memory lock {}", path.display());
        }

        Ok(ProjectWriteLock { file })
    })
    .await
    .map_err(|err| MemoryError::Persistence(format!("join lock task: {err}")))?
}
