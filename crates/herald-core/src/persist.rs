//! JSON state files with at-most-one-writer-per-file semantics.
//!
//! Every store (threads, usage, cron, settings) persists through a
//! [`JsonFile`]: saves serialize outside the lock, then take the file's
//! async mutex for the write-and-rename, so concurrent saves of the same
//! resource are sequenced without any cross-resource locking.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

pub struct JsonFile<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default + Send + 'static,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read and parse the file. A missing file yields `T::default()`;
    /// a corrupt file is logged and also yields the default, so startup
    /// never fails on bad state.
    pub fn load(&self) -> T {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), "corrupt state file ({e}), starting empty");
                T::default()
            }),
            Err(_) => T::default(),
        }
    }

    /// Write atomically: serialize, write a sibling tmp file, rename.
    pub async fn save(&self, value: &T) -> Result<()> {
        let raw = serde_json::to_string_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Fire-and-forget save. Failures are logged, never surfaced; the
    /// in-memory state stays authoritative until the next successful write.
    pub fn spawn_save(self: &Arc<Self>, value: T)
    where
        T: Sync,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.save(&value).await {
                warn!(path = %this.path.display(), "persist failed: {e}");
            }
        });
    }
}
