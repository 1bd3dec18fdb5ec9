use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::StoreError;

/// One record (or list of records) stored as a whole JSON document.
///
/// Reads return `None` for a missing file. Writes replace the file through a sibling
/// temp file, and `update` serialises read-modify-write cycles within this process.
#[derive(Debug)]
pub struct JsonFile<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, value: &T) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write(value).await
    }

    pub async fn remove(&self) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Load, transform and store in one step; the closure sees `None` for a missing file.
    pub async fn update<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(Option<T>) -> Result<(T, R), StoreError>,
    {
        let _guard = self.write_lock.lock().await;
        let current = self.load().await?;
        let (next, out) = f(current)?;
        self.write(&next).await?;
        Ok(out)
    }

    async fn write(&self, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "record file written");
        Ok(())
    }
}
