//! Mutex-guarded state with optional write-through to a JSON file.
//!
//! Every mutation runs against a copy of the current value; the copy is
//! persisted first and only then replaces the in-memory value, so a failed
//! write leaves both disk and memory untouched.
//!
//! File-backed state is shared with other processes working on the same
//! project. An `update` holds an exclusive advisory lock on `<file>.lock`
//! while it reloads the file, applies the change and writes it back; a
//! `read` refreshes from disk under a shared lock. The in-process mutex
//! still orders threads, since the advisory lock only excludes other
//! handles.

use crate::error::Result;
use crate::io;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub struct JsonState<T> {
    path: Option<PathBuf>,
    data: Mutex<T>,
}

impl<T> JsonState<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn in_memory(initial: T) -> Self {
        Self {
            path: None,
            data: Mutex::new(initial),
        }
    }

    /// Load `path` if it exists, otherwise start from `initial()`. Nothing is
    /// written until the first mutation.
    pub fn open(path: &Path, initial: impl FnOnce() -> T) -> Result<Self> {
        let data = match load_locked(path)? {
            Some(data) => data,
            None => initial(),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            data: Mutex::new(data),
        })
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let mut guard = self.lock();
        if let Some(path) = &self.path {
            match load_locked(path) {
                Ok(Some(fresh)) => *guard = fresh,
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to refresh state; using the last value read"
                ),
            }
        }
        f(&guard)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let mut guard = self.lock();
        let Some(path) = &self.path else {
            let mut next = guard.clone();
            let out = f(&mut next)?;
            *guard = next;
            return Ok(out);
        };

        let _file_lock = io::lock_exclusive(&io::lock_path_for(path))?;
        let mut next = match load(path)? {
            Some(current) => current,
            None => guard.clone(),
        };
        let out = f(&mut next)?;
        let json = serde_json::to_vec_pretty(&next)?;
        io::atomic_write(path, &json)?;
        *guard = next;
        Ok(out)
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        // A panic in another holder does not invalidate the data: every
        // mutation is applied to a copy and swapped in only on success.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

fn load_locked<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let _file_lock = io::lock_shared(&io::lock_path_for(path))?;
    load(path)
}
