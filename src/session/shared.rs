//! Thread-shareable session handle

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;

use super::Dbm;

/// A [`Dbm`] behind `Arc<Mutex<_>>`; clones share the same session
#[derive(Clone)]
pub struct SharedDbm {
    inner: Arc<Mutex<Dbm>>,
}

impl SharedDbm {
    pub fn new(db: Dbm) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Exclusive access for a sequence of calls
    pub fn lock(&self) -> MutexGuard<'_, Dbm> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access
    pub fn with<T>(&self, f: impl FnOnce(&mut Dbm) -> T) -> T {
        f(&mut self.inner.lock())
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.inner.lock().get(key)
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.inner.lock().put(key, value)
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.inner.lock().delete(key)
    }

    /// Close the session for every clone
    pub fn close(&self) -> Result<()> {
        self.inner.lock().close()
    }
}

impl From<Dbm> for SharedDbm {
    fn from(db: Dbm) -> Self {
        Self::new(db)
    }
}
