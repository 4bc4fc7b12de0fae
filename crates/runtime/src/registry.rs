//! Handle registry.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Opaque identifier of a registered value.
///
/// Handles are issued in strictly increasing order starting at zero and are
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(i32);

impl Handle {
    pub fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for Handle {
    fn from(n: i32) -> Self {
        Self(n)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only map from handles to shared values.
///
/// The next handle is taken from a counter that is only touched while the
/// write lock is held, so it is independent of the number of entries.
pub struct Registry<T> {
    inner: RwLock<Inner<T>>,
}

struct Inner<T> {
    next: i32,
    entries: HashMap<Handle, Arc<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next: 0,
                entries: HashMap::new(),
            }),
        }
    }

    /// Register a value and return its handle.
    pub async fn create(&self, value: T) -> Result<Handle> {
        let mut inner = self.inner.write().await;
        let handle = Handle(inner.next);
        inner.next = inner.next.checked_add(1).ok_or(Error::HandlesExhausted)?;
        inner.entries.insert(handle, Arc::new(value));
        Ok(handle)
    }

    /// Look up the value registered under a handle.
    pub async fn resolve(&self, handle: Handle) -> Result<Arc<T>> {
        self.inner
            .read()
            .await
            .entries
            .get(&handle)
            .cloned()
            .ok_or(Error::HandleNotFound(handle))
    }

    /// Number of registered values.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
