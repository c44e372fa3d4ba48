//! Cache of namespace-scoped connection handles.
//!
//! Callers ask for a handle per namespace on every operation. Handles are
//! created on first use by cloning the root handle and are kept for the
//! life of the cache, so every later request for the same namespace gets
//! the same shared handle.
//!
//! # Thread Safety
//!
//! Lookups take a read lock. A miss takes the write lock, checks again for
//! a handle inserted by a concurrent caller, and only then clones and
//! inserts. Cloning performs no I/O, so concurrent first requests for one
//! namespace all receive the same handle.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::client::{ConnectionHandle, HandleError};
use crate::namespace;

/// Error type for namespace handle creation.
#[derive(Debug, Error)]
pub enum CacheCloneError {
    /// The requested namespace is empty after normalization.
    #[error("empty namespace not allowed")]
    EmptyNamespace,

    /// The composed namespace cannot be set on a handle.
    #[error("failed to create client for namespace {namespace:?}: {source}")]
    Clone {
        namespace: String,
        #[source]
        source: HandleError,
    },
}

/// Namespace path → shared connection handle.
pub struct NamespaceClientCache {
    root: ConnectionHandle,
    root_namespace: Option<String>,
    entries: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl NamespaceClientCache {
    /// Create a cache whose handles are children of `root_namespace`.
    pub fn new(root: ConnectionHandle, root_namespace: Option<&str>) -> Self {
        Self {
            root,
            root_namespace: namespace::normalize_opt(root_namespace).map(str::to_string),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Namespace every cached handle is rooted at.
    pub fn root_namespace(&self) -> Option<&str> {
        self.root_namespace.as_deref()
    }

    /// Get the handle for `namespace`, creating it on first use.
    ///
    /// `namespace` is relative to the root namespace; surrounding `/` are
    /// ignored.
    pub fn get_or_create(&self, namespace: &str) -> Result<Arc<ConnectionHandle>, CacheCloneError> {
        let requested = namespace::normalize(namespace);
        if requested.is_empty() {
            return Err(CacheCloneError::EmptyNamespace);
        }
        let key = namespace::compose(self.root_namespace.as_deref(), requested);

        if let Some(handle) = self.entries.read().get(&key) {
            tracing::trace!("Namespace client cache hit for {:?}", key);
            return Ok(Arc::clone(handle));
        }

        let mut entries = self.entries.write();
        if let Some(handle) = entries.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let handle = self
            .root
            .with_namespace(&key)
            .map_err(|source| CacheCloneError::Clone {
                namespace: key.clone(),
                source,
            })?;
        let handle = Arc::new(handle);
        entries.insert(key.clone(), Arc::clone(&handle));

        tracing::debug!("Created client for namespace {:?}", key);
        Ok(handle)
    }

    /// Whether a handle exists for the given relative namespace.
    pub fn contains(&self, namespace: &str) -> bool {
        let key = namespace::compose(self.root_namespace.as_deref(), namespace);
        self.entries.read().contains_key(&key)
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no handle has been created yet.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Full namespace paths of all cached handles, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for NamespaceClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceClientCache")
            .field("root_namespace", &self.root_namespace)
            .field("entries", &self.len())
            .finish()
    }
}
