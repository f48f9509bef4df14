//! Storage seam consumed by the execution core.
//!
//! The core only needs one thing from the storage layer: the base URI of the
//! current execution context, recorded on converged fan-out task runs so
//! downstream tasks can locate the merged subflow outputs.

/// Storage interface consumed by the core.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Base URI of the execution's storage context.
    fn context_base_uri(&self) -> String;
}

/// In-memory storage stub with a fixed context base URI.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    base_uri: String,
}

impl MemoryStorage {
    /// Creates a memory storage rooted at the given URI.
    #[must_use]
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
        }
    }
}

impl Storage for MemoryStorage {
    fn context_base_uri(&self) -> String {
        self.base_uri.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_returns_configured_uri() {
        let storage = MemoryStorage::new("/executions/exec-1");
        assert_eq!(storage.context_base_uri(), "/executions/exec-1");
    }
}
