//! In-memory hold set guarding resources against concurrent GC.
//!
//! A hold marks a key (content checksum or remote large-file id) as in
//! active use. GC consults the set before any destructive action. Holds are
//! mutual-exclusion markers, not a queue: acquiring an already-held key is a
//! programming fault.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
#[error("hold already acquired for key {0}")]
pub struct AlreadyHeld(pub String);

#[derive(Default)]
pub struct HoldSet {
    keys: Mutex<HashSet<String>>,
}

impl HoldSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire a hold on `key`, released when the guard drops.
    pub fn acquire(self: &Arc<Self>, key: &str) -> Result<HoldGuard, AlreadyHeld> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if !keys.insert(key.to_string()) {
            return Err(AlreadyHeld(key.to_string()));
        }
        Ok(HoldGuard {
            set: Arc::clone(self),
            key: key.to_string(),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Scoped hold; dropping it releases the key on every exit path.
pub struct HoldGuard {
    set: Arc<HoldSet>,
    key: String,
}

impl HoldGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        self.set
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let holds = HoldSet::new();
        {
            let _guard = holds.acquire("abc").unwrap();
            assert!(holds.is_held("abc"));
        }
        assert!(!holds.is_held("abc"));
    }

    #[test]
    fn test_double_acquire_is_a_fault() {
        let holds = HoldSet::new();
        let _guard = holds.acquire("abc").unwrap();
        assert!(holds.acquire("abc").is_err());
        // Other keys are unaffected.
        let _other = holds.acquire("def").unwrap();
    }
}
