//! Dirty-flag write batching
//!
//! Logical configuration changes only mark the record dirty; the bytes are
//! written when the host asks for a flush. Several changes between flushes
//! collapse into one flash write.

/// Tracks whether in-memory configuration differs from storage
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistencePolicy {
    dirty: bool,
}

impl PersistencePolicy {
    pub const fn new() -> Self {
        Self { dirty: false }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Run `save` if dirty. The flag is cleared only when `save` succeeds.
    ///
    /// Returns `true` if a save happened.
    pub fn flush_if_dirty<E>(&mut self, save: impl FnOnce() -> Result<(), E>) -> bool {
        if !self.dirty {
            return false;
        }
        match save() {
            Ok(()) => {
                self.dirty = false;
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_policy_skips_save() {
        let mut policy = PersistencePolicy::new();
        let mut calls = 0;
        let saved = policy.flush_if_dirty(|| {
            calls += 1;
            Ok::<(), ()>(())
        });
        assert!(!saved);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_many_changes_one_save() {
        let mut policy = PersistencePolicy::new();
        policy.mark_dirty();
        policy.mark_dirty();
        policy.mark_dirty();
        let mut calls = 0;
        assert!(policy.flush_if_dirty(|| {
            calls += 1;
            Ok::<(), ()>(())
        }));
        assert!(!policy.flush_if_dirty(|| {
            calls += 1;
            Ok::<(), ()>(())
        }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_save_stays_dirty() {
        let mut policy = PersistencePolicy::new();
        policy.mark_dirty();
        assert!(!policy.flush_if_dirty(|| Err(())));
        assert!(policy.is_dirty());
        assert!(policy.flush_if_dirty(|| Ok::<(), ()>(())));
        assert!(!policy.is_dirty());
    }
}
