use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter tagging every full parse request.
///
/// Cloned handles share the counter. A result whose version is no longer
/// current belongs to superseded content and must be dropped.
#[derive(Debug, Clone, Default)]
pub struct VersionGuard {
    current: Arc<AtomicU64>,
}

impl VersionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new version and return it.
    pub fn bump(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn is_current(&self, version: u64) -> bool {
        self.current() == version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_supersedes() {
        let guard = VersionGuard::new();
        let shared = guard.clone();

        let first = guard.bump();
        assert!(shared.is_current(first));

        let second = shared.bump();
        assert!(second > first);
        assert!(!guard.is_current(first), "old versions are stale");
        assert!(guard.is_current(second));
    }

    #[test]
    fn test_bump_across_threads() {
        let guard = VersionGuard::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        guard.bump();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(guard.current(), 400);
    }
}
