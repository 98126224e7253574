//! Memoizing cache of compiled program variants.
//!
//! Runtimes put one of these in front of their compiler. Compilation runs
//! under the cache's write lock, so each key is compiled at most once even
//! when several dispatch threads miss at the same time.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::program::{Program, ProgramKey};

/// Hit/miss counters.
#[derive(Debug, Default)]
pub struct ProgramCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ProgramCacheStats {
    /// Lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that compiled.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

impl fmt::Display for ProgramCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Program cache: {} hits, {} misses ({:.1}% hit rate)",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0
        )
    }
}

/// Compiled programs keyed by [`ProgramKey`].
#[derive(Debug, Default)]
pub struct ProgramCache {
    entries: RwLock<HashMap<ProgramKey, Arc<Program>>>,
    stats: ProgramCacheStats,
}

impl ProgramCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached program for `key`, or compiles it with `compile`.
    ///
    /// A failed compilation is not cached.
    pub fn get_or_compile<F>(&self, key: &ProgramKey, compile: F) -> Result<Arc<Program>>
    where
        F: FnOnce(&ProgramKey) -> Result<Program>,
    {
        if let Some(program) = self.entries.read().get(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(program = %key.digest(), "Program cache hit");
            return Ok(Arc::clone(program));
        }

        let mut entries = self.entries.write();
        // Another thread may have compiled while we waited for the lock.
        if let Some(program) = entries.get(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(program));
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            program = %key.program(),
            kernel = %key.kernel(),
            options = %key.options(),
            "Program cache miss, compiling"
        );
        let program = Arc::new(compile(key)?);
        entries.insert(key.clone(), Arc::clone(&program));
        Ok(program)
    }

    /// Whether `key` is cached.
    pub fn contains(&self, key: &ProgramKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of cached programs.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops all cached programs.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Cache statistics.
    pub fn stats(&self) -> &ProgramCacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TileKernelError;
    use crate::program::BuildOptions;
    use std::sync::atomic::AtomicUsize;

    fn key(stride: u32) -> ProgramKey {
        let mut opts = BuildOptions::new();
        opts.define_value("STRIDE", stride);
        ProgramKey::new("conv_2d_3x3", "conv_2d_3x3", opts)
    }

    #[test]
    fn test_compiles_once_per_key() {
        let cache = ProgramCache::new();
        let compiles = AtomicUsize::new(0);
        let compile = |k: &ProgramKey| {
            compiles.fetch_add(1, Ordering::Relaxed);
            Ok(Program::new(k.clone(), vec![]))
        };

        let a = cache.get_or_compile(&key(1), compile).unwrap();
        let b = cache.get_or_compile(&key(1), compile).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(compiles.load(Ordering::Relaxed), 1);

        let c = cache.get_or_compile(&key(2), compile).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(compiles.load(Ordering::Relaxed), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 2);
    }

    #[test]
    fn test_failed_compile_not_cached() {
        let cache = ProgramCache::new();
        let err = cache
            .get_or_compile(&key(1), |k| {
                Err(TileKernelError::CompilationFailed {
                    program: k.program().to_string(),
                    kernel: k.kernel().to_string(),
                    reason: "out of registers".to_string(),
                })
            })
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(!cache.contains(&key(1)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_misses_compile_once() {
        let cache = Arc::new(ProgramCache::new());
        let compiles = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let compiles = Arc::clone(&compiles);
                std::thread::spawn(move || {
                    cache
                        .get_or_compile(&key(1), |k| {
                            compiles.fetch_add(1, Ordering::Relaxed);
                            Ok(Program::new(k.clone(), vec![]))
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(compiles.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stats_display() {
        let cache = ProgramCache::new();
        let compile = |k: &ProgramKey| Ok(Program::new(k.clone(), vec![]));
        cache.get_or_compile(&key(1), compile).unwrap();
        cache.get_or_compile(&key(1), compile).unwrap();
        let display = cache.stats().to_string();
        assert!(display.contains("1 hits"));
        assert!(display.contains("50.0%"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
