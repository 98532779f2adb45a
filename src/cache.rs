//! Content-addressed artifact cache and the per-synchronization session
//! that owns it.
//!
//! The cache is an explicitly owned object handed into every translation
//! call, never ambient global state. Entries live for exactly one
//! synchronization pass: `TranslationSession::begin_sync` clears the map
//! wholesale and bumps the reload stamp, so there is no incremental eviction
//! and no unbounded growth across passes.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::target::TranslatedArtifact;

bitflags! {
    /// Flags that change how a node is translated; part of the cache key
    /// because the same node translated under different flags yields
    /// different artifacts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TranslationFlags: u32 {
        /// Decode the source as linear color instead of applying gamma.
        const LINEAR_COLOR = 1 << 0;
        /// Bake to 32-bit float output instead of clamped 8-bit.
        const HDR_OUTPUT = 1 << 1;
        /// The consumer expects a tangent-space normal map.
        const NORMAL_MAP = 1 << 2;
        /// The consumer expects a height field to be bump-mapped.
        const BUMP_MAP = 1 << 3;
        /// Skip the per-kind routine and rasterize unconditionally.
        const FORCE_BAKE = 1 << 4;
        /// Key by pure content hash; do not fold the session reload stamp.
        const NO_RELOAD_STAMP = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub hash: u32,
    pub flags: TranslationFlags,
}

impl CacheKey {
    pub fn new(hash: u32, flags: TranslationFlags) -> CacheKey {
        CacheKey { hash, flags }
    }
}

/// Unbounded key→artifact map; at most one artifact per exact key.
///
/// Accessed only from the single translation thread. The translator checks
/// `get` before every `insert`, so a same-key insert normally never happens;
/// if a caller bypasses that protocol the newer artifact wins.
#[derive(Debug, Default)]
pub struct ContentCache {
    map: HashMap<CacheKey, TranslatedArtifact>,
}

impl ContentCache {
    pub fn new() -> ContentCache {
        ContentCache::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&TranslatedArtifact> {
        self.map.get(key)
    }

    pub fn insert(&mut self, key: CacheKey, artifact: TranslatedArtifact) {
        self.map.insert(key, artifact);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The "translation scope" collaborator: owns the cache and the reload
/// stamp for one synchronization pass after another.
#[derive(Debug, Default)]
pub struct TranslationSession {
    cache: ContentCache,
    reload_stamp: u32,
}

impl TranslationSession {
    pub fn new() -> TranslationSession {
        TranslationSession::default()
    }

    /// Start a synchronization pass: drop every cached artifact and bump the
    /// stamp so stamped hashes from the previous pass can never collide with
    /// this one.
    pub fn begin_sync(&mut self) {
        self.cache.clear();
        self.reload_stamp = self.reload_stamp.wrapping_add(1);
    }

    pub fn reload_stamp(&self) -> u32 {
        self.reload_stamp
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ContentCache {
        &mut self.cache
    }
}
