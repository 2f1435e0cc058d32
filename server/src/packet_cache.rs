//! Identity-keyed cache of obfuscated chunk payloads.
//!
//! Keys are payload allocations, not payload contents: two equal payloads built separately
//! are different keys. The cache only holds a [`Weak`] to each payload, so it never keeps
//! one alive. An entry whose payload has been dropped everywhere else is dead: it is never
//! returned and gets swept on the next insert or [`ObfuscatedPacketCache::purge`].
//!
//! While a `Weak` exists its allocation can't be reused, so an address key can't alias a
//! newer payload.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use antixray_shared::types::{ChunkBlocks, ChunkPos};
use parking_lot::RwLock;

/// An encoded outbound chunk payload, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPacket {
    pub chunk: ChunkPos,
    pub bytes: Vec<u8>,
}

struct Entry<P> {
    payload: Weak<P>,
    blocks: Arc<ChunkBlocks>,
}

impl<P> Entry<P> {
    fn is_live(&self) -> bool {
        self.payload.strong_count() > 0
    }
}

pub struct ObfuscatedPacketCache<P> {
    entries: RwLock<HashMap<usize, Entry<P>>>,
}

impl<P> Default for ObfuscatedPacketCache<P> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

fn key_of<P>(payload: &Arc<P>) -> usize {
    Arc::as_ptr(payload) as *const () as usize
}

impl<P> ObfuscatedPacketCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached blocks for this exact payload, if it is still cached.
    pub fn get(&self, payload: &Arc<P>) -> Option<Arc<ChunkBlocks>> {
        let entries = self.entries.read();
        let entry = entries.get(&key_of(payload))?;
        if entry.is_live() && Weak::ptr_eq(&entry.payload, &Arc::downgrade(payload)) {
            Some(Arc::clone(&entry.blocks))
        } else {
            None
        }
    }

    /// Blocks for `payload`, computing them at most once per live payload.
    ///
    /// `compute` runs without the lock held, so two threads racing on the same new payload
    /// may both compute; the first insert wins and both callers get that value.
    pub fn get_or_compute<F>(&self, payload: &Arc<P>, compute: F) -> Arc<ChunkBlocks>
    where
        F: FnOnce(&P) -> ChunkBlocks,
    {
        if let Some(blocks) = self.get(payload) {
            return blocks;
        }

        let computed = Arc::new(compute(payload));

        let mut entries = self.entries.write();
        entries.retain(|_, e| e.is_live());
        let entry = entries.entry(key_of(payload)).or_insert_with(|| Entry {
            payload: Arc::downgrade(payload),
            blocks: Arc::clone(&computed),
        });
        Arc::clone(&entry.blocks)
    }

    /// Insert or replace the blocks for a payload.
    pub fn insert(&self, payload: &Arc<P>, blocks: ChunkBlocks) {
        let mut entries = self.entries.write();
        entries.retain(|_, e| e.is_live());
        entries.insert(
            key_of(payload),
            Entry {
                payload: Arc::downgrade(payload),
                blocks: Arc::new(blocks),
            },
        );
    }

    /// Drop entries whose payload is gone. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live());
        before - entries.len()
    }

    /// Number of entries whose payload is still alive.
    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
