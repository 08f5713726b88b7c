//! Process-wide directory of outbound record identities.
//!
//! Maps a user-visible alias to the record's shared [`OutDataState`]. An
//! alias appears at most once at any instant; registration is idempotent
//! and retirement is atomic.

use crate::record::OutDataState;
use crate::types::{Priority, RecordStatus};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Alias-keyed directory of in-flight record state.
#[derive(Debug, Default)]
pub struct RecordRegistry {
    entries: DashMap<String, Arc<OutDataState>>,
    /// Sequence source for record identities (`"{name}-{seq}"`).
    sequence: AtomicU64,
    stats: RegistryStats,
}

impl RecordRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record under its alias, returning the in-flight state.
    ///
    /// Idempotent: if the alias is already present, the existing handle is
    /// returned and no new identity is minted.
    pub fn add(&self, alias: &str, name: &str, priority: Priority) -> Arc<OutDataState> {
        self.entries
            .entry(alias.to_string())
            .or_insert_with(|| {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                let id = format!("{name}-{seq}");
                debug!(alias, id = %id, "registered outbound record");
                self.stats.added.fetch_add(1, Ordering::Relaxed);
                Arc::new(OutDataState::new(id, alias, priority))
            })
            .clone()
    }

    /// Look up the in-flight state for an alias.
    pub fn lookup(&self, alias: &str) -> Option<Arc<OutDataState>> {
        let found = self.entries.get(alias).map(|entry| entry.value().clone());
        if found.is_some() {
            self.stats.lookup_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.lookup_misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Current terminal status for an alias, if registered.
    pub fn status(&self, alias: &str) -> Option<RecordStatus> {
        self.lookup(alias).map(|state| state.status())
    }

    /// Remove an alias from the directory, returning its state.
    pub fn retire(&self, alias: &str) -> Option<Arc<OutDataState>> {
        let removed = self.entries.remove(alias).map(|(_, state)| state);
        if removed.is_some() {
            self.stats.retired.fetch_add(1, Ordering::Relaxed);
            debug!(alias, "retired outbound record");
        }
        removed
    }

    /// Remove and return every registered state (shutdown path).
    pub fn drain_all(&self) -> Vec<Arc<OutDataState>> {
        let aliases: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        aliases.iter().filter_map(|alias| self.retire(alias)).collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Registry counters.
#[derive(Debug, Default)]
struct RegistryStats {
    added: AtomicU64,
    retired: AtomicU64,
    lookup_hits: AtomicU64,
    lookup_misses: AtomicU64,
}

impl RegistryStats {
    fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            added: self.added.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            lookup_hits: self.lookup_hits.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of registry counters.
#[derive(Debug, Clone, Copy)]
pub struct RegistryStatsSnapshot {
    /// Entries created.
    pub added: u64,
    /// Entries removed.
    pub retired: u64,
    /// Successful lookups.
    pub lookup_hits: u64,
    /// Failed lookups.
    pub lookup_misses: u64,
}
