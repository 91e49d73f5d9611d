//! Host roster bookkeeping
//!
//! A [`HostEntry`] is shared between the per-service roster and the disk
//! directory. Punish state lives in atomics so lookups never need the
//! roster lock to read it.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::common::timestamp_now;

/// A known host with its punish bookkeeping.
#[derive(Debug)]
pub struct HostEntry {
    host: String,
    idc: String,
    /// Unix second the punishment ends at.
    punish_until: AtomicU64,
    /// Failures reported within the current valid interval.
    fail_streak: AtomicU32,
    /// Unix second of the last streak update.
    streak_anchor: AtomicU64,
}

impl HostEntry {
    pub fn new(host: impl Into<String>, idc: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            idc: idc.into(),
            punish_until: AtomicU64::new(0),
            fail_streak: AtomicU32::new(0),
            streak_anchor: AtomicU64::new(0),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn idc(&self) -> &str {
        &self.idc
    }

    pub fn is_punished(&self) -> bool {
        timestamp_now() < self.punish_until.load(Ordering::SeqCst)
    }

    /// Punish the host for `secs` from now. The end time only moves
    /// forward for repeated punishments of the same or longer duration.
    pub fn punish_for(&self, secs: u64) {
        self.punish_until
            .store(timestamp_now() + secs, Ordering::SeqCst);
    }

    /// Record one failure, returning the streak length including it.
    pub(crate) fn bump_streak(&self) -> u32 {
        self.fail_streak.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_streak(&self) {
        self.fail_streak.store(0, Ordering::SeqCst);
    }

    pub(crate) fn streak_anchor(&self) -> u64 {
        self.streak_anchor.load(Ordering::SeqCst)
    }

    pub(crate) fn touch_anchor(&self) {
        self.streak_anchor.store(timestamp_now(), Ordering::SeqCst);
    }
}

/// Atomic slot publishing an immutable host sequence.
///
/// Readers clone the published `Arc`; a refresh replaces the sequence
/// unconditionally, while eviction republishes a truncated copy only after
/// re-checking that the slot still holds the entry it targets.
#[derive(Debug, Default)]
pub struct RosterSlot {
    hosts: RwLock<Arc<Vec<Arc<HostEntry>>>>,
}

impl RosterSlot {
    pub fn snapshot(&self) -> Arc<Vec<Arc<HostEntry>>> {
        self.hosts.read().unwrap().clone()
    }

    pub fn publish(&self, hosts: Vec<Arc<HostEntry>>) {
        *self.hosts.write().unwrap() = Arc::new(hosts);
    }

    /// Remove the entry at `idx` if the published sequence still holds it.
    /// Returns false when a refresh replaced the slot in the meantime.
    pub fn evict(&self, idx: usize, entry: &Arc<HostEntry>) -> bool {
        let mut slot = self.hosts.write().unwrap();
        match slot.get(idx) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                let mut next: Vec<Arc<HostEntry>> = slot.iter().cloned().collect();
                next.remove(idx);
                *slot = Arc::new(next);
                true
            }
            _ => false,
        }
    }
}
