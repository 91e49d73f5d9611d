//! Volume pools
//!
//! A [`VolumeSet`] is an ordered collection of volumes with an aggregate
//! free-space counter; a [`ModePool`] pairs the active set with a warm
//! backup behind a single slot lock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use crate::cluster::{AllocVolumeInfo, Vid, VolumeUnit};
use crate::common::{Error, Result};

/// Space accounting of one volume, guarded by the volume's own lock.
#[derive(Debug)]
struct VolumeState {
    free: u64,
    used: u64,
    expire_at_secs: u64,
    deleted: bool,
}

/// Outcome of debiting write space from a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceAlloc {
    Granted,
    /// Granted, and the residual free space fell under the reserve;
    /// the volume is flagged deleted and must leave its pool.
    GrantedFull,
    Rejected,
}

/// A writable extent granted by the cluster manager.
#[derive(Debug)]
pub struct Volume {
    vid: Vid,
    units: Vec<VolumeUnit>,
    state: RwLock<VolumeState>,
}

impl Volume {
    pub fn new(info: AllocVolumeInfo) -> Self {
        Self {
            vid: info.vid,
            units: info.units,
            state: RwLock::new(VolumeState {
                free: info.free,
                used: info.used,
                expire_at_secs: info.expire_at_secs,
                deleted: false,
            }),
        }
    }

    pub fn vid(&self) -> Vid {
        self.vid
    }

    pub fn free(&self) -> u64 {
        self.state.read().unwrap().free
    }

    pub fn is_deleted(&self) -> bool {
        self.state.read().unwrap().deleted
    }

    pub fn expire_at_secs(&self) -> u64 {
        self.state.read().unwrap().expire_at_secs
    }

    pub fn set_expire_at(&self, secs: u64) {
        self.state.write().unwrap().expire_at_secs = secs;
    }

    /// Flag the volume deleted. Returns false when already flagged.
    pub fn mark_deleted(&self) -> bool {
        let mut state = self.state.write().unwrap();
        if state.deleted {
            return false;
        }
        state.deleted = true;
        true
    }

    /// Debit `fsize` from the volume. The space move and the deleted-flag
    /// flip happen under one lock acquisition; removal from the pool is
    /// the caller's job once the lock is released.
    pub fn alloc_space(&self, fsize: u64, reserve: u64) -> SpaceAlloc {
        let mut state = self.state.write().unwrap();
        if state.deleted || state.free < fsize {
            return SpaceAlloc::Rejected;
        }
        state.free -= fsize;
        state.used += fsize;
        if state.free < reserve {
            state.deleted = true;
            return SpaceAlloc::GrantedFull;
        }
        SpaceAlloc::Granted
    }

    /// Read-only copy of the volume's current shape.
    pub fn snapshot(&self) -> AllocVolumeInfo {
        let state = self.state.read().unwrap();
        AllocVolumeInfo {
            vid: self.vid,
            units: self.units.clone(),
            free: state.free,
            used: state.used,
            expire_at_secs: state.expire_at_secs,
        }
    }
}

/// Ordered set of volumes (sorted by vid) with an aggregate free counter.
///
/// `total_free` tracks the sum of member free space: `put` credits the
/// joining volume, `delete` debits whatever the leaving volume still held,
/// and allocation paths move it with `update_total_free`.
#[derive(Debug, Default)]
pub struct VolumeSet {
    vols: RwLock<Vec<Arc<Volume>>>,
    total_free: AtomicI64,
}

impl VolumeSet {
    pub fn list(&self) -> Vec<Arc<Volume>> {
        self.vols.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.vols.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vols.read().unwrap().is_empty()
    }

    pub fn get(&self, vid: Vid) -> Option<Arc<Volume>> {
        let vols = self.vols.read().unwrap();
        vols.binary_search_by_key(&vid, |v| v.vid())
            .ok()
            .map(|pos| vols[pos].clone())
    }

    pub fn put(&self, vol: Arc<Volume>) {
        let free = vol.free();
        let mut vols = self.vols.write().unwrap();
        match vols.binary_search_by_key(&vol.vid(), |v| v.vid()) {
            Ok(_) => {
                tracing::debug!("volume {} already pooled, ignoring", vol.vid());
            }
            Err(pos) => {
                vols.insert(pos, vol);
                self.total_free.fetch_add(free as i64, Ordering::SeqCst);
            }
        }
    }

    /// Remove `vid`, debiting its remaining free space. True when present.
    pub fn delete(&self, vid: Vid) -> bool {
        let mut vols = self.vols.write().unwrap();
        match vols.binary_search_by_key(&vid, |v| v.vid()) {
            Ok(pos) => {
                let vol = vols.remove(pos);
                self.total_free
                    .fetch_sub(vol.free() as i64, Ordering::SeqCst);
                true
            }
            Err(_) => false,
        }
    }

    pub fn total_free(&self) -> i64 {
        self.total_free.load(Ordering::SeqCst)
    }

    /// Adjust the aggregate counter, returning the new value.
    pub fn update_total_free(&self, delta: i64) -> i64 {
        self.total_free.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

/// Per-mode pair of volume sets under a free-space water mark.
///
/// The slot lock protects only which set occupies `current` and `backup`;
/// membership and `total_free` are guarded by each set's own lock and
/// counter, so `put`/`delete`/`deal_discards` work through a read guard.
/// Promotion takes the write lock, which excludes them while the pair is
/// re-seated.
#[derive(Debug)]
pub struct ModePool {
    slots: RwLock<PoolSlots>,
    threshold: u64,
}

#[derive(Debug)]
struct PoolSlots {
    current: Arc<VolumeSet>,
    backup: Arc<VolumeSet>,
}

impl ModePool {
    pub fn new(threshold: u64) -> Self {
        Self {
            slots: RwLock::new(PoolSlots {
                current: Arc::new(VolumeSet::default()),
                backup: Arc::new(VolumeSet::default()),
            }),
            threshold,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn current(&self) -> Arc<VolumeSet> {
        self.slots.read().unwrap().current.clone()
    }

    pub fn backup(&self) -> Arc<VolumeSet> {
        self.slots.read().unwrap().backup.clone()
    }

    pub fn backup_is_empty(&self) -> bool {
        self.slots.read().unwrap().backup.is_empty()
    }

    pub fn put(&self, vol: Arc<Volume>, backup: bool) {
        let slots = self.slots.read().unwrap();
        if backup {
            slots.backup.put(vol);
        } else {
            slots.current.put(vol);
        }
    }

    /// Drop `vid` from whichever set holds it.
    pub fn delete(&self, vid: Vid) {
        let slots = self.slots.read().unwrap();
        if !slots.current.delete(vid) {
            slots.backup.delete(vid);
        }
    }

    /// Volumes of both sets, current first.
    pub fn list_all(&self) -> Vec<Arc<Volume>> {
        let slots = self.slots.read().unwrap();
        let mut all = slots.current.list();
        all.extend(slots.backup.list());
        all
    }

    pub fn volume_count(&self) -> usize {
        let slots = self.slots.read().unwrap();
        slots.current.len() + slots.backup.len()
    }

    pub fn total_free(&self) -> i64 {
        let slots = self.slots.read().unwrap();
        slots.current.total_free() + slots.backup.total_free()
    }

    /// Pre-debit `fsize` against the active set and decide whether the
    /// caller must switch to backup.
    ///
    /// `Ok(Some(set))` keeps the debit on `set` and allocation proceeds
    /// from it. `Ok(None)` rolled the debit back; promote via
    /// [`ModePool::promote_candidates`]. `Err(NoAvailableVolume)` means
    /// the active pool hit the water mark with no backup standing by.
    pub fn need_switch_to_backup(&self, fsize: u64) -> Result<Option<Arc<VolumeSet>>> {
        let slots = self.slots.read().unwrap();
        let current = slots.current.clone();
        let total = current.update_total_free(-(fsize as i64));
        if total <= self.threshold as i64 {
            current.update_total_free(fsize as i64);
            if slots.backup.is_empty() {
                return Err(Error::NoAvailableVolume);
            }
            return Ok(None);
        }
        Ok(Some(current))
    }

    /// Promote backup to current when the active set is exhausted, then
    /// pre-debit `fsize` from the resulting active set. Promotion is a
    /// transfer: the former backup becomes current and an empty set takes
    /// the backup slot. `None` when even the promoted set cannot hold
    /// `fsize` (nothing stays debited in that case).
    pub fn promote_candidates(&self, fsize: u64) -> Option<(Vec<Arc<Volume>>, Arc<VolumeSet>)> {
        let mut slots = self.slots.write().unwrap();
        let total = slots.current.total_free();
        if total < self.threshold as i64 || total < fsize as i64 {
            tracing::info!("promoting backup pool, former current free: {}", total);
            slots.current = slots.backup.clone();
            slots.backup = Arc::new(VolumeSet::default());
        }
        if slots.current.total_free() < fsize as i64 {
            return None;
        }
        let current = slots.current.clone();
        current.update_total_free(-(fsize as i64));
        Some((current.list(), current))
    }

    /// Flag and drop discarded vids from the active set. Idempotent:
    /// already-deleted volumes are left alone.
    pub fn deal_discards(&self, discards: &[Vid]) {
        if discards.is_empty() {
            return;
        }
        let slots = self.slots.read().unwrap();
        for &vid in discards {
            if let Some(vol) = slots.current.get(vid) {
                if vol.mark_deleted() {
                    slots.current.delete(vid);
                }
            }
        }
    }
}
