//! Volume allocation
//!
//! Hands out writable volumes against a requested erasure mode. Each mode
//! keeps a current/backup pool pair above a free-space water mark, refilled
//! asynchronously by a per-mode worker; a single retain task renews leases
//! for every pooled volume.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::cluster::{
    AllocVolumeArgs, AllocVolumeInfo, BidAllocator, BlobId, ClusterManager, CodeMode,
    CodeModePolicy, Vid, CODE_MODE_KEY, VOLUME_CHUNK_SIZE_KEY, VOLUME_RESERVE_SIZE_KEY,
};
use crate::common::{retry_once, Error, Result, VolumeConfig, METRICS};
use crate::volume::pool::{ModePool, SpaceAlloc, Volume, VolumeSet};

/// Pause before re-asking the cluster manager after backoff is exhausted.
const ALLOC_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Allocation request from a proxy write path.
#[derive(Debug, Clone)]
pub struct AllocVolsArgs {
    pub code_mode: CodeMode,
    /// Bytes the write will consume on the selected volume.
    pub fsize: u64,
    /// Blob ids to reserve alongside the volume.
    pub bid_count: u64,
    /// Vids the caller refuses (e.g. the vid a retried write failed on).
    pub excludes: Vec<Vid>,
    /// Vids the caller observed dead; dropped from the pool first.
    pub discards: Vec<Vid>,
}

/// One reserved bid range bound to the selected volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocRet {
    pub bid_start: BlobId,
    pub bid_end: BlobId,
    pub vid: Vid,
}

/// Replenishment order consumed by a mode's worker.
#[derive(Debug, Clone)]
struct AllocRequest {
    is_init: bool,
    is_backup: bool,
    count: usize,
}

/// Proxy-side allocator of volumes and blob ids.
pub struct VolumeManager {
    core: Arc<ManagerCore>,
    shutdown: watch::Sender<bool>,
}

struct ManagerCore {
    config: VolumeConfig,
    cm: Arc<dyn ClusterManager>,
    bids: Arc<dyn BidAllocator>,
    pools: HashMap<CodeMode, Arc<ModePool>>,
    alloc_txs: HashMap<CodeMode, mpsc::Sender<AllocRequest>>,
    /// Selection rotor shared by every mode; advances once per allocation.
    pre_idx: AtomicU64,
}

impl VolumeManager {
    /// Read cluster-side settings, build one pool per enabled code mode,
    /// start the background tasks, and order the initial volume fill.
    pub async fn new(
        config: VolumeConfig,
        cm: Arc<dyn ClusterManager>,
        bids: Arc<dyn BidAllocator>,
    ) -> Result<Self> {
        let mut config = config;
        config.sanitize();
        config.validate()?;

        config.volume_reserve_size = get_config_u64(&*cm, VOLUME_RESERVE_SIZE_KEY).await?;
        let chunk_size = get_config_u64(&*cm, VOLUME_CHUNK_SIZE_KEY).await?;
        let raw_policies = cm.get_config(CODE_MODE_KEY).await?;
        let policies: Vec<CodeModePolicy> = serde_json::from_str(&raw_policies)
            .map_err(|e| Error::InvalidConfig(format!("code_mode policies: {}", e)))?;

        let mut pools = HashMap::new();
        let mut alloc_txs = HashMap::new();
        let mut workers = Vec::new();
        for policy in policies.into_iter().filter(|p| p.enable) {
            let mode = policy.code_mode;
            let threshold = (config.init_volume_num as f64
                * mode.tactic().n as f64
                * chunk_size as f64
                * config.total_threshold_ratio) as u64;
            tracing::info!(
                "code mode {}: init volumes {}, threshold {}",
                mode,
                config.init_volume_num,
                threshold
            );

            let pool = Arc::new(ModePool::new(threshold));
            let (tx, rx) = mpsc::channel(1);
            pools.insert(mode, pool.clone());
            alloc_txs.insert(mode, tx);
            workers.push((mode, pool, rx));
        }

        let core = Arc::new(ManagerCore {
            config,
            cm,
            bids,
            pools,
            alloc_txs,
            pre_idx: AtomicU64::new(rand::random()),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        for (mode, pool, rx) in workers {
            tokio::spawn(alloc_volume_loop(
                core.clone(),
                mode,
                pool,
                rx,
                shutdown_rx.clone(),
            ));
        }
        for tx in core.alloc_txs.values() {
            // workers are idle at this point; the capacity-1 send cannot block
            let _ = tx
                .send(AllocRequest {
                    is_init: true,
                    is_backup: false,
                    count: core.config.init_volume_num,
                })
                .await;
        }
        tokio::spawn(retain_loop(core.clone(), shutdown_rx.clone()));
        tokio::spawn(metric_report_loop(core.clone(), shutdown_rx));

        Ok(Self { core, shutdown })
    }

    /// Stop every background task.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
        tracing::info!("volume manager closed");
    }

    /// Reserve `bid_count` blob ids and pick one volume of the requested
    /// mode; every returned range carries the same vid.
    pub async fn alloc(&self, args: &AllocVolsArgs) -> Result<Vec<AllocRet>> {
        let scopes = self.core.bids.alloc(args.bid_count).await?;
        let vid = match self.alloc_vid(args) {
            Ok(vid) => vid,
            Err(e) => {
                METRICS.alloc_errors.inc();
                return Err(e);
            }
        };
        METRICS.alloc_total.inc();

        Ok(scopes
            .into_iter()
            .map(|scope| AllocRet {
                bid_start: scope.start_bid,
                bid_end: scope.end_bid,
                vid,
            })
            .collect())
    }

    /// Snapshot of every volume pooled for the mode, current and backup.
    pub fn list(&self, mode: CodeMode) -> Result<Vec<AllocVolumeInfo>> {
        let pool = self
            .core
            .pools
            .get(&mode)
            .ok_or(Error::UnknownCodeMode(mode))?;
        Ok(pool.list_all().iter().map(|vol| vol.snapshot()).collect())
    }

    /// Drop dead volumes from the mode's active pool. Idempotent.
    pub fn discard(&self, mode: CodeMode, vids: &[Vid]) -> Result<()> {
        let pool = self
            .core
            .pools
            .get(&mode)
            .ok_or(Error::UnknownCodeMode(mode))?;
        tracing::debug!("discard mode {}, vids {:?}", mode, vids);
        pool.deal_discards(vids);
        Ok(())
    }

    fn alloc_vid(&self, args: &AllocVolsArgs) -> Result<Vid> {
        let pool = self
            .core
            .pools
            .get(&args.code_mode)
            .ok_or(Error::UnknownCodeMode(args.code_mode))?;

        let (vols, debited) = self.available_vols(pool, args)?;
        match self.next_vid(pool, &vols, args) {
            Ok(vid) => Ok(vid),
            Err(e) => {
                // the walk consumed nothing; hand the pre-debit back
                debited.update_total_free(args.fsize as i64);
                tracing::error!(
                    "no volume of mode {} fits {} bytes among {} candidates",
                    args.code_mode,
                    args.fsize,
                    vols.len()
                );
                Err(e)
            }
        }
    }

    /// Candidate volumes for the write, together with the set carrying the
    /// `fsize` pre-debit. A capacity miss emits a replenishment order.
    fn available_vols(
        &self,
        pool: &Arc<ModePool>,
        args: &AllocVolsArgs,
    ) -> Result<(Vec<Arc<Volume>>, Arc<VolumeSet>)> {
        pool.deal_discards(&args.discards);

        let selected = match pool.need_switch_to_backup(args.fsize) {
            Ok(Some(set)) => Some((set.list(), set)),
            Ok(None) => pool.promote_candidates(args.fsize),
            Err(e) => {
                self.alloc_notify(args.code_mode, self.core.config.default_alloc_vols_num, true);
                tracing::error!(
                    "mode {} at water mark with no backup, replenishing",
                    args.code_mode
                );
                return Err(e);
            }
        };

        let Some((vols, debited)) = selected else {
            self.alloc_notify(args.code_mode, self.core.config.default_alloc_vols_num, false);
            tracing::error!("mode {} has no pool that fits {} bytes", args.code_mode, args.fsize);
            return Err(Error::NoAvailableVolume);
        };
        if vols.is_empty() {
            debited.update_total_free(args.fsize as i64);
            self.alloc_notify(args.code_mode, self.core.config.default_alloc_vols_num, false);
            return Err(Error::NoAvailableVolume);
        }

        if pool.backup_is_empty() {
            self.alloc_notify(args.code_mode, self.core.config.default_alloc_vols_num, true);
        }

        Ok((vols, debited))
    }

    /// Walk the candidates circularly from the rotor position; the first
    /// volume that takes the debit wins. Volumes left under the reserve
    /// are dropped from the pool after their lock is released.
    fn next_vid(&self, pool: &Arc<ModePool>, vols: &[Arc<Volume>], args: &AllocVolsArgs) -> Result<Vid> {
        let rotor = self.core.pre_idx.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let start = (rotor % vols.len() as u64) as usize;

        for i in 0..vols.len() {
            let vol = &vols[(start + i) % vols.len()];
            if args.excludes.contains(&vol.vid()) {
                continue;
            }
            match vol.alloc_space(args.fsize, self.core.config.volume_reserve_size) {
                SpaceAlloc::Granted => return Ok(vol.vid()),
                SpaceAlloc::GrantedFull => {
                    tracing::info!("volume {} is full, removing from pool", vol.vid());
                    pool.delete(vol.vid());
                    return Ok(vol.vid());
                }
                SpaceAlloc::Rejected => continue,
            }
        }
        Err(Error::NoAvailableVolume)
    }

    /// Non-blocking replenishment order: one outstanding request per mode,
    /// extra notifications are dropped on the floor.
    fn alloc_notify(&self, mode: CodeMode, count: usize, is_backup: bool) {
        let Some(tx) = self.core.alloc_txs.get(&mode) else {
            panic!("no allocation channel for mode {}", mode);
        };
        match tx.try_send(AllocRequest {
            is_init: false,
            is_backup,
            count,
        }) {
            Ok(()) => tracing::info!(
                "replenishment requested: mode {}, count {}, backup {}",
                mode,
                count,
                is_backup
            ),
            Err(_) => tracing::info!("mode {} is already replenishing", mode),
        }
    }
}

async fn get_config_u64(cm: &dyn ClusterManager, key: &str) -> Result<u64> {
    let raw = cm.get_config(key).await?;
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{}: {}", key, raw)))
}

async fn alloc_volume_with_retry(
    core: &ManagerCore,
    args: &AllocVolumeArgs,
) -> Result<Vec<AllocVolumeInfo>> {
    retry_once(
        || async { core.cm.alloc_volume(args).await },
        Duration::from_millis(200),
    )
    .await
}

/// Permanent per-mode worker: drains the request channel and keeps calling
/// the cluster manager until the full requested count has been delivered.
async fn alloc_volume_loop(
    core: Arc<ManagerCore>,
    mode: CodeMode,
    pool: Arc<ModePool>,
    mut rx: mpsc::Receiver<AllocRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let req = tokio::select! {
            _ = shutdown.changed() => return,
            req = rx.recv() => match req {
                Some(req) => req,
                None => return,
            },
        };

        let mut is_init = req.is_init;
        let mut require = req.count;
        loop {
            let args = AllocVolumeArgs {
                is_init,
                code_mode: mode,
                count: require,
            };
            tracing::info!(
                "requesting {} volumes of mode {} (init: {}, backup: {})",
                require,
                mode,
                is_init,
                req.is_backup
            );

            let granted = match alloc_volume_with_retry(&core, &args).await {
                Ok(granted) => granted,
                Err(e) => {
                    tracing::warn!("alloc volume of mode {} failed: {}", mode, e);
                    // idle volumes may be activated on the next pass
                    is_init = false;
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tokio::time::sleep(ALLOC_RETRY_DELAY) => {}
                    }
                    continue;
                }
            };

            for (index, info) in granted.iter().enumerate() {
                let vol = Arc::new(Volume::new(info.clone()));
                // an oversupplied init request seeds both pools
                let to_backup = if args.is_init
                    && granted.len() >= 2 * core.config.init_volume_num
                    && index >= core.config.init_volume_num
                {
                    true
                } else {
                    req.is_backup
                };
                pool.put(vol, to_backup);
            }

            if granted.len() < require {
                tracing::warn!(
                    "mode {} short on volumes: need {}, got {}",
                    mode,
                    require,
                    granted.len()
                );
                require -= granted.len();
                is_init = false;
                continue;
            }
            break;
        }
    }
}

/// Single lease-renewal task over every pooled volume of every mode.
async fn retain_loop(core: Arc<ManagerCore>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(core.config.retain_interval_secs);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(period) => {}
        }
        if let Err(e) = retain_all(&core, &mut shutdown).await {
            tracing::warn!("volume retain failed: {}", e);
        }
    }
}

async fn retain_all(core: &ManagerCore, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
    let mut by_vid: HashMap<Vid, Arc<Volume>> = HashMap::new();
    for pool in core.pools.values() {
        for vol in pool.list_all() {
            if !vol.is_deleted() {
                by_vid.insert(vol.vid(), vol);
            }
        }
    }
    if by_vid.is_empty() {
        return Ok(());
    }

    let vids: Vec<Vid> = by_vid.keys().copied().collect();
    let batch_pause = Duration::from_secs(core.config.retain_batch_interval_secs);
    for (index, batch) in vids.chunks(core.config.retain_batch_num).enumerate() {
        if index > 0 {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = tokio::time::sleep(batch_pause) => {}
            }
        }
        let renewed = core.cm.retain_volume(batch).await?;
        tracing::debug!("retained {} of {} volumes", renewed.len(), batch.len());
        for retained in renewed {
            if let Some(vol) = by_vid.get(&retained.vid) {
                vol.set_expire_at(retained.expire_at_secs);
            }
        }
    }
    Ok(())
}

/// Publishes per-mode pool occupancy gauges.
async fn metric_report_loop(core: Arc<ManagerCore>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(core.config.metric_report_interval_secs);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(period) => {}
        }
        for (mode, pool) in &core.pools {
            let metrics = METRICS.mode(mode.name());
            metrics.volume_count.set(pool.volume_count() as u64);
            metrics.total_free_bytes.set(pool.total_free().max(0) as u64);
        }
    }
}
