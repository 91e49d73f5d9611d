//! Shared test doubles for the integration suite

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use blobroute::cluster::{
    AllocVolumeArgs, AllocVolumeInfo, BidAllocator, BidScope, ClusterManager, DiskId, DiskInfo,
    RetainedVolume, ServiceInfo, ServiceNode, Vid, CODE_MODE_KEY, VOLUME_CHUNK_SIZE_KEY,
    VOLUME_RESERVE_SIZE_KEY,
};
use blobroute::{Error, Result};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn node(host: &str, idc: &str) -> ServiceNode {
    ServiceNode {
        host: host.to_string(),
        idc: idc.to_string(),
    }
}

pub fn vol(vid: Vid, free: u64) -> AllocVolumeInfo {
    AllocVolumeInfo {
        vid,
        units: vec![],
        free,
        used: 0,
        expire_at_secs: 100,
    }
}

pub async fn wait_until(mut probe: impl FnMut() -> bool) {
    for _ in 0..500 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

/// In-memory cluster manager with scripted volume grants and recorded
/// call traffic.
pub struct MockClusterManager {
    pub services: Mutex<HashMap<String, Vec<ServiceNode>>>,
    pub disks: Mutex<HashMap<DiskId, DiskInfo>>,
    /// Simulated latency of one DiskInfo RPC.
    pub disk_delay: Duration,
    pub disk_info_calls: AtomicUsize,
    pub chunk_size: u64,
    pub alloc_responses: Mutex<VecDeque<Result<Vec<AllocVolumeInfo>>>>,
    pub alloc_calls: Mutex<Vec<AllocVolumeArgs>>,
    pub retain_expire: AtomicU64,
}

impl MockClusterManager {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            disks: Mutex::new(HashMap::new()),
            disk_delay: Duration::ZERO,
            disk_info_calls: AtomicUsize::new(0),
            chunk_size: 100,
            alloc_responses: Mutex::new(VecDeque::new()),
            alloc_calls: Mutex::new(Vec::new()),
            retain_expire: AtomicU64::new(0),
        }
    }

    pub fn with_service(self, name: &str, nodes: Vec<ServiceNode>) -> Self {
        self.services.lock().unwrap().insert(name.to_string(), nodes);
        self
    }

    pub fn with_disk(self, disk_id: DiskId, host: &str, idc: &str) -> Self {
        self.disks.lock().unwrap().insert(
            disk_id,
            DiskInfo {
                disk_id,
                host: host.to_string(),
                idc: idc.to_string(),
            },
        );
        self
    }

    pub fn with_disk_delay(mut self, delay: Duration) -> Self {
        self.disk_delay = delay;
        self
    }

    pub fn with_alloc_response(self, response: Result<Vec<AllocVolumeInfo>>) -> Self {
        self.alloc_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn set_service(&self, name: &str, nodes: Vec<ServiceNode>) {
        self.services.lock().unwrap().insert(name.to_string(), nodes);
    }

    pub fn alloc_call_count(&self) -> usize {
        self.alloc_calls.lock().unwrap().len()
    }
}

impl Default for MockClusterManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterManager for MockClusterManager {
    async fn get_service(&self, name: &str) -> Result<ServiceInfo> {
        let services = self.services.lock().unwrap();
        match services.get(name) {
            Some(nodes) => Ok(ServiceInfo {
                nodes: nodes.clone(),
            }),
            None => Err(Error::NotFoundService(name.to_string())),
        }
    }

    async fn disk_info(&self, disk_id: DiskId) -> Result<DiskInfo> {
        self.disk_info_calls.fetch_add(1, Ordering::SeqCst);
        if !self.disk_delay.is_zero() {
            tokio::time::sleep(self.disk_delay).await;
        }
        self.disks
            .lock()
            .unwrap()
            .get(&disk_id)
            .cloned()
            .ok_or_else(|| Error::Upstream(format!("unknown disk: {}", disk_id)))
    }

    async fn get_config(&self, key: &str) -> Result<String> {
        match key {
            VOLUME_RESERVE_SIZE_KEY => Ok("10".into()),
            VOLUME_CHUNK_SIZE_KEY => Ok(self.chunk_size.to_string()),
            CODE_MODE_KEY => Ok(r#"[
                {"code_mode": "EC6P6", "enable": true},
                {"code_mode": "EC15P12", "enable": false}
            ]"#
            .into()),
            _ => Err(Error::Upstream(format!("no config: {}", key))),
        }
    }

    async fn alloc_volume(&self, args: &AllocVolumeArgs) -> Result<Vec<AllocVolumeInfo>> {
        self.alloc_calls.lock().unwrap().push(args.clone());
        self.alloc_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Upstream("alloc script exhausted".into())))
    }

    async fn retain_volume(&self, vids: &[Vid]) -> Result<Vec<RetainedVolume>> {
        let expire = self.retain_expire.load(Ordering::SeqCst);
        Ok(vids
            .iter()
            .map(|&vid| RetainedVolume {
                vid,
                expire_at_secs: expire,
            })
            .collect())
    }
}

/// Bid allocator handing out sequential ids, split into scopes of at most
/// `scope_len` to exercise multi-range results.
pub struct MockBidAllocator {
    next: AtomicU64,
    scope_len: u64,
}

impl MockBidAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            scope_len: u64::MAX,
        }
    }

    pub fn with_scope_len(scope_len: u64) -> Self {
        Self {
            next: AtomicU64::new(1),
            scope_len,
        }
    }
}

impl Default for MockBidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BidAllocator for MockBidAllocator {
    async fn alloc(&self, count: u64) -> Result<Vec<BidScope>> {
        let mut start = self.next.fetch_add(count, Ordering::SeqCst);
        let end = start + count - 1;
        let mut scopes = Vec::new();
        while start <= end {
            let scope_end = end.min(start.saturating_add(self.scope_len - 1));
            scopes.push(BidScope {
                start_bid: start,
                end_bid: scope_end,
            });
            start = scope_end + 1;
        }
        Ok(scopes)
    }
}
