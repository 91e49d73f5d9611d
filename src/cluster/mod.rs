//! Contracts of the external collaborators
//!
//! The cluster manager and the blob-id allocator live outside this crate;
//! only their call surfaces and wire shapes are defined here. Production
//! deployments implement these traits over their RPC clients; tests supply
//! in-memory fakes.

pub mod codemode;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::Result;

pub use codemode::{CodeMode, CodeModePolicy, Tactic};

/// Cluster-wide identifier widths.
pub type ClusterId = u32;
pub type DiskId = u32;
pub type Vid = u32;
pub type Vuid = u64;
pub type BlobId = u64;

/// Service name of the write proxies.
pub const SERVICE_NAME_PROXY: &str = "proxy";

/// Config keys served by [`ClusterManager::get_config`].
pub const VOLUME_RESERVE_SIZE_KEY: &str = "volume_reserve_size";
pub const VOLUME_CHUNK_SIZE_KEY: &str = "volume_chunk_size";
pub const CODE_MODE_KEY: &str = "code_mode";

/// One member of a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNode {
    pub host: String,
    pub idc: String,
}

/// Full current membership of a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub nodes: Vec<ServiceNode>,
}

/// Resolved location of a disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    pub disk_id: DiskId,
    pub host: String,
    pub idc: String,
}

/// Physical location of one erasure-coded unit of a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeUnit {
    pub vuid: Vuid,
    pub disk_id: DiskId,
    pub host: String,
}

/// A writable volume as granted by the cluster manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocVolumeInfo {
    pub vid: Vid,
    pub units: Vec<VolumeUnit>,
    pub free: u64,
    pub used: u64,
    /// Unix second the volume lease expires at.
    pub expire_at_secs: u64,
}

/// Arguments of a volume grant request.
///
/// `is_init` asks for already-active volumes only; otherwise the cluster
/// manager activates idle volumes as needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocVolumeArgs {
    pub is_init: bool,
    pub code_mode: CodeMode,
    pub count: usize,
}

/// Outcome of renewing one volume lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetainedVolume {
    pub vid: Vid,
    pub expire_at_secs: u64,
}

/// Contiguous range of blob ids, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidScope {
    pub start_bid: BlobId,
    pub end_bid: BlobId,
}

/// Cluster-manager RPC surface consumed by the routing core.
#[async_trait]
pub trait ClusterManager: Send + Sync + 'static {
    /// Full current membership of a service
    async fn get_service(&self, name: &str) -> Result<ServiceInfo>;

    /// Resolve a disk id to its data node host
    async fn disk_info(&self, disk_id: DiskId) -> Result<DiskInfo>;

    /// Read a cluster config value
    async fn get_config(&self, key: &str) -> Result<String>;

    /// Request one or more volumes of a mode
    async fn alloc_volume(&self, args: &AllocVolumeArgs) -> Result<Vec<AllocVolumeInfo>>;

    /// Renew leases on a batch of vids; vids missing from the response
    /// were rejected
    async fn retain_volume(&self, vids: &[Vid]) -> Result<Vec<RetainedVolume>>;
}

/// Blob-id allocator consumed by the volume manager.
#[async_trait]
pub trait BidAllocator: Send + Sync + 'static {
    /// Reserve `count` blob ids, returned as contiguous scopes
    async fn alloc(&self, count: u64) -> Result<Vec<BidScope>>;
}
