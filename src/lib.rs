//! # blobroute
//!
//! Client-side service-and-volume routing core of a distributed
//! blob-storage cluster:
//! - **Service controller** — resolves logical service names to currently
//!   reachable hosts, punishes misbehaving hosts for a period, and
//!   refreshes membership from the cluster manager.
//! - **Volume manager** — hands out writable volumes per erasure mode from
//!   a current/backup pool pair, replenishes the pools asynchronously, and
//!   renews volume leases in the background.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────┐
//!                    │      Cluster Manager      │
//!                    │ (membership, disks,       │
//!                    │  volume grants, leases)   │
//!                    └─────┬──────────────┬─────┘
//!         GetService/      │              │  AllocVolume/
//!         DiskInfo         │              │  RetainVolume
//!                 ┌────────▼───────┐ ┌───▼──────────────┐
//!                 │ ServiceController│ │  VolumeManager   │
//!                 │  roster + disk   │ │  per-mode pools  │
//!                 │  directory       │ │  current/backup  │
//!                 └──────────────────┘ └──────────────────┘
//! ```
//!
//! Both sides are in-process caches on the write path: lookups are
//! lock-light and synchronous, while refresh, replenishment, and lease
//! renewal run as background tasks. The cluster-manager RPC client and the
//! blob-id allocator are external collaborators whose contracts live in
//! [`cluster`].

pub mod cluster;
pub mod common;
pub mod service;
pub mod volume;

// Re-export commonly used types
pub use common::{Error, Result, ServiceConfig, VolumeConfig};
pub use service::{HostIdc, ServiceController};
pub use volume::{AllocRet, AllocVolsArgs, VolumeManager};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
