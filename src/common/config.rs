//! Configuration for the routing core

use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterId, SERVICE_NAME_PROXY};

/// Service controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Cluster this process belongs to
    pub cluster_id: ClusterId,

    /// Local data-center tag; rosters only keep hosts of this idc
    pub idc: String,

    /// Service names tracked by the roster refresh loop
    #[serde(default = "default_watch_services")]
    pub watch_services: Vec<String>,

    /// Roster refresh period
    #[serde(default = "default_reload_secs")]
    pub reload_secs: u64,

    /// Failures required before a threshold punish takes effect
    #[serde(default = "default_punish_threshold")]
    pub punish_threshold: u32,

    /// Window within which the failure streak stays valid
    #[serde(default = "default_punish_valid_interval")]
    pub punish_valid_interval_secs: u64,
}

fn default_watch_services() -> Vec<String> {
    vec![SERVICE_NAME_PROXY.to_string()]
}
fn default_reload_secs() -> u64 {
    10
}
fn default_punish_threshold() -> u32 {
    3
}
fn default_punish_valid_interval() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cluster_id: 0,
            idc: String::new(),
            watch_services: default_watch_services(),
            reload_secs: default_reload_secs(),
            punish_threshold: default_punish_threshold(),
            punish_valid_interval_secs: default_punish_valid_interval(),
        }
    }
}

impl ServiceConfig {
    /// Replace zero-valued settings with their defaults
    pub fn sanitize(&mut self) {
        if self.reload_secs == 0 {
            self.reload_secs = default_reload_secs();
        }
        if self.punish_threshold == 0 {
            self.punish_threshold = default_punish_threshold();
        }
        if self.punish_valid_interval_secs == 0 {
            self.punish_valid_interval_secs = default_punish_valid_interval();
        }
        if self.watch_services.is_empty() {
            self.watch_services = default_watch_services();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.idc.is_empty() {
            return Err(crate::Error::InvalidConfig("idc is required".into()));
        }
        Ok(())
    }
}

/// Volume manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Cluster this process belongs to
    pub cluster_id: ClusterId,

    /// Local data-center tag
    pub idc: String,

    /// Volumes requested per replenishment
    #[serde(default = "default_alloc_vols_num")]
    pub default_alloc_vols_num: usize,

    /// Volumes requested per mode at startup
    #[serde(default = "default_init_volume_num")]
    pub init_volume_num: usize,

    /// Fraction of a full pool kept as the low-water mark
    #[serde(default = "default_total_threshold_ratio")]
    pub total_threshold_ratio: f64,

    /// Lease renewal period
    #[serde(default = "default_retain_interval")]
    pub retain_interval_secs: u64,

    /// Vids renewed per retain RPC
    #[serde(default = "default_retain_batch_num")]
    pub retain_batch_num: usize,

    /// Pause between retain batches
    #[serde(default = "default_retain_batch_interval")]
    pub retain_batch_interval_secs: u64,

    /// Gauge publication period
    #[serde(default = "default_metric_report_interval")]
    pub metric_report_interval_secs: u64,

    /// Read from the cluster manager at startup, not from local config
    #[serde(skip)]
    pub volume_reserve_size: u64,
}

fn default_alloc_vols_num() -> usize {
    1
}
fn default_init_volume_num() -> usize {
    4
}
fn default_total_threshold_ratio() -> f64 {
    0.1
}
fn default_retain_interval() -> u64 {
    40
}
fn default_retain_batch_num() -> usize {
    400
}
fn default_retain_batch_interval() -> u64 {
    1
}
fn default_metric_report_interval() -> u64 {
    60
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            cluster_id: 0,
            idc: String::new(),
            default_alloc_vols_num: default_alloc_vols_num(),
            init_volume_num: default_init_volume_num(),
            total_threshold_ratio: default_total_threshold_ratio(),
            retain_interval_secs: default_retain_interval(),
            retain_batch_num: default_retain_batch_num(),
            retain_batch_interval_secs: default_retain_batch_interval(),
            metric_report_interval_secs: default_metric_report_interval(),
            volume_reserve_size: 0,
        }
    }
}

impl VolumeConfig {
    /// Replace zero-valued settings with their defaults and keep the
    /// replenishment count large enough to refill past the water mark.
    pub fn sanitize(&mut self) {
        if self.default_alloc_vols_num == 0 {
            self.default_alloc_vols_num = default_alloc_vols_num();
        }
        if self.init_volume_num == 0 {
            self.init_volume_num = default_init_volume_num();
        }
        if self.total_threshold_ratio <= 0.0 {
            self.total_threshold_ratio = default_total_threshold_ratio();
        }
        if self.retain_interval_secs == 0 {
            self.retain_interval_secs = default_retain_interval();
        }
        if self.retain_batch_num == 0 {
            self.retain_batch_num = default_retain_batch_num();
        }
        if self.retain_batch_interval_secs == 0 {
            self.retain_batch_interval_secs = default_retain_batch_interval();
        }
        if self.metric_report_interval_secs == 0 {
            self.metric_report_interval_secs = default_metric_report_interval();
        }

        let need = (self.total_threshold_ratio * self.init_volume_num as f64).ceil() as usize + 1;
        if self.default_alloc_vols_num < need {
            self.default_alloc_vols_num = need;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.idc.is_empty() {
            return Err(crate::Error::InvalidConfig("idc is required".into()));
        }
        if self.total_threshold_ratio > 1.0 {
            return Err(crate::Error::InvalidConfig(
                "total_threshold_ratio must be within (0, 1]".into(),
            ));
        }
        Ok(())
    }
}
