//! Service discovery and host health gating
//!
//! Resolves logical service names to currently reachable hosts, punishes
//! misbehaving hosts for a period, and refreshes membership from the
//! cluster manager on a timer. Disk hosts are resolved on demand and
//! memoized under the reserved `diskhost` pseudo-service.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::watch;

use crate::cluster::{ClusterManager, DiskId};
use crate::common::{timestamp_now, Error, Result, ServiceConfig, SingleFlight, METRICS};
use crate::service::roster::{HostEntry, RosterSlot};

/// Reserved pseudo-service holding disk host entries.
const DISK_HOST_SERVICE: &str = "diskhost";

fn entry_key(service: &str, host: &str) -> String {
    format!("{}{}", service, host)
}

/// Resolved disk location with a punish snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdc {
    pub host: String,
    pub idc: String,
    pub punished: bool,
}

/// Client-side directory and health gate over cluster services.
pub struct ServiceController {
    inner: Arc<ControllerInner>,
    shutdown: watch::Sender<bool>,
}

struct ControllerInner {
    config: ServiceConfig,
    cm: Arc<dyn ClusterManager>,
    /// service-name + host (or diskhost + disk id) → shared entry
    directory: RwLock<HashMap<String, Arc<HostEntry>>>,
    /// Fixed at construction; lookups of other names fail.
    rosters: HashMap<String, RosterSlot>,
    flights: SingleFlight<DiskId, HostIdc>,
}

impl ServiceController {
    /// Load the watched rosters once (failing construction on error) and
    /// start the refresh task.
    pub async fn new(config: ServiceConfig, cm: Arc<dyn ClusterManager>) -> Result<Self> {
        let mut config = config;
        config.sanitize();
        config.validate()?;

        let rosters = config
            .watch_services
            .iter()
            .map(|name| (name.clone(), RosterSlot::default()))
            .collect();
        let inner = Arc::new(ControllerInner {
            config,
            cm,
            directory: RwLock::new(HashMap::new()),
            rosters,
            flights: SingleFlight::new(),
        });
        inner.load().await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(refresh_loop(inner.clone(), shutdown_rx));

        Ok(Self { inner, shutdown })
    }

    /// Stop the refresh task.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Return one non-punished host of the service, picked uniformly at
    /// random. Punished picks are evicted from the roster and selection
    /// retries until a healthy host or an empty roster remains.
    pub fn get_service_host(&self, name: &str) -> Result<String> {
        let slot = self
            .inner
            .rosters
            .get(name)
            .ok_or_else(|| Error::NotFoundService(name.to_string()))?;

        let mut evicted = false;
        loop {
            let snapshot = slot.snapshot();
            if snapshot.is_empty() {
                return Err(if evicted {
                    Error::NoHealthyHost(name.to_string())
                } else {
                    Error::EmptyRoster(name.to_string())
                });
            }

            let idx = rand::thread_rng().gen_range(0..snapshot.len());
            let entry = &snapshot[idx];
            if !entry.is_punished() {
                return Ok(entry.host().to_string());
            }

            // A losing race here means a refresh republished the slot;
            // the retry simply selects against the new sequence.
            if slot.evict(idx, entry) {
                evicted = true;
                tracing::debug!("evicted punished host {} from {}", entry.host(), name);
            }
        }
    }

    /// Return all non-punished hosts of the service in shuffled order.
    pub fn get_service_hosts(&self, name: &str) -> Result<Vec<String>> {
        let slot = self
            .inner
            .rosters
            .get(name)
            .ok_or_else(|| Error::NotFoundService(name.to_string()))?;

        let snapshot = slot.snapshot();
        if snapshot.is_empty() {
            return Err(Error::EmptyRoster(name.to_string()));
        }

        let mut hosts: Vec<String> = snapshot
            .iter()
            .filter(|entry| !entry.is_punished())
            .map(|entry| entry.host().to_string())
            .collect();
        if hosts.is_empty() {
            return Err(Error::NoHealthyHost(name.to_string()));
        }

        hosts.shuffle(&mut rand::thread_rng());
        Ok(hosts)
    }

    /// Resolve the data node host of a disk, memoizing the answer. Misses
    /// go to the cluster manager under a per-disk single-flight gate, so
    /// a burst of callers costs one RPC.
    pub async fn get_disk_host(&self, disk_id: DiskId) -> Result<HostIdc> {
        let key = entry_key(DISK_HOST_SERVICE, &disk_id.to_string());
        if let Some(entry) = self.inner.directory.read().unwrap().get(&key) {
            return Ok(HostIdc {
                host: entry.host().to_string(),
                idc: entry.idc().to_string(),
                punished: entry.is_punished(),
            });
        }

        let inner = self.inner.clone();
        self.inner
            .flights
            .run(disk_id, || async move {
                let info = inner.cm.disk_info(disk_id).await?;
                METRICS.disk_resolves.inc();
                let entry = Arc::new(HostEntry::new(info.host, info.idc));
                let resolved = HostIdc {
                    host: entry.host().to_string(),
                    idc: entry.idc().to_string(),
                    punished: entry.is_punished(),
                };
                inner.directory.write().unwrap().insert(key, entry);
                Ok(resolved)
            })
            .await
    }

    /// Punish a service host for `punish_secs`.
    ///
    /// # Panics
    ///
    /// Panics when the host was never registered; punishing an unknown
    /// entry is a programmer error.
    pub fn punish_service(&self, service: &str, host: &str, punish_secs: u64) {
        let entry = self.inner.must_lookup(service, host);
        entry.punish_for(punish_secs);
        METRICS.punish_total.inc();
    }

    /// Punish a service host once its failure streak reaches the
    /// configured threshold within the valid interval. A streak whose
    /// window has lapsed restarts from zero.
    pub fn punish_service_with_threshold(&self, service: &str, host: &str, punish_secs: u64) {
        let entry = self.inner.must_lookup(service, host);
        let streak = entry.bump_streak();
        if streak >= self.inner.config.punish_threshold {
            let anchor_age = timestamp_now().saturating_sub(entry.streak_anchor());
            if anchor_age <= self.inner.config.punish_valid_interval_secs {
                entry.punish_for(punish_secs);
                METRICS.punish_total.inc();
                return;
            }
            entry.reset_streak();
        }
        entry.touch_anchor();
    }

    /// Punish a disk host for `punish_secs`.
    pub fn punish_disk(&self, disk_id: DiskId, punish_secs: u64) {
        self.punish_service(DISK_HOST_SERVICE, &disk_id.to_string(), punish_secs);
    }

    /// Threshold-gated variant of [`ServiceController::punish_disk`].
    pub fn punish_disk_with_threshold(&self, disk_id: DiskId, punish_secs: u64) {
        self.punish_service_with_threshold(DISK_HOST_SERVICE, &disk_id.to_string(), punish_secs);
    }
}

impl ControllerInner {
    fn must_lookup(&self, service: &str, host: &str) -> Arc<HostEntry> {
        let key = entry_key(service, host);
        self.directory
            .read()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| panic!("host not in service directory: {}-{}", service, host))
    }

    /// Pull fresh membership for every watched service and publish it.
    /// An empty filtered set leaves the previous roster in place.
    async fn load(&self) -> Result<()> {
        for name in &self.config.watch_services {
            let service = self.cm.get_service(name).await?;
            tracing::debug!("found {} nodes of {} in the cluster", service.nodes.len(), name);

            let fresh: Vec<Arc<HostEntry>> = service
                .nodes
                .into_iter()
                .filter(|node| node.idc == self.config.idc)
                .map(|node| Arc::new(HostEntry::new(node.host, node.idc)))
                .collect();
            if fresh.is_empty() {
                tracing::warn!("no {} hosts in idc {}, keeping previous roster", name, self.config.idc);
                continue;
            }

            {
                let mut directory = self.directory.write().unwrap();
                for entry in &fresh {
                    directory.insert(entry_key(name, entry.host()), entry.clone());
                }
            }
            if let Some(slot) = self.rosters.get(name) {
                slot.publish(fresh);
            }
        }
        Ok(())
    }
}

async fn refresh_loop(inner: Arc<ControllerInner>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(inner.config.reload_secs);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                if let Err(e) = inner.load().await {
                    tracing::warn!("service reload failed: {}", e);
                }
            }
            _ = shutdown.changed() => {
                tracing::debug!("service refresh loop stopped");
                return;
            }
        }
    }
}
