//! Metrics for the routing core
//!
//! Prometheus-compatible counters and gauges covering allocation traffic,
//! host punishment, and per-mode pool occupancy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Counter for tracking totals
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-erasure-mode pool metrics
#[derive(Debug, Default)]
pub struct ModeMetrics {
    pub volume_count: Gauge,
    pub total_free_bytes: Gauge,
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    /// Per-mode pool gauges
    modes: Mutex<HashMap<String, Arc<ModeMetrics>>>,

    /// Global counters
    pub alloc_total: Counter,
    pub alloc_errors: Counter,
    pub punish_total: Counter,
    pub disk_resolves: Counter,

    /// Start time for uptime calculation
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            modes: Mutex::new(HashMap::new()),
            alloc_total: Counter::new(),
            alloc_errors: Counter::new(),
            punish_total: Counter::new(),
            disk_resolves: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a code mode
    pub fn mode(&self, name: &str) -> Arc<ModeMetrics> {
        let mut modes = self.modes.lock().unwrap();
        modes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ModeMetrics::default()))
            .clone()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        out.push_str("# HELP blobroute_alloc_total Total volume allocations\n");
        out.push_str("# TYPE blobroute_alloc_total counter\n");
        writeln!(out, "blobroute_alloc_total {}", self.alloc_total.get()).unwrap();

        out.push_str("# HELP blobroute_alloc_errors_total Failed volume allocations\n");
        out.push_str("# TYPE blobroute_alloc_errors_total counter\n");
        writeln!(out, "blobroute_alloc_errors_total {}", self.alloc_errors.get()).unwrap();

        out.push_str("# HELP blobroute_punish_total Host punishments applied\n");
        out.push_str("# TYPE blobroute_punish_total counter\n");
        writeln!(out, "blobroute_punish_total {}", self.punish_total.get()).unwrap();

        out.push_str("# HELP blobroute_disk_resolves_total Disk host resolutions\n");
        out.push_str("# TYPE blobroute_disk_resolves_total counter\n");
        writeln!(out, "blobroute_disk_resolves_total {}", self.disk_resolves.get()).unwrap();

        out.push_str("# HELP blobroute_uptime_seconds Process uptime in seconds\n");
        out.push_str("# TYPE blobroute_uptime_seconds gauge\n");
        writeln!(out, "blobroute_uptime_seconds {}", self.uptime_seconds()).unwrap();

        let modes = self.modes.lock().unwrap();

        out.push_str("# HELP blobroute_mode_volume_count Volumes pooled per mode\n");
        out.push_str("# TYPE blobroute_mode_volume_count gauge\n");
        for (name, metrics) in modes.iter() {
            writeln!(
                out,
                "blobroute_mode_volume_count{{mode=\"{}\"}} {}",
                name,
                metrics.volume_count.get()
            )
            .unwrap();
        }

        out.push_str("# HELP blobroute_mode_free_bytes Free bytes pooled per mode\n");
        out.push_str("# TYPE blobroute_mode_free_bytes gauge\n");
        for (name, metrics) in modes.iter() {
            writeln!(
                out,
                "blobroute_mode_free_bytes{{mode=\"{}\"}} {}",
                name,
                metrics.total_free_bytes.get()
            )
            .unwrap();
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
