//! Host-side metrics provider answering `get-system-stats` for local
//! tabs. Mirrors the remote probe's stats map keys; missing values are
//! reported as `"unknown"`, never as a failed pass.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use sysinfo::{Disks, Networks, System};

/// Interface prefixes excluded from throughput aggregation.
const VIRTUAL_IFACE_PREFIXES: [&str; 6] = ["lo", "docker", "veth", "dummy", "tunl", "sit"];

struct RateSample {
    rx: u64,
    tx: u64,
    at: Instant,
}

pub struct LocalStatsProvider {
    system: Mutex<System>,
    networks: Mutex<Networks>,
    last_net: Mutex<Option<RateSample>>,
}

/// MB/s from a byte delta over an elapsed wall-clock interval.
pub fn mb_per_sec(delta_bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    delta_bytes as f64 / elapsed_secs / (1024.0 * 1024.0)
}

fn is_virtual_iface(name: &str) -> bool {
    VIRTUAL_IFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

impl Default for LocalStatsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStatsProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            last_net: Mutex::new(None),
        }
    }

    /// Collects the local stats map. Partial success is normal; fields
    /// that cannot be read come back as `"unknown"`.
    pub fn collect(&self) -> HashMap<String, String> {
        let mut stats = HashMap::new();
        let unknown = || "unknown".to_string();

        stats.insert(
            "hostname".to_string(),
            System::host_name().unwrap_or_else(unknown),
        );
        stats.insert(
            "kernel".to_string(),
            System::kernel_version().unwrap_or_else(unknown),
        );
        stats.insert("arch".to_string(), std::env::consts::ARCH.to_string());
        stats.insert("uptime".to_string(), format_uptime(System::uptime()));

        {
            let mut system = match self.system.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            system.refresh_cpu_usage();
            system.refresh_memory();
            stats.insert(
                "cpu".to_string(),
                format!("{:.1}", system.global_cpu_usage()),
            );
            let total = system.total_memory();
            if total > 0 {
                let used = total.saturating_sub(system.available_memory());
                stats.insert(
                    "memory".to_string(),
                    format!("{:.1}", used as f64 / total as f64 * 100.0),
                );
            } else {
                stats.insert("memory".to_string(), unknown());
            }
        }

        let load = System::load_average();
        stats.insert("load".to_string(), format!("{:.2}", load.one));

        let (rx_rate, tx_rate) = self.network_rates();
        stats.insert("network_rx".to_string(), format!("{rx_rate:.2}"));
        stats.insert("network_tx".to_string(), format!("{tx_rate:.2}"));

        stats.insert(
            "disk_usage".to_string(),
            root_disk_usage().unwrap_or_else(unknown),
        );
        // Host-local disk I/O counters are not exposed portably; the
        // remote probe covers them for SSH tabs.
        stats.insert("disk_read".to_string(), unknown());
        stats.insert("disk_write".to_string(), unknown());

        stats
    }

    /// True delta rate over the totals of all physical interfaces.
    /// First call after startup reports 0.0 until a baseline exists.
    fn network_rates(&self) -> (f64, f64) {
        let (rx_total, tx_total) = {
            let mut networks = match self.networks.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            networks.refresh();
            let mut rx = 0u64;
            let mut tx = 0u64;
            for (name, data) in networks.iter() {
                if is_virtual_iface(name) {
                    continue;
                }
                rx += data.total_received();
                tx += data.total_transmitted();
            }
            (rx, tx)
        };

        let mut last = match self.last_net.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        let now = Instant::now();
        let rates = match last.as_ref() {
            Some(sample) => {
                let elapsed = now.duration_since(sample.at).as_secs_f64();
                (
                    mb_per_sec(rx_total.saturating_sub(sample.rx), elapsed),
                    mb_per_sec(tx_total.saturating_sub(sample.tx), elapsed),
                )
            }
            None => (0.0, 0.0),
        };
        *last = Some(RateSample {
            rx: rx_total,
            tx: tx_total,
            at: now,
        });
        rates
    }
}

fn root_disk_usage() -> Option<String> {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.iter().max_by_key(|d| d.total_space()))?;
    let total = root.total_space();
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(root.available_space());
    Some(format!("{:.0}%", used as f64 / total as f64 * 100.0))
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_math_matches_expected_mb_per_sec() {
        // 500,000 bytes over one second is ~0.48 MB/s.
        let rate = mb_per_sec(1_500_000 - 1_000_000, 1.0);
        assert!((rate - 0.48).abs() < 0.01, "got {rate}");
        assert_eq!(mb_per_sec(0, 1.0), 0.0);
        assert_eq!(mb_per_sec(100, 0.0), 0.0);
    }

    #[test]
    fn virtual_interfaces_excluded() {
        assert!(is_virtual_iface("lo"));
        assert!(is_virtual_iface("docker0"));
        assert!(is_virtual_iface("veth12ab"));
        assert!(!is_virtual_iface("eth0"));
        assert!(!is_virtual_iface("enp3s0"));
        assert!(!is_virtual_iface("wlan0"));
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(59), "0m");
        assert_eq!(format_uptime(3_660), "1h 1m");
        assert_eq!(format_uptime(90_000), "1d 1h 0m");
    }

    #[test]
    fn collect_reports_every_expected_key() {
        let provider = LocalStatsProvider::new();
        let stats = provider.collect();
        for key in [
            "hostname", "kernel", "arch", "uptime", "cpu", "memory", "load",
            "network_rx", "network_tx", "disk_usage", "disk_read", "disk_write",
        ] {
            assert!(stats.contains_key(key), "missing {key}");
        }
    }
}
