//! Monitoring side-channels: a second SSH connection per host running
//! probe commands under `HISTFILE=/dev/null` so user history stays
//! clean.
//!
//! Each probe opens a fresh exec channel with a watchdog; a collection
//! pass runs every probe concurrently, tolerates individual failures
//! (`"unknown"` placeholders), and records numeric results into the
//! per-session metric history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};

use super::error::{CoreError, CoreResult};
use super::host_keys::HostKeyStore;
use super::local_stats::mb_per_sec;
use super::metric_history::{MetricHistory, MetricKind};
use super::profile_models::SshConfig;
use super::ssh_engine::{authenticate_with_agent, build_auth_methods, SshAuthMethod, TrustHandler};
use russh::keys::{load_secret_key, Algorithm, PrivateKeyWithHashAlg};
use crate::{COLLECTION_PASS_TIMEOUT, MONITOR_DIAL_TIMEOUT, PROBE_TIMEOUT};

/// Interfaces that never represent real host traffic.
const VIRTUAL_IFACE_PREFIXES: [&str; 7] =
    ["lo", "docker", "veth", "dummy", "tunl", "sit", "bond"];

/// Devices accepted as the root disk for I/O rates.
const ROOT_DISK_DEVICES: [&str; 5] = ["sda", "nvme0n1", "vda", "xvda", "hda"];

struct CacheEntry {
    value: String,
    at: Instant,
    ttl: Option<Duration>,
}

/// One side-channel connection plus its probe cache.
pub struct MonitorChannel {
    handle: Handle<TrustHandler>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    latest: Mutex<Option<HashMap<String, String>>>,
    host: String,
}

impl MonitorChannel {
    /// Cached value for a literal probe-command string, honoring TTL.
    pub fn cached(&self, cmd: &str) -> Option<String> {
        let cache = match self.cache.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        let entry = cache.get(cmd)?;
        if let Some(ttl) = entry.ttl {
            if entry.at.elapsed() > ttl {
                return None;
            }
        }
        Some(entry.value.clone())
    }

    /// Memoizes a probe result (or a delta sample) under the literal
    /// command string. `ttl: None` never expires.
    pub fn cache(&self, cmd: &str, value: String, ttl: Option<Duration>) {
        let mut cache = match self.cache.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        cache.insert(
            cmd.to_string(),
            CacheEntry {
                value,
                at: Instant::now(),
                ttl,
            },
        );
    }

    /// Runs one command in a fresh session with history suppressed and a
    /// watchdog that abandons the channel on timeout.
    pub async fn probe(&self, cmd: &str) -> CoreResult<String> {
        let wrapped = format!("HISTFILE=/dev/null bash -c {}", shell_quote(cmd));
        let run = async {
            let channel = self.handle.channel_open_session().await?;
            channel.exec(true, wrapped.as_str()).await?;
            let (mut read_half, _write_half) = channel.split();
            let mut output = Vec::new();
            while let Some(msg) = read_half.wait().await {
                match msg {
                    ChannelMsg::Data { data } => output.extend_from_slice(&data),
                    ChannelMsg::ExtendedData { .. } => {}
                    ChannelMsg::Eof | ChannelMsg::Close => break,
                    ChannelMsg::ExitStatus { .. } => {}
                    _ => {}
                }
            }
            Ok::<String, CoreError>(String::from_utf8_lossy(&output).trim().to_string())
        };
        tokio::time::timeout(PROBE_TIMEOUT, run)
            .await
            .map_err(|_| {
                CoreError::timeout(format!(
                    "probe {cmd:?} on {} exceeded {PROBE_TIMEOUT:?}",
                    self.host
                ))
            })?
    }

    /// Probe with indefinite memoization, for static facts.
    async fn probe_memoized(&self, cmd: &str) -> Option<String> {
        if let Some(hit) = self.cached(cmd) {
            return Some(hit);
        }
        match self.probe(cmd).await {
            Ok(value) if !value.is_empty() => {
                self.cache(cmd, value.clone(), None);
                Some(value)
            }
            Ok(_) => None,
            Err(e) => {
                log::debug!("monitor {}: probe {cmd:?} failed: {e}", self.host);
                None
            }
        }
    }
}

/// Registry of monitoring side-channels and per-session histories.
pub struct MonitorManager {
    channels: DashMap<String, Arc<MonitorChannel>>,
    histories: DashMap<String, Arc<MetricHistory>>,
    host_keys: Arc<HostKeyStore>,
}

impl MonitorManager {
    pub fn new(host_keys: Arc<HostKeyStore>) -> Self {
        Self {
            channels: DashMap::new(),
            histories: DashMap::new(),
            host_keys,
        }
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.channels.contains_key(session_id)
    }

    pub fn history(&self, session_id: &str) -> Option<Arc<MetricHistory>> {
        self.histories.get(session_id).map(|h| h.clone())
    }

    /// Latest collected stats snapshot, if a pass has run.
    pub fn latest_stats(&self, session_id: &str) -> Option<HashMap<String, String>> {
        let channel = self.channels.get(session_id)?;
        let latest = match channel.latest.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        latest.clone()
    }

    /// Opens the second connection to the session's host with the same
    /// authenticator list and a shorter dial timeout.
    pub async fn connect(&self, session_id: &str, config: &SshConfig) -> CoreResult<()> {
        config.validate()?;
        let ssh_dir = directories::BaseDirs::new().map(|d| d.home_dir().join(".ssh"));
        let agent_socket = std::env::var("SSH_AUTH_SOCK").ok();
        let methods = build_auth_methods(config, agent_socket.as_deref(), ssh_dir.as_deref());
        if methods.is_empty() {
            return Err(CoreError::auth("no authentication methods for monitor"));
        }

        let handler = TrustHandler::new(
            self.host_keys.clone(),
            format!("{session_id}:monitor"),
            config.host.clone(),
            config.port,
        );
        let mut handle = tokio::time::timeout(
            MONITOR_DIAL_TIMEOUT,
            client::connect(
                Arc::new(client::Config::default()),
                (config.host.as_str(), config.port),
                handler,
            ),
        )
        .await
        .map_err(|_| {
            CoreError::timeout(format!(
                "monitor dial {} timed out after {MONITOR_DIAL_TIMEOUT:?}",
                config.host
            ))
        })??;

        let rsa_hash = handle.best_supported_rsa_hash().await?.flatten();
        let mut authenticated = false;
        for method in &methods {
            let ok = match method {
                SshAuthMethod::Password(password) => handle
                    .authenticate_password(&config.username, password)
                    .await?
                    .success(),
                SshAuthMethod::KeyFile(path) => match load_secret_key(path, None) {
                    Ok(key) => {
                        let hash = match key.algorithm() {
                            Algorithm::Rsa { .. } => rsa_hash,
                            _ => None,
                        };
                        handle
                            .authenticate_publickey(
                                &config.username,
                                PrivateKeyWithHashAlg::new(Arc::new(key), hash),
                            )
                            .await?
                            .success()
                    }
                    Err(_) => false,
                },
                SshAuthMethod::Agent => {
                    authenticate_with_agent(&mut handle, &config.username, rsa_hash)
                        .await
                        .unwrap_or(false)
                }
            };
            if ok {
                authenticated = true;
                break;
            }
        }
        if !authenticated {
            return Err(CoreError::auth(format!(
                "monitor authentication failed for {}@{}",
                config.username, config.host
            )));
        }

        self.channels.insert(
            session_id.to_string(),
            Arc::new(MonitorChannel {
                handle,
                cache: Mutex::new(HashMap::new()),
                latest: Mutex::new(None),
                host: config.host.clone(),
            }),
        );
        self.histories
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(MetricHistory::default()));
        log::info!("monitor {session_id}: side-channel open to {}", config.host);
        Ok(())
    }

    /// Closes the side-channel and keeps the history for later display.
    pub async fn close(&self, session_id: &str) {
        if let Some((_, channel)) = self.channels.remove(session_id) {
            let _ = channel
                .handle
                .disconnect(Disconnect::ByApplication, "monitor closed", "en")
                .await;
            log::info!("monitor {session_id}: side-channel closed");
        }
    }

    pub async fn close_all(&self) {
        let ids: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id).await;
        }
    }

    /// One collection pass: every probe in parallel, each bounded by the
    /// pass timeout. A missed probe contributes `"unknown"`; partial
    /// success is normal and never fatal.
    pub async fn collect(&self, session_id: &str) -> CoreResult<HashMap<String, String>> {
        let channel = self
            .channels
            .get(session_id)
            .map(|c| c.clone())
            .ok_or_else(|| CoreError::not_found("monitor channel", session_id))?;

        let ch = &channel;
        let (hostname, kernel, arch, uptime, memory, cpu, load, net, disk_usage, disk_io) = tokio::join!(
            pass(async { ch.probe_memoized("hostname").await }),
            pass(async { ch.probe_memoized("uname -r").await }),
            pass(async { ch.probe_memoized("uname -m").await }),
            pass(async {
                ch.probe("uptime -p").await.ok().map(|s| {
                    s.strip_prefix("up ").unwrap_or(&s).to_string()
                })
            }),
            pass(async {
                match ch.probe("cat /proc/meminfo").await.ok().and_then(|s| parse_meminfo(&s)) {
                    Some(v) => Some(v),
                    None => ch.probe("free -m").await.ok().and_then(|s| parse_free(&s)),
                }
                .map(|v| format!("{v:.1}"))
            }),
            pass(async {
                match ch.probe("top -bn1").await.ok().and_then(|s| parse_top_cpu(&s)) {
                    Some(v) => Some(v),
                    None => ch.probe("vmstat 1 2").await.ok().and_then(|s| parse_vmstat_cpu(&s)),
                }
                .map(|v| format!("{v:.1}"))
            }),
            pass(async {
                match ch.probe("cat /proc/loadavg").await.ok().and_then(|s| parse_loadavg(&s)) {
                    Some(v) => Some(v),
                    None => ch.probe("uptime").await.ok().and_then(|s| parse_uptime_load(&s)),
                }
                .map(|v| format!("{v:.2}"))
            }),
            pass(async { self.network_rates(ch).await }),
            pass(async {
                ch.probe("df -h /").await.ok().and_then(|s| parse_df_usage(&s))
            }),
            pass(async { self.disk_rates(ch).await }),
        );

        let mut stats = HashMap::new();
        let unknown = || "unknown".to_string();
        stats.insert("hostname".to_string(), hostname.unwrap_or_else(unknown));
        stats.insert("kernel".to_string(), kernel.unwrap_or_else(unknown));
        stats.insert("arch".to_string(), arch.unwrap_or_else(unknown));
        stats.insert("uptime".to_string(), uptime.unwrap_or_else(unknown));
        stats.insert("memory".to_string(), memory.unwrap_or_else(unknown));
        stats.insert("cpu".to_string(), cpu.unwrap_or_else(unknown));
        stats.insert("load".to_string(), load.unwrap_or_else(unknown));
        match net {
            Some((rx, tx)) => {
                stats.insert("network_rx".to_string(), format!("{rx:.2}"));
                stats.insert("network_tx".to_string(), format!("{tx:.2}"));
            }
            None => {
                stats.insert("network_rx".to_string(), unknown());
                stats.insert("network_tx".to_string(), unknown());
            }
        }
        stats.insert("disk_usage".to_string(), disk_usage.unwrap_or_else(unknown));
        match disk_io {
            Some((read, write)) => {
                stats.insert("disk_read".to_string(), format!("{read:.2}"));
                stats.insert("disk_write".to_string(), format!("{write:.2}"));
            }
            None => {
                stats.insert("disk_read".to_string(), unknown());
                stats.insert("disk_write".to_string(), unknown());
            }
        }

        self.record_history(session_id, &stats);
        {
            let mut latest = match channel.latest.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            *latest = Some(stats.clone());
        }
        Ok(stats)
    }

    /// Network MB/s from the delta between the current `/proc/net/dev`
    /// totals and the cached `(rx, tx, timestamp)` sample.
    async fn network_rates(&self, channel: &MonitorChannel) -> Option<(f64, f64)> {
        const CMD: &str = "cat /proc/net/dev";
        let raw = channel.probe(CMD).await.ok()?;
        let (_, rx, tx) = parse_net_dev(&raw)?;
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let previous = channel.cached(CMD).and_then(|s| parse_sample(&s));
        channel.cache(CMD, format!("{rx} {tx} {now}"), None);
        let (prev_rx, prev_tx, prev_ts) = previous?;
        let elapsed = now - prev_ts;
        Some((
            mb_per_sec(rx.saturating_sub(prev_rx), elapsed),
            mb_per_sec(tx.saturating_sub(prev_tx), elapsed),
        ))
    }

    /// Disk MB/s from `/proc/diskstats` sector counts (× 512 bytes).
    async fn disk_rates(&self, channel: &MonitorChannel) -> Option<(f64, f64)> {
        const CMD: &str = "cat /proc/diskstats";
        let raw = channel.probe(CMD).await.ok()?;
        let (read_sectors, write_sectors) = parse_diskstats(&raw)?;
        let read_bytes = read_sectors * 512;
        let write_bytes = write_sectors * 512;
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let previous = channel.cached(CMD).and_then(|s| parse_sample(&s));
        channel.cache(CMD, format!("{read_bytes} {write_bytes} {now}"), None);
        let (prev_read, prev_write, prev_ts) = previous?;
        let elapsed = now - prev_ts;
        Some((
            mb_per_sec(read_bytes.saturating_sub(prev_read), elapsed),
            mb_per_sec(write_bytes.saturating_sub(prev_write), elapsed),
        ))
    }

    fn record_history(&self, session_id: &str, stats: &HashMap<String, String>) {
        let history = self
            .histories
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(MetricHistory::default()))
            .clone();
        let now = Utc::now().timestamp();
        let mut record = |key: &str, kind: MetricKind| {
            if let Some(value) = stats
                .get(key)
                .and_then(|v| v.trim_end_matches('%').parse::<f64>().ok())
            {
                history.record(kind, now, value);
            }
        };
        record("cpu", MetricKind::Cpu);
        record("memory", MetricKind::Memory);
        record("load", MetricKind::Load);
        record("disk_usage", MetricKind::DiskUsage);
        record("disk_read", MetricKind::DiskRead);
        record("disk_write", MetricKind::DiskWrite);
        record("network_rx", MetricKind::NetworkRx);
        record("network_tx", MetricKind::NetworkTx);
    }
}

/// Bounds one probe future by the collection-pass timeout, flattening a
/// timeout into "no value".
async fn pass<T>(fut: impl std::future::Future<Output = Option<T>>) -> Option<T> {
    tokio::time::timeout(COLLECTION_PASS_TIMEOUT, fut)
        .await
        .ok()
        .flatten()
}

/// POSIX single-quote escaping for the probe wrapper.
pub(crate) fn shell_quote(cmd: &str) -> String {
    format!("'{}'", cmd.replace('\'', r#"'\''"#))
}

/// Decodes a cached `(value_a, value_b, timestamp)` sample.
pub(crate) fn parse_sample(raw: &str) -> Option<(u64, u64, f64)> {
    let mut fields = raw.split_whitespace();
    let a = fields.next()?.parse().ok()?;
    let b = fields.next()?.parse().ok()?;
    let ts = fields.next()?.parse().ok()?;
    Some((a, b, ts))
}

/// `/proc/meminfo` MemTotal/MemAvailable to used-percent.
pub(crate) fn parse_meminfo(raw: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = rest.split_whitespace().next()?.parse::<f64>().ok();
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = rest.split_whitespace().next()?.parse::<f64>().ok();
        }
    }
    let (total, available) = (total?, available?);
    if total <= 0.0 {
        return None;
    }
    Some((1.0 - available / total) * 100.0)
}

/// `free -m` fallback: used/total from the `Mem:` row.
pub(crate) fn parse_free(raw: &str) -> Option<f64> {
    let line = raw.lines().find(|l| l.starts_with("Mem:"))?;
    let mut fields = line.split_whitespace().skip(1);
    let total: f64 = fields.next()?.parse().ok()?;
    let used: f64 = fields.next()?.parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some(used / total * 100.0)
}

/// `top -bn1` idle column: usage is 100 minus idle.
pub(crate) fn parse_top_cpu(raw: &str) -> Option<f64> {
    let line = raw.lines().find(|l| l.contains("Cpu(s)"))?;
    for segment in line.split(',') {
        let segment = segment.trim();
        if let Some(value) = segment.strip_suffix(" id") {
            let value = value.trim().rsplit(|c: char| c.is_whitespace() || c == ':').next()?;
            let idle: f64 = value.trim().parse().ok()?;
            return Some((100.0 - idle).clamp(0.0, 100.0));
        }
    }
    None
}

/// `vmstat 1 2` fallback: idle is the 15th column of the last sample
/// row.
pub(crate) fn parse_vmstat_cpu(raw: &str) -> Option<f64> {
    let line = raw
        .lines()
        .filter(|l| {
            let first = l.split_whitespace().next();
            first.map(|f| f.parse::<u64>().is_ok()).unwrap_or(false)
        })
        .last()?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let idle: f64 = fields.get(14)?.parse().ok()?;
    Some((100.0 - idle).clamp(0.0, 100.0))
}

/// `/proc/loadavg` first field.
pub(crate) fn parse_loadavg(raw: &str) -> Option<f64> {
    raw.split_whitespace().next()?.parse().ok()
}

/// `uptime` fallback: first value after `load average:`.
pub(crate) fn parse_uptime_load(raw: &str) -> Option<f64> {
    let idx = raw.find("load average:")?;
    raw[idx + "load average:".len()..]
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// First non-virtual interface in `/proc/net/dev` with its cumulative
/// rx/tx byte counters.
pub(crate) fn parse_net_dev(raw: &str) -> Option<(String, u64, u64)> {
    for line in raw.lines().skip(2) {
        let (iface, rest) = line.split_once(':')?;
        let iface = iface.trim();
        if VIRTUAL_IFACE_PREFIXES.iter().any(|p| iface.starts_with(p)) {
            continue;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let rx: u64 = fields.first()?.parse().ok()?;
        let tx: u64 = fields.get(8)?.parse().ok()?;
        return Some((iface.to_string(), rx, tx));
    }
    None
}

/// `df -h /` Use% column.
pub(crate) fn parse_df_usage(raw: &str) -> Option<String> {
    let line = raw.lines().nth(1)?;
    line.split_whitespace()
        .find(|field| field.ends_with('%'))
        .map(|s| s.to_string())
}

/// Root-device cumulative sectors read/written from `/proc/diskstats`.
pub(crate) fn parse_diskstats(raw: &str) -> Option<(u64, u64)> {
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let device = fields.get(2)?;
        if !ROOT_DISK_DEVICES.contains(device) {
            continue;
        }
        let read_sectors: u64 = fields.get(5)?.parse().ok()?;
        let write_sectors: u64 = fields.get(9)?.parse().ok()?;
        return Some((read_sectors, write_sectors));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_survives_embedded_quotes() {
        assert_eq!(shell_quote("uname -r"), "'uname -r'");
        assert_eq!(shell_quote("echo 'hi'"), r#"'echo '\''hi'\'''"#);
    }

    #[test]
    fn meminfo_percent() {
        let raw = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let used = parse_meminfo(raw).unwrap();
        assert!((used - 75.0).abs() < 0.01);
        assert!(parse_meminfo("garbage").is_none());
    }

    #[test]
    fn free_fallback_percent() {
        let raw = "              total        used        free\nMem:           7934        3201         512\nSwap:          2047           0        2047\n";
        let used = parse_free(raw).unwrap();
        assert!((used - 3201.0 / 7934.0 * 100.0).abs() < 0.01);
    }

    #[test]
    fn top_idle_column() {
        let raw = "top - 12:00:00 up 1 day\n%Cpu(s):  1.2 us,  0.4 sy,  0.0 ni, 97.8 id,  0.5 wa,  0.0 hi,  0.1 si,  0.0 st\n";
        let cpu = parse_top_cpu(raw).unwrap();
        assert!((cpu - 2.2).abs() < 0.01);
    }

    #[test]
    fn vmstat_last_row() {
        let raw = "procs -----------memory----------\n r  b   swpd   free   buff  cache   si   so    bi    bo   in   cs us sy id wa st\n 1  0      0 123456  78901 234567    0    0     1     2   30   40  3  1 95  1  0\n 0  0      0 123456  78901 234567    0    0     1     2   30   40  5  2 90  3  0\n";
        let cpu = parse_vmstat_cpu(raw).unwrap();
        assert!((cpu - 10.0).abs() < 0.01);
    }

    #[test]
    fn loadavg_first_field() {
        assert_eq!(parse_loadavg("0.52 0.58 0.59 1/389 12345"), Some(0.52));
        assert_eq!(
            parse_uptime_load(" 12:00:00 up 10 days,  2 users,  load average: 1.15, 0.80, 0.60"),
            Some(1.15)
        );
    }

    #[test]
    fn net_dev_skips_virtual_interfaces() {
        let raw = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 9999999    1000    0    0    0     0          0         0  9999999    1000    0    0    0     0       0          0
docker0:  123456     100    0    0    0     0          0         0    54321     90    0    0    0     0       0          0
  eth0: 1000000    2000    0    0    0     0          0         0   500000   1500    0    0    0     0       0          0
";
        let (iface, rx, tx) = parse_net_dev(raw).unwrap();
        assert_eq!(iface, "eth0");
        assert_eq!(rx, 1_000_000);
        assert_eq!(tx, 500_000);
    }

    #[test]
    fn df_use_percent_column() {
        let raw = "Filesystem      Size  Used Avail Use% Mounted on\n/dev/sda1        98G   42G   51G  46% /\n";
        assert_eq!(parse_df_usage(raw).unwrap(), "46%");
    }

    #[test]
    fn diskstats_root_device_sectors() {
        let raw = "\
   7       0 loop0 100 0 800 50 0 0 0 0 0 10 10 0 0 0 0
   8       0 sda 41234 1234 987654 8000 22222 3333 456789 9000 0 7000 17000 0 0 0 0
   8       1 sda1 41000 1200 980000 7900 22000 3300 450000 8900 0 6900 16800 0 0 0 0
";
        let (read, write) = parse_diskstats(raw).unwrap();
        assert_eq!(read, 987_654);
        assert_eq!(write, 456_789);
    }

    #[test]
    fn delta_sample_roundtrip_matches_expected_rate() {
        // rx 1,000,000 at t=100; 1,500,000 at t=101 -> ~0.48 MB/s.
        let (rx0, _tx0, t0) = parse_sample("1000000 0 100.0").unwrap();
        let (rx1, _tx1, t1) = parse_sample("1500000 0 101.0").unwrap();
        let rate = mb_per_sec(rx1 - rx0, t1 - t0);
        assert!((rate - 0.48).abs() < 0.01, "got {rate}");
        // A third identical reading yields zero.
        let (rx2, _, t2) = parse_sample("1500000 0 102.0").unwrap();
        assert_eq!(mb_per_sec(rx2 - rx1, t2 - t1), 0.0);
    }

    #[test]
    fn sample_parsing_rejects_garbage() {
        assert!(parse_sample("1 2").is_none());
        assert!(parse_sample("a b c").is_none());
    }
}
