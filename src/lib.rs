//! Thermic core: a multi-session terminal and remote-session
//! supervisor.
//!
//! The crate owns a fleet of independent interactive sessions (local
//! PTYs, SSH shells, SFTP file channels, RDP graphics), multiplexes
//! their byte streams onto a typed event bus, and enforces lifecycle,
//! resource and failure contracts across them. Presentation is an
//! external collaborator: frontends subscribe to [`core::EventBus`] and
//! invoke the functions under [`commands`].

pub mod commands;
pub mod core;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config_store::ConfigStore;
use crate::core::error::{CoreError, CoreResult};
use crate::core::events::EventBus;
use crate::core::host_keys::HostKeyStore;
use crate::core::local_stats::LocalStatsProvider;
use crate::core::monitor::MonitorManager;
use crate::core::profile_store::ProfileStore;
use crate::core::pty_engine::PtyEngine;
use crate::core::rdp_engine::RdpEngine;
use crate::core::resources::ResourceManager;
use crate::core::sftp_channel::SftpManager;
use crate::core::shell_probe::ShellProbe;
use crate::core::ssh_engine::SshEngine;
use crate::core::tab_supervisor::TabSupervisor;

// Fleet caps.
pub const MAX_SESSIONS: usize = 50;
pub const MAX_SSH_SESSIONS: usize = 50;
pub const MAX_SFTP_CLIENTS: usize = 25;
pub const MAX_RDP_SESSIONS: usize = 10;
pub const MAX_PROFILES: usize = 200;
pub const MAX_TAGS_PER_PROFILE: usize = 20;
pub const MAX_FILE_HISTORY: usize = 20;
pub const METRIC_HISTORY_CAPACITY: usize = 60;

// Sidebar width clamp.
pub const MIN_SIDEBAR_WIDTH: u32 = 180;
pub const MAX_SIDEBAR_WIDTH: u32 = 600;

// Timing contracts.
pub const CONFIG_SAVE_DEBOUNCE: Duration = Duration::from_secs(1);
pub const SHELL_PROBE_TTL: Duration = Duration::from_secs(30);
pub const SSH_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const RDP_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const MONITOR_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const COLLECTION_PASS_TIMEOUT: Duration = Duration::from_millis(1200);
pub const SSH_READ_DEADLINE: Duration = Duration::from_secs(30);
pub const HANG_THRESHOLD: Duration = Duration::from_secs(60);
pub const CLOSE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

// PTY reader tuning.
pub const PTY_READ_BUF: usize = 4096;
pub const PTY_MAX_READ_ERRORS: u32 = 5;

// Virtual-folder recency window, in days.
pub const RECENT_PROFILE_DAYS: i64 = 7;

/// Initializes `env_logger` for embedders without their own logging
/// setup. Safe to call more than once; `RUST_LOG` overrides the `info`
/// default.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .try_init();
}

/// Shared state aggregate handed to every command. Wires the stores,
/// engines and supervisor together and owns the teardown tree.
pub struct App {
    pub bus: EventBus,
    pub config: Arc<ConfigStore>,
    pub profiles: Arc<ProfileStore>,
    pub shells: Arc<ShellProbe>,
    pub host_keys: Arc<HostKeyStore>,
    pub sftp: Arc<SftpManager>,
    pub monitor: Arc<MonitorManager>,
    pub pty: PtyEngine,
    pub ssh: SshEngine,
    pub rdp: RdpEngine,
    pub local_stats: Arc<LocalStatsProvider>,
    pub tabs: Arc<TabSupervisor>,
    pub resources: Arc<ResourceManager>,
}

impl App {
    /// Opens the app against the platform-default directories
    /// (`<user-config-dir>/Thermic`, `~/.ssh/known_hosts`).
    pub fn open() -> CoreResult<Self> {
        let config_path = ConfigStore::default_path()?;
        let config = ConfigStore::load(config_path.clone());
        let profiles_dir = match config.snapshot().profiles_path {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => config_path
                .parent()
                .ok_or_else(|| CoreError::state("config path has no parent directory"))?
                .join("Profiles"),
        };
        let known_hosts = HostKeyStore::default_path()?;
        Self::assemble(config, profiles_dir, known_hosts)
    }

    /// Fully path-injected constructor (tests and embedders).
    pub fn open_at(
        config_path: PathBuf,
        profiles_dir: PathBuf,
        known_hosts_path: PathBuf,
    ) -> CoreResult<Self> {
        let config = ConfigStore::load(config_path);
        Self::assemble(config, profiles_dir, known_hosts_path)
    }

    fn assemble(
        config: Arc<ConfigStore>,
        profiles_dir: PathBuf,
        known_hosts_path: PathBuf,
    ) -> CoreResult<Self> {
        let bus = EventBus::default();
        let resources = ResourceManager::new("app");

        let profiles = ProfileStore::open(profiles_dir, bus.clone())?;
        profiles.start_watcher()?;

        let host_keys = Arc::new(HostKeyStore::new(known_hosts_path, bus.clone()));
        let sftp = Arc::new(SftpManager::new());
        let monitor = Arc::new(MonitorManager::new(host_keys.clone()));
        let pty = PtyEngine::new(bus.clone());
        let ssh = SshEngine::new(bus.clone(), host_keys.clone(), sftp.clone(), monitor.clone());
        let rdp = RdpEngine::new(bus.clone());
        let shells = Arc::new(ShellProbe::new(config.clone()));
        let local_stats = Arc::new(LocalStatsProvider::new());

        let tabs = TabSupervisor::new(
            bus.clone(),
            pty.clone(),
            ssh.clone(),
            rdp.clone(),
            sftp.clone(),
            monitor.clone(),
            profiles.clone(),
            shells.clone(),
            local_stats.clone(),
        );

        // Synchronous teardown pieces ride the resource tree; the async
        // engines are drained explicitly in shutdown().
        {
            let profiles = profiles.clone();
            resources.register(Box::new(move || -> CoreResult<()> {
                profiles.stop_watcher();
                Ok(())
            }));
        }
        {
            let config = config.clone();
            resources.register(Box::new(move || config.flush()));
        }
        {
            let rdp = rdp.clone();
            resources.register(Box::new(move || -> CoreResult<()> {
                rdp.close_all();
                Ok(())
            }));
        }

        Ok(Self {
            bus,
            config,
            profiles,
            shells,
            host_keys,
            sftp,
            monitor,
            pty,
            ssh,
            rdp,
            local_stats,
            tabs,
            resources,
        })
    }

    /// Cascaded shutdown: drains every engine, then walks the resource
    /// tree (watcher stop, config force-save, RDP teardown).
    pub async fn shutdown(&self) {
        self.pty.close_all().await;
        self.ssh.close_all().await;
        self.sftp.close_all().await;
        self.monitor.close_all().await;
        if let Err(e) = self.resources.close_all() {
            log::warn!("shutdown: resource teardown reported: {e}");
        }
        log::info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn app_opens_seeds_and_shuts_down() {
        let dir = tempdir().unwrap();
        let app = App::open_at(
            dir.path().join("Thermic/config.yaml"),
            dir.path().join("Thermic/Profiles"),
            dir.path().join(".ssh/known_hosts"),
        )
        .unwrap();

        assert!(dir.path().join("Thermic/config.yaml").exists());
        assert!(!app.profiles.list_profiles().is_empty());

        app.config.set_theme("dark").unwrap();
        app.shutdown().await;
        assert!(!app.config.is_dirty());
        assert!(app.resources.is_closed());
        let raw = std::fs::read_to_string(dir.path().join("Thermic/config.yaml")).unwrap();
        assert!(raw.contains("theme: dark"));
    }
}
