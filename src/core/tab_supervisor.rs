//! Tab↔session binding and lifecycle orchestration.
//!
//! A tab is the frontend-visible handle owning exactly one session. The
//! supervisor creates tabs (optionally from profiles), routes shell
//! startup to the PTY/SSH/RDP engines, mirrors session status onto the
//! tab with an event per transition, and drives reconnect/teardown
//! cascades.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::error::{CoreError, CoreResult};
use super::events::{Event, EventBus};
use super::local_stats::LocalStatsProvider;
use super::monitor::MonitorManager;
use super::profile_models::{Profile, ProfileType, RdpConfig, SshConfig};
use super::profile_store::ProfileStore;
use super::pty_engine::PtyEngine;
use super::rdp_engine::RdpEngine;
use super::sftp_channel::SftpManager;
use super::shell_probe::ShellProbe;
use super::ssh_engine::SshEngine;

/// Lifecycle state of a session, mirrored onto its tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Hanging,
    Failed,
    Disconnected,
}

impl SessionStatus {
    /// The supervisor's status machine. Within a connect attempt the
    /// status moves monotonically; Failed/Disconnected/Hanging return to
    /// Connecting only through reconnect.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match self {
            Connecting => matches!(next, Connected | Failed),
            Connected => matches!(next, Hanging | Disconnected | Failed),
            Hanging => matches!(next, Disconnected | Failed | Connecting),
            Failed | Disconnected => matches!(next, Connecting),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Local,
    Ssh,
    Rdp,
}

/// Frontend-visible tab state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    pub title: String,
    pub session_id: String,
    pub kind: ConnectionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdp: Option<RdpConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    pub is_active: bool,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub created_at: DateTime<Utc>,
}

/// Snapshot answering `get-active-tab-info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTabInfo {
    pub tab_id: String,
    pub hostname: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<HashMap<String, String>>,
}

pub struct TabSupervisor {
    tabs: RwLock<HashMap<String, Tab>>,
    bus: EventBus,
    pty: PtyEngine,
    ssh: SshEngine,
    rdp: RdpEngine,
    sftp: Arc<SftpManager>,
    monitor: Arc<MonitorManager>,
    profiles: Arc<ProfileStore>,
    shells: Arc<ShellProbe>,
    local_stats: Arc<LocalStatsProvider>,
}

impl TabSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        pty: PtyEngine,
        ssh: SshEngine,
        rdp: RdpEngine,
        sftp: Arc<SftpManager>,
        monitor: Arc<MonitorManager>,
        profiles: Arc<ProfileStore>,
        shells: Arc<ShellProbe>,
        local_stats: Arc<LocalStatsProvider>,
    ) -> Arc<Self> {
        let supervisor = Arc::new(Self {
            tabs: RwLock::new(HashMap::new()),
            bus,
            pty,
            ssh,
            rdp,
            sftp,
            monitor,
            profiles,
            shells,
            local_stats,
        });
        // Session pumps report Hanging/Disconnected asynchronously;
        // mirror those onto the owning tab.
        let weak = Arc::downgrade(&supervisor);
        supervisor.ssh.set_status_hook(Arc::new(move |session_id, status, error| {
            if let Some(supervisor) = weak.upgrade() {
                supervisor.on_session_status(session_id, status, error);
            }
        }));
        supervisor
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Tab>> {
        match self.tabs.read() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Tab>> {
        match self.tabs.write() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    // --- queries ---

    /// All tabs in their global order (created-at ascending).
    pub fn get_tabs(&self) -> Vec<Tab> {
        let mut tabs: Vec<Tab> = self.lock_read().values().cloned().collect();
        tabs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tabs
    }

    pub fn get_tab(&self, tab_id: &str) -> CoreResult<Tab> {
        self.lock_read()
            .get(tab_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("tab", tab_id))
    }

    fn tab_by_session(&self, session_id: &str) -> Option<Tab> {
        self.lock_read()
            .values()
            .find(|t| t.session_id == session_id)
            .cloned()
    }

    pub fn active_tab(&self) -> Option<Tab> {
        self.lock_read().values().find(|t| t.is_active).cloned()
    }

    // --- creation ---

    /// Creates a tab (not yet started, not yet active). The connection
    /// kind follows the provided config: rdp beats ssh beats local.
    pub fn create_tab(
        &self,
        title: Option<String>,
        shell: Option<String>,
        ssh_config: Option<SshConfig>,
        rdp_config: Option<RdpConfig>,
    ) -> CoreResult<Tab> {
        if let Some(cfg) = &ssh_config {
            cfg.validate()?;
        }
        if let Some(cfg) = &rdp_config {
            cfg.validate()?;
        }
        let kind = if rdp_config.is_some() {
            ConnectionKind::Rdp
        } else if ssh_config.is_some() {
            ConnectionKind::Ssh
        } else {
            ConnectionKind::Local
        };
        let title = title.unwrap_or_else(|| match (&kind, &ssh_config, &rdp_config) {
            (ConnectionKind::Ssh, Some(cfg), _) => format!("{}@{}", cfg.username, cfg.host),
            (ConnectionKind::Rdp, _, Some(cfg)) => format!("{} (RDP)", cfg.host),
            _ => shell
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or("Terminal")
                .to_string(),
        });
        let tab = Tab {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            session_id: uuid::Uuid::new_v4().to_string(),
            kind,
            shell,
            ssh: ssh_config,
            rdp: rdp_config,
            profile_id: None,
            is_active: false,
            status: SessionStatus::Connecting,
            last_error: None,
            cols: 120,
            rows: 30,
            created_at: Utc::now(),
        };
        self.lock_write().insert(tab.id.clone(), tab.clone());
        log::info!("tab {}: created ({:?})", tab.id, tab.kind);
        Ok(tab)
    }

    /// Instantiates a tab from a saved profile and records the usage
    /// asynchronously.
    pub fn create_tab_from_profile(self: &Arc<Self>, profile_id: &str) -> CoreResult<Tab> {
        let profile = self.profiles.get_profile(profile_id)?;
        let (shell, ssh, rdp) = match profile.profile_type {
            ProfileType::Ssh => (None, profile.ssh.clone(), None),
            ProfileType::Rdp => (None, None, profile.rdp.clone()),
            ProfileType::Local | ProfileType::Custom => {
                (Some(profile.shell.clone()), None, None)
            }
        };
        let tab = self.create_tab(Some(profile.name.clone()), shell, ssh, rdp)?;
        {
            let mut tabs = self.lock_write();
            if let Some(stored) = tabs.get_mut(&tab.id) {
                stored.profile_id = Some(profile.id.clone());
            }
        }
        let profiles = self.profiles.clone();
        let id = profile.id.clone();
        tokio::spawn(async move {
            if let Err(e) = profiles.record_usage(&id) {
                log::warn!("profile {id}: usage recording failed: {e}");
            }
        });
        let mut tab = tab;
        tab.profile_id = Some(profile.id);
        Ok(tab)
    }

    fn profile_of(&self, tab: &Tab) -> Option<Profile> {
        tab.profile_id
            .as_deref()
            .and_then(|id| self.profiles.get_profile(id).ok())
    }

    // --- startup ---

    /// Starts the tab's session at the given size, routing by kind.
    pub async fn start_tab_shell(&self, tab_id: &str, cols: u16, rows: u16) -> CoreResult<()> {
        let tab = self.get_tab(tab_id)?;
        {
            let mut tabs = self.lock_write();
            if let Some(stored) = tabs.get_mut(tab_id) {
                stored.cols = cols;
                stored.rows = rows;
            }
        }
        match tab.kind {
            ConnectionKind::Local => self.start_local(&tab, cols, rows).await,
            ConnectionKind::Ssh => self.start_ssh(&tab, cols, rows).await,
            ConnectionKind::Rdp => self.start_rdp(&tab).await,
        }
    }

    async fn start_local(&self, tab: &Tab, cols: u16, rows: u16) -> CoreResult<()> {
        let shell = match tab.shell.as_deref() {
            Some(shell) if !shell.is_empty() && shell != "auto" => shell.to_string(),
            _ => self.shells.default_shell()?,
        };
        let profile = self.profile_of(tab);
        let cwd = profile
            .as_ref()
            .map(|p| p.working_dir.clone())
            .filter(|d| !d.is_empty());
        let env = profile
            .as_ref()
            .filter(|p| !p.environment.is_empty())
            .map(|p| p.environment.clone());
        match self
            .pty
            .start(&shell, &tab.session_id, cols, rows, cwd, env)
            .await
        {
            Ok(()) => {
                self.set_status(&tab.id, SessionStatus::Connected, None);
                // Ask the frontend for its real terminal size once the
                // shell is up.
                self.bus.emit(Event::TerminalSizeRequest {
                    session_id: tab.session_id.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.set_status(&tab.id, SessionStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn start_ssh(&self, tab: &Tab, cols: u16, rows: u16) -> CoreResult<()> {
        let config = tab
            .ssh
            .clone()
            .ok_or_else(|| CoreError::state("ssh tab carries no ssh config"))?;
        match self.ssh.connect(&tab.session_id, &config, cols, rows).await {
            Ok(()) => {
                self.set_status(&tab.id, SessionStatus::Connected, None);
                self.spawn_monitor(&tab.session_id, &config);
                self.schedule_size_sync(tab.session_id.clone());
                Ok(())
            }
            Err(e) => {
                self.set_status(&tab.id, SessionStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn start_rdp(&self, tab: &Tab) -> CoreResult<()> {
        let config = tab
            .rdp
            .clone()
            .ok_or_else(|| CoreError::state("rdp tab carries no rdp config"))?;
        match self.rdp.connect(&tab.session_id, &config).await {
            Ok(()) => {
                self.set_status(&tab.id, SessionStatus::Connected, None);
                Ok(())
            }
            Err(e) => {
                self.set_status(&tab.id, SessionStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// The monitoring side-channel rides along in the background; its
    /// failure never fails the main connect.
    fn spawn_monitor(&self, session_id: &str, config: &SshConfig) {
        let monitor = self.monitor.clone();
        let session_id = session_id.to_string();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor.connect(&session_id, &config).await {
                log::warn!("monitor {session_id}: side-channel connect failed: {e}");
            }
        });
    }

    /// Three size-sync nudges, 200 ms apart, to defeat early PTY size
    /// races on fresh SSH sessions.
    fn schedule_size_sync(&self, session_id: String) {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(200)).await;
                bus.emit(Event::TerminalSizeSyncRequest {
                    session_id: session_id.clone(),
                    immediate: false,
                });
            }
        });
    }

    // --- I/O routing ---

    /// Routes keystrokes to the session owning engine.
    pub fn write(&self, session_id: &str, data: &[u8]) -> CoreResult<()> {
        let tab = self
            .tab_by_session(session_id)
            .ok_or_else(|| CoreError::not_found("session", session_id))?;
        match tab.kind {
            ConnectionKind::Local => self.pty.write(session_id, data),
            ConnectionKind::Ssh => self.ssh.write(session_id, data),
            ConnectionKind::Rdp => Err(CoreError::state(
                "rdp sessions take input via mouse/key events",
            )),
        }
    }

    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) -> CoreResult<()> {
        let tab = self
            .tab_by_session(session_id)
            .ok_or_else(|| CoreError::not_found("session", session_id))?;
        {
            let mut tabs = self.lock_write();
            if let Some(stored) = tabs.get_mut(&tab.id) {
                stored.cols = cols;
                stored.rows = rows;
            }
        }
        match tab.kind {
            ConnectionKind::Local => self.pty.resize(session_id, cols, rows),
            ConnectionKind::Ssh => self.ssh.resize(session_id, cols, rows),
            ConnectionKind::Rdp => Err(CoreError::state("rdp sessions have a fixed screen size")),
        }
    }

    // --- activation / ordering ---

    /// Flips the is-active bits atomically and announces the switch.
    pub fn set_active(&self, tab_id: &str) -> CoreResult<()> {
        let (kind, status) = {
            let mut tabs = self.lock_write();
            if !tabs.contains_key(tab_id) {
                return Err(CoreError::not_found("tab", tab_id));
            }
            let mut target = None;
            for tab in tabs.values_mut() {
                tab.is_active = tab.id == tab_id;
                if tab.is_active {
                    target = Some((tab.kind, tab.status));
                }
            }
            target.ok_or_else(|| CoreError::not_found("tab", tab_id))?
        };
        self.bus.emit(Event::TabSwitched {
            tab_id: tab_id.to_string(),
            kind,
            status,
        });
        Ok(())
    }

    /// Rewrites created-at timestamps so the global order matches the
    /// given sequence. Refuses count mismatches and unknown ids.
    pub fn reorder(&self, tab_ids: &[String]) -> CoreResult<()> {
        let mut tabs = self.lock_write();
        if tab_ids.len() != tabs.len() {
            return Err(CoreError::validation(format!(
                "reorder carries {} ids for {} tabs",
                tab_ids.len(),
                tabs.len()
            )));
        }
        for id in tab_ids {
            if !tabs.contains_key(id) {
                return Err(CoreError::not_found("tab", id));
            }
        }
        let base = Utc::now();
        for (index, id) in tab_ids.iter().enumerate() {
            if let Some(tab) = tabs.get_mut(id) {
                tab.created_at = base + ChronoDuration::milliseconds(index as i64);
            }
        }
        Ok(())
    }

    pub fn rename_tab(&self, tab_id: &str, title: &str) -> CoreResult<()> {
        if title.trim().is_empty() {
            return Err(CoreError::validation("tab title must not be empty"));
        }
        let mut tabs = self.lock_write();
        let tab = tabs
            .get_mut(tab_id)
            .ok_or_else(|| CoreError::not_found("tab", tab_id))?;
        tab.title = title.to_string();
        Ok(())
    }

    // --- teardown / reconnect ---

    /// Removes the tab synchronously and closes its session in the
    /// background. Closing the active tab promotes an arbitrary
    /// survivor.
    pub fn close_tab(&self, tab_id: &str) -> CoreResult<()> {
        let (removed, promoted) = {
            let mut tabs = self.lock_write();
            let removed = tabs
                .remove(tab_id)
                .ok_or_else(|| CoreError::not_found("tab", tab_id))?;
            let promoted = if removed.is_active {
                let survivor = tabs.values_mut().min_by_key(|t| t.created_at);
                survivor.map(|tab| {
                    tab.is_active = true;
                    (tab.id.clone(), tab.kind, tab.status)
                })
            } else {
                None
            };
            (removed, promoted)
        };

        if let Some((tab_id, kind, status)) = promoted {
            self.bus.emit(Event::TabSwitched {
                tab_id,
                kind,
                status,
            });
        }

        let pty = self.pty.clone();
        let ssh = self.ssh.clone();
        let rdp = self.rdp.clone();
        let sftp = self.sftp.clone();
        let monitor = self.monitor.clone();
        let tab_id = tab_id.to_string();
        tokio::spawn(async move {
            let session_id = removed.session_id;
            match removed.kind {
                ConnectionKind::Local => {
                    let _ = pty.close(&session_id).await;
                }
                ConnectionKind::Ssh => {
                    ssh.close(&session_id).await;
                    sftp.close(&session_id).await;
                    monitor.close(&session_id).await;
                }
                ConnectionKind::Rdp => rdp.close(&session_id),
            }
            log::info!("tab {tab_id}: session {session_id} closed");
        });
        Ok(())
    }

    /// Valid only for remote kinds.
    pub fn force_disconnect(&self, tab_id: &str) -> CoreResult<()> {
        let tab = self.get_tab(tab_id)?;
        match tab.kind {
            ConnectionKind::Ssh => self.ssh.force_disconnect(&tab.session_id),
            ConnectionKind::Rdp => {
                self.rdp.close(&tab.session_id);
                self.set_status(tab_id, SessionStatus::Disconnected, None);
                Ok(())
            }
            ConnectionKind::Local => Err(CoreError::state(
                "local tabs cannot be force-disconnected",
            )),
        }
    }

    /// Tears down every stale resource keyed by the tab's session-id,
    /// then re-runs the connect path under the same id.
    pub async fn reconnect(&self, tab_id: &str) -> CoreResult<()> {
        let tab = self.get_tab(tab_id)?;
        if tab.kind == ConnectionKind::Local {
            return Err(CoreError::state("local tabs cannot be reconnected"));
        }
        let session_id = tab.session_id.clone();

        // Flush stale session, file channel and side-channel first.
        self.sftp.close(&session_id).await;
        self.monitor.close(&session_id).await;
        match tab.kind {
            ConnectionKind::Ssh => self.ssh.close(&session_id).await,
            ConnectionKind::Rdp => self.rdp.close(&session_id),
            ConnectionKind::Local => {}
        }

        self.set_status(tab_id, SessionStatus::Connecting, None);
        match tab.kind {
            ConnectionKind::Ssh => {
                let config = tab
                    .ssh
                    .clone()
                    .ok_or_else(|| CoreError::state("ssh tab carries no ssh config"))?;
                match self
                    .ssh
                    .connect(&session_id, &config, tab.cols, tab.rows)
                    .await
                {
                    Ok(()) => {
                        self.set_status(tab_id, SessionStatus::Connected, None);
                        self.spawn_monitor(&session_id, &config);

                        // Fresh file channel under the same session id.
                        match self.ssh.handle(&session_id) {
                            Ok(handle) => {
                                if let Err(e) = self.sftp.open(&session_id, handle).await {
                                    log::warn!("sftp {session_id}: reopen failed: {e}");
                                } else {
                                    self.bus.emit(Event::SftpReconnected {
                                        session_id: session_id.clone(),
                                    });
                                }
                            }
                            Err(e) => log::warn!("sftp {session_id}: no handle: {e}"),
                        }

                        let bus = self.bus.clone();
                        let deferred_tab = tab_id.to_string();
                        let deferred_session = session_id.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            bus.emit(Event::TabReconnectedSizing {
                                tab_id: deferred_tab,
                                session_id: deferred_session,
                            });
                        });
                        Ok(())
                    }
                    Err(e) => {
                        self.set_status(tab_id, SessionStatus::Failed, Some(e.to_string()));
                        Err(e)
                    }
                }
            }
            ConnectionKind::Rdp => {
                let config = tab
                    .rdp
                    .clone()
                    .ok_or_else(|| CoreError::state("rdp tab carries no rdp config"))?;
                match self.rdp.connect(&session_id, &config).await {
                    Ok(()) => {
                        self.set_status(tab_id, SessionStatus::Connected, None);
                        Ok(())
                    }
                    Err(e) => {
                        self.set_status(tab_id, SessionStatus::Failed, Some(e.to_string()));
                        Err(e)
                    }
                }
            }
            ConnectionKind::Local => Err(CoreError::state("local tabs cannot be reconnected")),
        }
    }

    /// Lazily opens the session's SFTP channel if it is not up yet.
    pub async fn ensure_sftp(&self, session_id: &str) -> CoreResult<()> {
        if self.sftp.is_open(session_id) {
            return Ok(());
        }
        let handle = self.ssh.handle(session_id)?;
        self.sftp.open(session_id, handle).await
    }

    // --- status ---

    /// Applies a status transition, enforcing the machine, and emits
    /// `tab-status-update`. Redundant transitions are silent.
    pub fn set_status(&self, tab_id: &str, status: SessionStatus, error: Option<String>) {
        let emitted = {
            let mut tabs = self.lock_write();
            let Some(tab) = tabs.get_mut(tab_id) else {
                return;
            };
            if tab.status == status {
                false
            } else if tab.status.can_transition_to(status) {
                tab.status = status;
                tab.last_error = error.clone();
                true
            } else {
                log::warn!(
                    "tab {tab_id}: ignoring illegal transition {:?} -> {status:?}",
                    tab.status
                );
                false
            }
        };
        if emitted {
            self.bus.emit(Event::TabStatusUpdate {
                tab_id: tab_id.to_string(),
                status,
                error,
            });
        }
    }

    fn on_session_status(&self, session_id: &str, status: SessionStatus, error: Option<String>) {
        if let Some(tab) = self.tab_by_session(session_id) {
            self.set_status(&tab.id, status, error);
        }
    }

    // --- stats ---

    /// Hostname, status and latest stats snapshot for the active tab.
    pub fn get_active_tab_info(&self) -> CoreResult<ActiveTabInfo> {
        let tab = self
            .active_tab()
            .ok_or_else(|| CoreError::not_found("active tab", "none"))?;
        let (hostname, stats) = match tab.kind {
            ConnectionKind::Ssh => {
                let hostname = self
                    .monitor
                    .latest_stats(&tab.session_id)
                    .and_then(|s| s.get("hostname").cloned())
                    .or_else(|| tab.ssh.as_ref().map(|c| c.host.clone()))
                    .unwrap_or_default();
                (hostname, self.monitor.latest_stats(&tab.session_id))
            }
            ConnectionKind::Rdp => (
                tab.rdp.as_ref().map(|c| c.host.clone()).unwrap_or_default(),
                None,
            ),
            ConnectionKind::Local => (
                sysinfo::System::host_name().unwrap_or_default(),
                Some(self.local_stats.collect()),
            ),
        };
        Ok(ActiveTabInfo {
            tab_id: tab.id,
            hostname,
            status: tab.status,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::ConfigStore;
    use crate::core::host_keys::HostKeyStore;
    use tempfile::tempdir;

    fn supervisor() -> (Arc<TabSupervisor>, EventBus, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let bus = EventBus::default();
        let config = ConfigStore::load_with_debounce(
            dir.path().join("config.yaml"),
            Duration::from_millis(10),
        );
        let profiles =
            ProfileStore::open(dir.path().join("Profiles"), bus.clone()).unwrap();
        let host_keys = Arc::new(HostKeyStore::new(
            dir.path().join("known_hosts"),
            bus.clone(),
        ));
        let sftp = Arc::new(SftpManager::new());
        let monitor = Arc::new(MonitorManager::new(host_keys.clone()));
        let supervisor = TabSupervisor::new(
            bus.clone(),
            PtyEngine::new(bus.clone()),
            SshEngine::new(bus.clone(), host_keys, sftp.clone(), monitor.clone()),
            RdpEngine::new(bus.clone()),
            sftp,
            monitor,
            profiles,
            Arc::new(ShellProbe::new(config)),
            Arc::new(LocalStatsProvider::new()),
        );
        (supervisor, bus, dir)
    }

    fn ssh_config() -> SshConfig {
        SshConfig {
            host: "example.com".into(),
            port: 22,
            username: "deploy".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn kind_follows_supplied_config() {
        let (sup, _, _dir) = supervisor();
        let local = sup.create_tab(None, Some("bash".into()), None, None).unwrap();
        assert_eq!(local.kind, ConnectionKind::Local);
        let ssh = sup.create_tab(None, None, Some(ssh_config()), None).unwrap();
        assert_eq!(ssh.kind, ConnectionKind::Ssh);
        assert_eq!(ssh.title, "deploy@example.com");
        assert_eq!(ssh.status, SessionStatus::Connecting);
        assert_ne!(local.session_id, ssh.session_id);
    }

    #[tokio::test]
    async fn at_most_one_tab_is_active() {
        let (sup, bus, _dir) = supervisor();
        let mut rx = bus.subscribe();
        let a = sup.create_tab(None, Some("bash".into()), None, None).unwrap();
        let b = sup.create_tab(None, Some("zsh".into()), None, None).unwrap();
        sup.set_active(&a.id).unwrap();
        sup.set_active(&b.id).unwrap();
        let active: Vec<_> = sup.get_tabs().into_iter().filter(|t| t.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
        let mut switches = 0;
        while let Ok(event) = rx.try_recv() {
            if event.name() == "tab-switched" {
                switches += 1;
            }
        }
        assert_eq!(switches, 2);
    }

    #[tokio::test]
    async fn reorder_rewrites_the_total_order() {
        let (sup, _, _dir) = supervisor();
        let a = sup.create_tab(Some("a".into()), Some("bash".into()), None, None).unwrap();
        let b = sup.create_tab(Some("b".into()), Some("bash".into()), None, None).unwrap();
        let c = sup.create_tab(Some("c".into()), Some("bash".into()), None, None).unwrap();

        sup.reorder(&[c.id.clone(), a.id.clone(), b.id.clone()]).unwrap();
        let order: Vec<String> = sup.get_tabs().into_iter().map(|t| t.title).collect();
        assert_eq!(order, vec!["c", "a", "b"]);

        // Count mismatch and unknown ids refuse.
        assert!(sup.reorder(&[a.id.clone()]).is_err());
        assert!(sup
            .reorder(&[a.id.clone(), b.id.clone(), "ghost".to_string()])
            .is_err());
    }

    #[tokio::test]
    async fn closing_active_tab_promotes_a_survivor() {
        let (sup, _, _dir) = supervisor();
        let a = sup.create_tab(None, Some("bash".into()), None, None).unwrap();
        let b = sup.create_tab(None, Some("bash".into()), None, None).unwrap();
        sup.set_active(&a.id).unwrap();
        sup.close_tab(&a.id).unwrap();
        let tabs = sup.get_tabs();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].id, b.id);
        assert!(tabs[0].is_active);
    }

    #[tokio::test]
    async fn status_machine_blocks_illegal_jumps() {
        let (sup, bus, _dir) = supervisor();
        let tab = sup.create_tab(None, None, Some(ssh_config()), None).unwrap();
        let mut rx = bus.subscribe();

        sup.set_status(&tab.id, SessionStatus::Connected, None);
        // Connecting is only reachable again through reconnect paths.
        sup.set_status(&tab.id, SessionStatus::Connecting, None);
        assert_eq!(sup.get_tab(&tab.id).unwrap().status, SessionStatus::Connected);

        sup.set_status(&tab.id, SessionStatus::Hanging, Some("quiet".into()));
        assert_eq!(sup.get_tab(&tab.id).unwrap().status, SessionStatus::Hanging);

        let mut updates = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::TabStatusUpdate { status, .. } = event {
                updates.push(status);
            }
        }
        assert_eq!(
            updates,
            vec![SessionStatus::Connected, SessionStatus::Hanging]
        );
    }

    #[tokio::test]
    async fn session_status_hook_lands_on_the_owning_tab() {
        let (sup, _, _dir) = supervisor();
        let tab = sup.create_tab(None, None, Some(ssh_config()), None).unwrap();
        sup.set_status(&tab.id, SessionStatus::Connected, None);
        sup.on_session_status(&tab.session_id, SessionStatus::Disconnected, None);
        assert_eq!(
            sup.get_tab(&tab.id).unwrap().status,
            SessionStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn profile_tab_records_usage() {
        let (sup, _, _dir) = supervisor();
        let profile = sup
            .profiles
            .create_profile(Profile {
                name: "Box".into(),
                profile_type: ProfileType::Ssh,
                ssh: Some(ssh_config()),
                ..Default::default()
            })
            .unwrap();
        let tab = sup.create_tab_from_profile(&profile.id).unwrap();
        assert_eq!(tab.profile_id.as_deref(), Some(profile.id.as_str()));
        assert_eq!(tab.kind, ConnectionKind::Ssh);
        // Usage recording is async; poll briefly.
        for _ in 0..50 {
            if sup.profiles.get_profile(&profile.id).unwrap().usage_count == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sup.profiles.get_profile(&profile.id).unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn remote_only_operations_reject_local_tabs() {
        let (sup, _, _dir) = supervisor();
        let tab = sup.create_tab(None, Some("bash".into()), None, None).unwrap();
        assert!(matches!(
            sup.force_disconnect(&tab.id).unwrap_err(),
            CoreError::State(_)
        ));
        assert!(matches!(
            sup.reconnect(&tab.id).await.unwrap_err(),
            CoreError::State(_)
        ));
    }
}
