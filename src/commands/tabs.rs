//! Tab lifecycle and terminal I/O commands.

use crate::core::error::{CoreError, CoreResult};
use crate::core::profile_models::{RdpConfig, SshConfig};
use crate::core::tab_supervisor::{ActiveTabInfo, Tab};
use crate::App;

/// Creates a tab for an explicit shell / SSH / RDP target.
pub fn create_tab(
    app: &App,
    title: Option<String>,
    shell: Option<String>,
    ssh: Option<SshConfig>,
    rdp: Option<RdpConfig>,
) -> CoreResult<Tab> {
    app.tabs.create_tab(title, shell, ssh, rdp)
}

/// Instantiates a tab from a saved profile.
pub fn create_tab_from_profile(app: &App, profile_id: &str) -> CoreResult<Tab> {
    if profile_id.is_empty() {
        return Err(CoreError::validation("profile id must not be empty"));
    }
    app.tabs.create_tab_from_profile(profile_id)
}

pub fn get_tabs(app: &App) -> Vec<Tab> {
    app.tabs.get_tabs()
}

pub fn set_active_tab(app: &App, tab_id: &str) -> CoreResult<()> {
    app.tabs.set_active(tab_id)
}

pub fn close_tab(app: &App, tab_id: &str) -> CoreResult<()> {
    app.tabs.close_tab(tab_id)
}

/// Starts the tab's session at the given terminal size.
pub async fn start_tab_shell_with_size(
    app: &App,
    tab_id: &str,
    cols: u16,
    rows: u16,
) -> CoreResult<()> {
    app.tabs.start_tab_shell(tab_id, cols, rows).await
}

/// Sends keystrokes (including control sequences) to the session.
pub fn write_to_shell(app: &App, session_id: &str, data: &str) -> CoreResult<()> {
    app.tabs.write(session_id, data.as_bytes())
}

/// Resizes the session's terminal. Rejects dimensions that are zero or
/// beyond any plausible display.
pub fn resize_shell(app: &App, session_id: &str, cols: u16, rows: u16) -> CoreResult<()> {
    if cols == 0 || rows == 0 || cols > 500 || rows > 500 {
        return Err(CoreError::validation(format!(
            "terminal size {cols}x{rows} out of range"
        )));
    }
    app.tabs.resize(session_id, cols, rows)
}

pub fn reorder_tabs(app: &App, tab_ids: Vec<String>) -> CoreResult<()> {
    app.tabs.reorder(&tab_ids)
}

pub fn rename_tab(app: &App, tab_id: &str, title: &str) -> CoreResult<()> {
    app.tabs.rename_tab(tab_id, title)
}

/// Reconnects a remote tab, flushing any stale session resources first.
pub async fn reconnect_tab(app: &App, tab_id: &str) -> CoreResult<()> {
    app.tabs.reconnect(tab_id).await
}

/// Pulses the force-close signal of a remote session.
pub fn force_disconnect_tab(app: &App, tab_id: &str) -> CoreResult<()> {
    app.tabs.force_disconnect(tab_id)
}

pub fn get_active_tab_info(app: &App) -> CoreResult<ActiveTabInfo> {
    app.tabs.get_active_tab_info()
}
