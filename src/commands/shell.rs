//! Shell discovery and default-shell commands.

use crate::core::config_models::current_platform_key;
use crate::core::error::CoreResult;
use crate::core::shell_probe::{OsInfo, ShellInfo};
use crate::App;

/// The shell new local tabs will get on this platform.
pub fn get_default_shell(app: &App) -> CoreResult<String> {
    app.shells.default_shell()
}

/// Persists the default shell for a platform after validating that the
/// value resolves (WSL distributions included). `auto` always passes.
pub fn set_default_shell(app: &App, platform: Option<&str>, shell: &str) -> CoreResult<()> {
    let platform = platform.unwrap_or_else(|| current_platform_key());
    if shell != "auto" && platform == current_platform_key() {
        app.shells.validate_shell(shell)?;
    }
    app.config.set_default_shell(platform, shell)
}

/// Shells present on this machine, formatted for display.
pub fn get_available_shells(app: &App) -> Vec<ShellInfo> {
    app.shells.available_shells()
}

pub fn get_os_info(app: &App) -> OsInfo {
    app.shells.os_info()
}
