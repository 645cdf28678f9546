//! Application configuration aggregate persisted to `config.yaml`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{CoreError, CoreResult};
use crate::{MAX_SIDEBAR_WIDTH, MIN_SIDEBAR_WIDTH};

/// Themes the frontend knows how to render.
pub const ALLOWED_THEMES: [&str; 3] = ["dark", "light", "system"];

/// Platform keys recognized in the per-OS default-shell mapping.
pub const PLATFORM_KEYS: [&str; 3] = ["windows", "linux", "darwin"];

pub const DEFAULT_WINDOW_WIDTH: u32 = 1200;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 800;
pub const DEFAULT_SIDEBAR_WIDTH: u32 = 240;
pub const DEFAULT_THEME: &str = "system";

/// The platform key for the running OS.
pub fn current_platform_key() -> &'static str {
    match std::env::consts::OS {
        "windows" => "windows",
        "macos" => "darwin",
        _ => "linux",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub maximized: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WINDOW_WIDTH,
            height: DEFAULT_WINDOW_HEIGHT,
            maximized: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidebarConfig {
    pub collapsed: bool,
    pub width: u32,
}

impl Default for SidebarConfig {
    fn default() -> Self {
        Self {
            collapsed: false,
            width: DEFAULT_SIDEBAR_WIDTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_key: String,
    pub model: String,
}

/// The single config aggregate. Unknown keys in the file are ignored;
/// missing keys take defaults so partial files from older versions load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    /// Legacy single default-shell string; migrated into `default_shells`
    /// on load and cleared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Per-platform default shell: keys `windows`, `linux`, `darwin`.
    /// The value `auto` defers to the platform probe.
    pub default_shells: HashMap<String, String>,
    pub theme: String,
    pub select_to_copy: bool,
    /// Overrides the profiles directory location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles_path: Option<String>,
    pub sidebar: SidebarConfig,
    pub ai: AiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut default_shells = HashMap::new();
        for key in PLATFORM_KEYS {
            default_shells.insert(key.to_string(), "auto".to_string());
        }
        Self {
            window: WindowConfig::default(),
            shell: None,
            default_shells,
            theme: DEFAULT_THEME.to_string(),
            select_to_copy: false,
            profiles_path: None,
            sidebar: SidebarConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

impl AppConfig {
    /// Strict validation used before every save and by mutators.
    pub fn validate(&self) -> CoreResult<()> {
        if !ALLOWED_THEMES.contains(&self.theme.as_str()) {
            return Err(CoreError::validation(format!(
                "unknown theme {:?}, expected one of {:?}",
                self.theme, ALLOWED_THEMES
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(CoreError::validation("window dimensions must be non-zero"));
        }
        if self.sidebar.width < MIN_SIDEBAR_WIDTH || self.sidebar.width > MAX_SIDEBAR_WIDTH {
            return Err(CoreError::validation(format!(
                "sidebar width {} outside [{MIN_SIDEBAR_WIDTH}..{MAX_SIDEBAR_WIDTH}]",
                self.sidebar.width
            )));
        }
        for key in self.default_shells.keys() {
            if !PLATFORM_KEYS.contains(&key.as_str()) {
                return Err(CoreError::validation(format!(
                    "unknown platform key {key:?} in default-shell mapping"
                )));
            }
        }
        Ok(())
    }

    /// Lenient cleanup applied on load: clamps out-of-range values and
    /// drops unknown mapping keys instead of failing startup.
    pub fn normalize(&mut self) {
        if !ALLOWED_THEMES.contains(&self.theme.as_str()) {
            log::warn!("config: unknown theme {:?}, resetting to default", self.theme);
            self.theme = DEFAULT_THEME.to_string();
        }
        if self.window.width == 0 || self.window.height == 0 {
            self.window.width = DEFAULT_WINDOW_WIDTH;
            self.window.height = DEFAULT_WINDOW_HEIGHT;
        }
        self.sidebar.width = self
            .sidebar
            .width
            .clamp(MIN_SIDEBAR_WIDTH, MAX_SIDEBAR_WIDTH);
        self.default_shells
            .retain(|key, _| PLATFORM_KEYS.contains(&key.as_str()));
        for key in PLATFORM_KEYS {
            self.default_shells
                .entry(key.to_string())
                .or_insert_with(|| "auto".to_string());
        }
    }

    /// Moves the legacy single-shell field into the per-platform mapping
    /// slot of the running OS, then clears it. Returns true if anything
    /// changed.
    pub fn migrate_legacy_shell(&mut self) -> bool {
        let Some(shell) = self.shell.take() else {
            return false;
        };
        if shell.is_empty() {
            return true;
        }
        let key = current_platform_key();
        let slot = self
            .default_shells
            .entry(key.to_string())
            .or_insert_with(|| "auto".to_string());
        if slot == "auto" || slot.is_empty() {
            log::info!("config: migrating legacy shell {shell:?} into default_shells.{key}");
            *slot = shell;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn unknown_theme_rejected_and_normalized() {
        let mut cfg = AppConfig {
            theme: "solarized".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        cfg.normalize();
        assert_eq!(cfg.theme, DEFAULT_THEME);
    }

    #[test]
    fn sidebar_width_clamped_on_normalize() {
        let mut cfg = AppConfig::default();
        cfg.sidebar.width = 5000;
        cfg.normalize();
        assert_eq!(cfg.sidebar.width, MAX_SIDEBAR_WIDTH);
        cfg.sidebar.width = 1;
        cfg.normalize();
        assert_eq!(cfg.sidebar.width, MIN_SIDEBAR_WIDTH);
    }

    #[test]
    fn legacy_shell_migrates_into_current_platform_slot() {
        let mut cfg = AppConfig {
            shell: Some("/usr/bin/fish".into()),
            ..Default::default()
        };
        assert!(cfg.migrate_legacy_shell());
        assert_eq!(cfg.shell, None);
        assert_eq!(
            cfg.default_shells.get(current_platform_key()).unwrap(),
            "/usr/bin/fish"
        );
    }

    #[test]
    fn legacy_shell_does_not_clobber_explicit_value() {
        let mut cfg = AppConfig {
            shell: Some("/usr/bin/fish".into()),
            ..Default::default()
        };
        cfg.default_shells
            .insert(current_platform_key().to_string(), "/bin/zsh".to_string());
        cfg.migrate_legacy_shell();
        assert_eq!(
            cfg.default_shells.get(current_platform_key()).unwrap(),
            "/bin/zsh"
        );
    }
}
