//! Shell discovery and validation for the active platform.
//!
//! Resolves the configured per-platform default shell (falling back to a
//! hardcoded platform default on `auto`), lists shells available on
//! disk, and validates `wsl::<distro>` forms against the installed WSL
//! distributions. Every probe is cached for 30 seconds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use super::config_models::current_platform_key;
use super::config_store::ConfigStore;
use super::error::{CoreError, CoreResult};
use crate::SHELL_PROBE_TTL;

/// Marker for shells hosted inside a WSL distribution.
pub const WSL_SHELL_PREFIX: &str = "wsl::";

/// One selectable shell, formatted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellInfo {
    /// The value to store in config (`/bin/bash`, `wsl::Ubuntu`).
    pub id: String,
    /// Human-readable label.
    pub label: String,
    pub is_wsl: bool,
}

/// Host OS aggregate for the frontend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsInfo {
    pub os: String,
    pub arch: String,
    pub family: String,
    pub version: String,
    pub hostname: String,
}

#[derive(Clone)]
enum CachedProbe {
    Shells(Vec<ShellInfo>),
    Distros(Vec<String>),
    Os(OsInfo),
}

pub struct ShellProbe {
    config: Arc<ConfigStore>,
    cache: Mutex<HashMap<&'static str, (Instant, CachedProbe)>>,
}

/// Rejects distro names with path separators, controls, or anything
/// outside letters/digits/`-`/`_`/`.`, and caps the length at 64.
pub fn sanitize_wsl_distro(name: &str) -> CoreResult<String> {
    if name.is_empty() || name.len() > 64 {
        return Err(CoreError::validation("wsl distribution name length invalid"));
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(CoreError::validation(format!(
            "wsl distribution name {name:?} contains forbidden characters"
        )));
    }
    Ok(name.to_string())
}

/// Splits a `wsl::<distro>` shell value into the sanitized distro name.
pub fn parse_wsl_shell(shell: &str) -> Option<CoreResult<String>> {
    shell
        .strip_prefix(WSL_SHELL_PREFIX)
        .map(sanitize_wsl_distro)
}

/// Hardcoded fallback when the configured shell is `auto` or empty.
pub fn platform_default_shell() -> &'static str {
    match std::env::consts::OS {
        "windows" => "powershell.exe",
        "macos" => "zsh",
        _ => "bash",
    }
}

impl ShellProbe {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_get(&self, key: &'static str) -> Option<CachedProbe> {
        let cache = match self.cache.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        cache.get(key).and_then(|(at, value)| {
            (at.elapsed() < SHELL_PROBE_TTL).then(|| value.clone())
        })
    }

    fn cache_put(&self, key: &'static str, value: CachedProbe) {
        let mut cache = match self.cache.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        cache.insert(key, (Instant::now(), value));
    }

    /// The shell new local tabs get: configured value for this OS, or
    /// the platform default on `auto`/empty. Non-auto values must
    /// resolve on disk.
    pub fn default_shell(&self) -> CoreResult<String> {
        let configured = self
            .config
            .default_shell_for(current_platform_key())
            .unwrap_or_default();
        if configured.is_empty() || configured == "auto" {
            return Ok(platform_default_shell().to_string());
        }
        self.validate_shell(&configured)?;
        Ok(configured)
    }

    /// Validates a shell value: WSL forms are checked against installed
    /// distributions, everything else must resolve to an executable.
    pub fn validate_shell(&self, shell: &str) -> CoreResult<()> {
        if let Some(distro) = parse_wsl_shell(shell) {
            let distro = distro?;
            let distros = self.wsl_distros();
            if !distros.iter().any(|d| d == &distro) {
                return Err(CoreError::validation(format!(
                    "wsl distribution {distro:?} is not installed"
                )));
            }
            return Ok(());
        }
        which::which(shell)
            .map(|_| ())
            .map_err(|_| CoreError::validation(format!("shell {shell:?} not found on disk")))
    }

    /// Shells present on this machine, formatted for display.
    pub fn available_shells(&self) -> Vec<ShellInfo> {
        if let Some(CachedProbe::Shells(shells)) = self.cache_get("shells") {
            return shells;
        }
        let mut shells = Vec::new();
        let candidates: &[&str] = if cfg!(windows) {
            &["powershell.exe", "pwsh.exe", "cmd.exe"]
        } else {
            &["bash", "zsh", "fish", "sh", "nu"]
        };
        for candidate in candidates {
            if let Ok(path) = which::which(candidate) {
                let name = candidate.trim_end_matches(".exe");
                shells.push(ShellInfo {
                    id: path.display().to_string(),
                    label: format!("{name} ({})", path.display()),
                    is_wsl: false,
                });
            }
        }
        for distro in self.wsl_distros() {
            shells.push(ShellInfo {
                id: format!("{WSL_SHELL_PREFIX}{distro}"),
                label: format!("WSL: {distro}"),
                is_wsl: true,
            });
        }
        self.cache_put("shells", CachedProbe::Shells(shells.clone()));
        shells
    }

    /// Installed WSL distributions. Always empty off Windows.
    pub fn wsl_distros(&self) -> Vec<String> {
        if let Some(CachedProbe::Distros(distros)) = self.cache_get("distros") {
            return distros;
        }
        let distros = list_wsl_distros();
        self.cache_put("distros", CachedProbe::Distros(distros.clone()));
        distros
    }

    pub fn os_info(&self) -> OsInfo {
        if let Some(CachedProbe::Os(info)) = self.cache_get("os") {
            return info;
        }
        let info = OsInfo {
            os: sysinfo::System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            version: sysinfo::System::os_version().unwrap_or_default(),
            hostname: sysinfo::System::host_name().unwrap_or_default(),
        };
        self.cache_put("os", CachedProbe::Os(info.clone()));
        info
    }
}

#[cfg(windows)]
fn list_wsl_distros() -> Vec<String> {
    let output = match std::process::Command::new("wsl.exe").args(["-l", "-q"]).output() {
        Ok(output) if output.status.success() => output,
        _ => return Vec::new(),
    };
    // wsl.exe emits UTF-16LE.
    let wide: Vec<u16> = output
        .stdout
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&wide)
        .lines()
        .map(|line| line.trim_matches(['\r', '\0', ' ']).to_string())
        .filter(|line| !line.is_empty())
        .filter(|line| sanitize_wsl_distro(line).is_ok())
        .collect()
}

#[cfg(not(windows))]
fn list_wsl_distros() -> Vec<String> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn probe() -> ShellProbe {
        let dir = tempdir().unwrap();
        let config = ConfigStore::load_with_debounce(
            dir.path().join("config.yaml"),
            Duration::from_millis(10),
        );
        ShellProbe::new(config)
    }

    #[test]
    fn distro_sanitation() {
        assert!(sanitize_wsl_distro("Ubuntu-22.04").is_ok());
        assert!(sanitize_wsl_distro("openSUSE_Leap").is_ok());
        assert!(sanitize_wsl_distro("").is_err());
        assert!(sanitize_wsl_distro("a/b").is_err());
        assert!(sanitize_wsl_distro("a\\b").is_err());
        assert!(sanitize_wsl_distro("dist ro").is_err());
        assert!(sanitize_wsl_distro("evil\x07").is_err());
        assert!(sanitize_wsl_distro(&"x".repeat(65)).is_err());
    }

    #[test]
    fn wsl_prefix_parsing() {
        assert!(parse_wsl_shell("/bin/bash").is_none());
        assert_eq!(parse_wsl_shell("wsl::Ubuntu").unwrap().unwrap(), "Ubuntu");
        assert!(parse_wsl_shell("wsl::bad/name").unwrap().is_err());
    }

    #[tokio::test]
    async fn auto_defers_to_platform_default() {
        let probe = probe();
        assert_eq!(probe.default_shell().unwrap(), platform_default_shell());
    }

    #[tokio::test]
    async fn missing_shell_is_a_validation_error() {
        let probe = probe();
        let err = probe.validate_shell("/no/such/shell-binary").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn available_shells_include_sh() {
        let probe = probe();
        let shells = probe.available_shells();
        assert!(shells.iter().any(|s| s.label.starts_with("sh ")));
    }
}
