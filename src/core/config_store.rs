//! Load/validate/migrate/atomic-save for the YAML config, with
//! dirty-flag tracking and a debounced write-back timer.
//!
//! Startup never aborts on a bad config: parse or validation failures
//! demote to defaults with a warning. Saves go `.backup` copy, marshal,
//! `.tmp` write, atomic rename.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::config_models::{AppConfig, PLATFORM_KEYS};
use super::error::{CoreError, CoreResult};
use crate::{CONFIG_SAVE_DEBOUNCE, MAX_SIDEBAR_WIDTH, MIN_SIDEBAR_WIDTH};

pub struct ConfigStore {
    path: PathBuf,
    config: Mutex<AppConfig>,
    dirty: AtomicBool,
    debounce: Duration,
    save_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigStore {
    /// Resolves `<user-config-dir>/Thermic/config.yaml`.
    pub fn default_path() -> CoreResult<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| CoreError::state("cannot resolve user config directory"))?;
        Ok(base.config_dir().join("Thermic").join("config.yaml"))
    }

    /// Loads the config at `path`, writing defaults when the file is
    /// missing and demoting to defaults on parse/validation failure.
    pub fn load(path: PathBuf) -> Arc<Self> {
        Self::load_with_debounce(path, CONFIG_SAVE_DEBOUNCE)
    }

    /// Debounce-injectable constructor (tests use a short interval).
    pub fn load_with_debounce(path: PathBuf, debounce: Duration) -> Arc<Self> {
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_yaml::from_str::<AppConfig>(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    log::warn!("config: parse failed ({e}), resetting to defaults");
                    AppConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
            Err(e) => {
                log::warn!("config: read failed ({e}), resetting to defaults");
                AppConfig::default()
            }
        };

        let migrated = config.migrate_legacy_shell();
        config.normalize();
        if let Err(e) = config.validate() {
            log::warn!("config: validation failed ({e}), resetting to defaults");
            config = AppConfig::default();
        }

        let store = Arc::new(Self {
            path,
            config: Mutex::new(config),
            dirty: AtomicBool::new(false),
            debounce,
            save_task: Mutex::new(None),
        });

        // First run and migrations persist immediately so the file on
        // disk reflects reality.
        if !store.path.exists() || migrated {
            if let Err(e) = store.save_now() {
                log::warn!("config: initial save failed: {e}");
            }
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> AppConfig {
        self.lock().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AppConfig> {
        match self.config.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    /// Shared mutator contract: validate input, no-op when unchanged,
    /// mutate, mark dirty.
    fn mutate(self: &Arc<Self>, f: impl FnOnce(&mut AppConfig) -> CoreResult<bool>) -> CoreResult<()> {
        let changed = {
            let mut config = self.lock();
            f(&mut config)?
        };
        if changed {
            self.mark_dirty();
        }
        Ok(())
    }

    /// Sets the dirty flag and (re)arms the single debounce timer. The
    /// previous timer is stopped; the save fires once after quiescence.
    fn mark_dirty(self: &Arc<Self>) {
        self.dirty.store(true, Ordering::Release);
        let store = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(store.debounce).await;
            if let Err(e) = store.save_if_dirty() {
                log::warn!("config: debounced save failed: {e}");
            }
        });
        let mut guard = match self.save_task.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        if let Some(previous) = guard.replace(task) {
            previous.abort();
        }
    }

    fn save_if_dirty(&self) -> CoreResult<()> {
        if self.is_dirty() {
            self.save_now()?;
        }
        Ok(())
    }

    /// Atomic save: backup the existing file, marshal + validate, write
    /// `<path>.tmp`, rename into place. On error the dirty flag stays
    /// set so the next mutation reattempts; on success it clears.
    pub fn save_now(&self) -> CoreResult<()> {
        let result = self.save_inner();
        match &result {
            Ok(()) => self.dirty.store(false, Ordering::Release),
            Err(e) => log::warn!("config: save failed, staying dirty: {e}"),
        }
        result
    }

    fn save_inner(&self) -> CoreResult<()> {
        let config = self.lock().clone();
        config.validate()?;
        let yaml = serde_yaml::to_string(&config)
            .map_err(|e| CoreError::protocol(format!("config marshal failed: {e}")))?;

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| CoreError::io(format!("create {}", dir.display()), e))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o750));
            }
        }

        if self.path.exists() {
            let backup = self.path.with_extension("yaml.backup");
            std::fs::copy(&self.path, &backup)
                .map_err(|e| CoreError::io(format!("backup {}", backup.display()), e))?;
        }

        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml.as_bytes())
            .map_err(|e| CoreError::io(format!("write {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| CoreError::io(format!("rename into {}", self.path.display()), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
        log::debug!("config: saved {}", self.path.display());
        Ok(())
    }

    /// Force-saves on shutdown when mutations are still pending.
    pub fn flush(&self) -> CoreResult<()> {
        self.save_if_dirty()
    }

    // --- mutators ---

    pub fn set_window_size(self: &Arc<Self>, width: u32, height: u32) -> CoreResult<()> {
        if width == 0 || height == 0 {
            return Err(CoreError::validation("window dimensions must be non-zero"));
        }
        self.mutate(|c| {
            if c.window.width == width && c.window.height == height {
                return Ok(false);
            }
            c.window.width = width;
            c.window.height = height;
            Ok(true)
        })
    }

    pub fn set_window_maximized(self: &Arc<Self>, maximized: bool) -> CoreResult<()> {
        self.mutate(|c| {
            if c.window.maximized == maximized {
                return Ok(false);
            }
            c.window.maximized = maximized;
            Ok(true)
        })
    }

    pub fn set_theme(self: &Arc<Self>, theme: &str) -> CoreResult<()> {
        let candidate = AppConfig {
            theme: theme.to_string(),
            ..self.snapshot()
        };
        candidate.validate()?;
        self.mutate(|c| {
            if c.theme == theme {
                return Ok(false);
            }
            c.theme = theme.to_string();
            Ok(true)
        })
    }

    pub fn set_default_shell(self: &Arc<Self>, platform: &str, shell: &str) -> CoreResult<()> {
        if !PLATFORM_KEYS.contains(&platform) {
            return Err(CoreError::validation(format!(
                "unknown platform key {platform:?}, expected one of {PLATFORM_KEYS:?}"
            )));
        }
        if shell.is_empty() {
            return Err(CoreError::validation("shell must not be empty"));
        }
        self.mutate(|c| {
            if c.default_shells.get(platform).map(String::as_str) == Some(shell) {
                return Ok(false);
            }
            c.default_shells
                .insert(platform.to_string(), shell.to_string());
            Ok(true)
        })
    }

    pub fn default_shell_for(&self, platform: &str) -> Option<String> {
        self.lock().default_shells.get(platform).cloned()
    }

    pub fn set_select_to_copy(self: &Arc<Self>, enabled: bool) -> CoreResult<()> {
        self.mutate(|c| {
            if c.select_to_copy == enabled {
                return Ok(false);
            }
            c.select_to_copy = enabled;
            Ok(true)
        })
    }

    pub fn set_profiles_path(self: &Arc<Self>, path: Option<String>) -> CoreResult<()> {
        if let Some(p) = &path {
            if p.is_empty() {
                return Err(CoreError::validation("profiles path must not be empty"));
            }
        }
        self.mutate(|c| {
            if c.profiles_path == path {
                return Ok(false);
            }
            c.profiles_path = path;
            Ok(true)
        })
    }

    pub fn set_sidebar_collapsed(self: &Arc<Self>, collapsed: bool) -> CoreResult<()> {
        self.mutate(|c| {
            if c.sidebar.collapsed == collapsed {
                return Ok(false);
            }
            c.sidebar.collapsed = collapsed;
            Ok(true)
        })
    }

    pub fn set_sidebar_width(self: &Arc<Self>, width: u32) -> CoreResult<()> {
        if !(MIN_SIDEBAR_WIDTH..=MAX_SIDEBAR_WIDTH).contains(&width) {
            return Err(CoreError::validation(format!(
                "sidebar width {width} outside [{MIN_SIDEBAR_WIDTH}..{MAX_SIDEBAR_WIDTH}]"
            )));
        }
        self.mutate(|c| {
            if c.sidebar.width == width {
                return Ok(false);
            }
            c.sidebar.width = width;
            Ok(true)
        })
    }

    pub fn set_ai_enabled(self: &Arc<Self>, enabled: bool) -> CoreResult<()> {
        self.mutate(|c| {
            if c.ai.enabled == enabled {
                return Ok(false);
            }
            c.ai.enabled = enabled;
            Ok(true)
        })
    }

    pub fn set_ai_provider(self: &Arc<Self>, provider: &str) -> CoreResult<()> {
        self.mutate(|c| {
            if c.ai.provider == provider {
                return Ok(false);
            }
            c.ai.provider = provider.to_string();
            Ok(true)
        })
    }

    pub fn set_ai_api_key(self: &Arc<Self>, api_key: &str) -> CoreResult<()> {
        self.mutate(|c| {
            if c.ai.api_key == api_key {
                return Ok(false);
            }
            c.ai.api_key = api_key.to_string();
            Ok(true)
        })
    }

    pub fn set_ai_model(self: &Arc<Self>, model: &str) -> CoreResult<()> {
        self.mutate(|c| {
            if c.ai.model == model {
                return Ok(false);
            }
            c.ai.model = model.to_string();
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_models::DEFAULT_THEME;
    use tempfile::tempdir;

    fn store_at(dir: &Path) -> Arc<ConfigStore> {
        ConfigStore::load_with_debounce(
            dir.join("Thermic/config.yaml"),
            Duration::from_millis(30),
        )
    }

    #[tokio::test]
    async fn first_run_writes_defaults() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        assert!(store.path().exists());
        let raw = std::fs::read_to_string(store.path()).unwrap();
        let parsed: AppConfig = serde_yaml::from_str(&raw).unwrap();
        assert_eq!(parsed.theme, DEFAULT_THEME);
        assert_eq!(parsed.window.width, 1200);
    }

    #[tokio::test]
    async fn bad_yaml_demotes_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "theme: [not: valid").unwrap();
        let store = ConfigStore::load_with_debounce(path, Duration::from_millis(30));
        assert_eq!(store.snapshot().theme, DEFAULT_THEME);
    }

    #[tokio::test]
    async fn mutator_rejects_invalid_and_stays_clean() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        assert!(store.set_sidebar_width(10).is_err());
        assert!(store.set_theme("plaid").is_err());
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn unchanged_value_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.set_select_to_copy(false).unwrap();
        assert!(!store.is_dirty());
        store.set_select_to_copy(true).unwrap();
        assert!(store.is_dirty());
    }

    #[tokio::test]
    async fn rapid_mutations_coalesce_into_one_save() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        for width in [300, 310, 320, 330] {
            store.set_sidebar_width(width).unwrap();
        }
        assert!(store.is_dirty());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!store.is_dirty());
        let raw = std::fs::read_to_string(store.path()).unwrap();
        let parsed: AppConfig = serde_yaml::from_str(&raw).unwrap();
        assert_eq!(parsed.sidebar.width, 330);
    }

    #[tokio::test]
    async fn save_writes_backup_of_previous_file() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.set_theme("dark").unwrap();
        store.flush().unwrap();
        let backup = store.path().with_extension("yaml.backup");
        assert!(backup.exists());
        let parsed: AppConfig =
            serde_yaml::from_str(&std::fs::read_to_string(backup).unwrap()).unwrap();
        // Backup holds the pre-save state.
        assert_eq!(parsed.theme, DEFAULT_THEME);
    }

    #[tokio::test]
    async fn legacy_shell_migration_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "shell: /usr/bin/fish\n").unwrap();
        let store = ConfigStore::load_with_debounce(path.clone(), Duration::from_millis(30));
        assert_eq!(store.snapshot().shell, None);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("/usr/bin/fish"));
        assert!(!raw.contains("shell: /usr/bin/fish\n") || raw.contains("default_shells"));
    }
}
