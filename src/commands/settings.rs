//! Per-setting getters/setters over the config store.
//!
//! Every setter follows the store's mutator contract: validate, no-op
//! when unchanged, mutate, mark dirty for the debounced save.

use crate::core::config_models::AppConfig;
use crate::core::error::CoreResult;
use crate::App;

/// Full config snapshot.
pub fn get_config(app: &App) -> AppConfig {
    app.config.snapshot()
}

pub fn get_theme(app: &App) -> String {
    app.config.snapshot().theme
}

pub fn set_theme(app: &App, theme: &str) -> CoreResult<()> {
    app.config.set_theme(theme)
}

pub fn get_window_size(app: &App) -> (u32, u32) {
    let window = app.config.snapshot().window;
    (window.width, window.height)
}

pub fn set_window_size(app: &App, width: u32, height: u32) -> CoreResult<()> {
    app.config.set_window_size(width, height)
}

pub fn get_window_maximized(app: &App) -> bool {
    app.config.snapshot().window.maximized
}

pub fn set_window_maximized(app: &App, maximized: bool) -> CoreResult<()> {
    app.config.set_window_maximized(maximized)
}

pub fn get_select_to_copy(app: &App) -> bool {
    app.config.snapshot().select_to_copy
}

pub fn set_select_to_copy(app: &App, enabled: bool) -> CoreResult<()> {
    app.config.set_select_to_copy(enabled)
}

pub fn get_profiles_path(app: &App) -> Option<String> {
    app.config.snapshot().profiles_path
}

/// Overrides the profiles directory. Takes effect on next startup.
pub fn set_profiles_path(app: &App, path: Option<String>) -> CoreResult<()> {
    app.config.set_profiles_path(path)
}

pub fn get_sidebar_collapsed(app: &App) -> bool {
    app.config.snapshot().sidebar.collapsed
}

pub fn set_sidebar_collapsed(app: &App, collapsed: bool) -> CoreResult<()> {
    app.config.set_sidebar_collapsed(collapsed)
}

pub fn get_sidebar_width(app: &App) -> u32 {
    app.config.snapshot().sidebar.width
}

pub fn set_sidebar_width(app: &App, width: u32) -> CoreResult<()> {
    app.config.set_sidebar_width(width)
}

pub fn get_ai_enabled(app: &App) -> bool {
    app.config.snapshot().ai.enabled
}

pub fn set_ai_enabled(app: &App, enabled: bool) -> CoreResult<()> {
    app.config.set_ai_enabled(enabled)
}

pub fn get_ai_provider(app: &App) -> String {
    app.config.snapshot().ai.provider
}

pub fn set_ai_provider(app: &App, provider: &str) -> CoreResult<()> {
    app.config.set_ai_provider(provider)
}

pub fn set_ai_api_key(app: &App, api_key: &str) -> CoreResult<()> {
    app.config.set_ai_api_key(api_key)
}

pub fn get_ai_model(app: &App) -> String {
    app.config.snapshot().ai.model
}

pub fn set_ai_model(app: &App, model: &str) -> CoreResult<()> {
    app.config.set_ai_model(model)
}
