//! Profile, folder and connection-config value objects.
//!
//! Profiles and folders are persisted one YAML file each; the in-file
//! `id` field is the stable identity key and the filename is derived,
//! disposable state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::error::{CoreError, CoreResult};
use crate::MAX_TAGS_PER_PROFILE;

/// Filename prefix distinguishing folder files from profile files.
pub const FOLDER_FILE_PREFIX: &str = "folder-";

/// Aggregate metrics file, excluded from the watcher.
pub const METRICS_FILE_NAME: &str = "metrics.yaml";

/// 8 random bytes, hex-encoded: the stable identity for profiles and
/// folders.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Maps a display name onto a filesystem-safe filename stem: spaces to
/// underscores, reserved characters to underscores, control characters
/// stripped, trailing dots/spaces trimmed, empty mapped to `unnamed`.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            ' ' => out.push('_'),
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    let trimmed = out.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<sanitized-name>-<id>.yaml`
pub fn profile_file_name(name: &str, id: &str) -> String {
    format!("{}-{}.yaml", sanitize_filename(name), id)
}

/// `folder-<sanitized-name>-<id>.yaml`
pub fn folder_file_name(name: &str, id: &str) -> String {
    format!("{FOLDER_FILE_PREFIX}{}-{}.yaml", sanitize_filename(name), id)
}

/// Which entity a profiles-directory file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Profile,
    Folder,
}

/// Classifies a profiles-directory filename and extracts the trailing
/// `-<id>` segment. Returns `None` for `metrics.yaml`, non-YAML files
/// and names with no id segment.
pub fn classify_file_name(file_name: &str) -> Option<(EntityKind, String)> {
    if file_name == METRICS_FILE_NAME {
        return None;
    }
    let stem = file_name.strip_suffix(".yaml")?;
    let kind = if stem.starts_with(FOLDER_FILE_PREFIX) {
        EntityKind::Folder
    } else {
        EntityKind::Profile
    };
    let id = stem.rsplit('-').next()?;
    if id.is_empty() || id == stem {
        return None;
    }
    Some((kind, id.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    Local,
    Ssh,
    Rdp,
    Custom,
}

impl Default for ProfileType {
    fn default() -> Self {
        Self::Local
    }
}

/// SSH connection parameters. Validated at every construction boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    pub allow_key_auto_discovery: bool,
}

impl SshConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.host.trim().is_empty() {
            return Err(CoreError::validation("ssh host must not be empty"));
        }
        if self.port == 0 {
            return Err(CoreError::validation("ssh port must be in 1..65535"));
        }
        if self.username.trim().is_empty() {
            return Err(CoreError::validation("ssh username must not be empty"));
        }
        Ok(())
    }
}

/// RDP connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub domain: String,
    pub width: u16,
    pub height: u16,
    pub color_depth: u8,
}

impl Default for RdpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 3389,
            username: String::new(),
            password: String::new(),
            domain: String::new(),
            width: 1024,
            height: 768,
            color_depth: 32,
        }
    }
}

impl RdpConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.host.trim().is_empty() {
            return Err(CoreError::validation("rdp host must not be empty"));
        }
        if self.port == 0 {
            return Err(CoreError::validation("rdp port must be in 1..65535"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::validation("rdp screen dimensions must be non-zero"));
        }
        if ![16u8, 24, 32].contains(&self.color_depth) {
            return Err(CoreError::validation(format!(
                "rdp color depth {} not one of 16/24/32",
                self.color_depth
            )));
        }
        Ok(())
    }
}

/// A saved template from which tabs are instantiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub icon: String,
    #[serde(rename = "type")]
    pub profile_type: ProfileType,
    pub shell: String,
    pub working_dir: String,
    pub environment: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdp: Option<RdpConfig>,
    /// Direct parent reference; empty means root.
    pub folder_id: String,
    /// Legacy path string, recomputed from the ID graph on every save.
    pub folder_path: String,
    pub tags: Vec<String>,
    pub usage_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub is_favorite: bool,
    pub color: String,
    pub description: String,
    pub file_history: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Profile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: String::new(),
            icon: String::new(),
            profile_type: ProfileType::Local,
            shell: "auto".to_string(),
            working_dir: String::new(),
            environment: HashMap::new(),
            ssh: None,
            rdp: None,
            folder_id: String::new(),
            folder_path: String::new(),
            tags: Vec::new(),
            usage_count: 0,
            last_used: None,
            is_favorite: false,
            color: String::new(),
            description: String::new(),
            file_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Profile {
    pub fn validate(&self) -> CoreResult<()> {
        if self.id.is_empty() {
            return Err(CoreError::validation("profile id must not be empty"));
        }
        if self.tags.len() > MAX_TAGS_PER_PROFILE {
            return Err(CoreError::validation(format!(
                "profile carries {} tags, cap is {MAX_TAGS_PER_PROFILE}",
                self.tags.len()
            )));
        }
        match self.profile_type {
            ProfileType::Ssh => {
                let ssh = self
                    .ssh
                    .as_ref()
                    .ok_or_else(|| CoreError::validation("ssh profile missing ssh config"))?;
                ssh.validate()
            }
            ProfileType::Rdp => {
                let rdp = self
                    .rdp
                    .as_ref()
                    .ok_or_else(|| CoreError::validation("rdp profile missing rdp config"))?;
                rdp.validate()
            }
            ProfileType::Local | ProfileType::Custom => Ok(()),
        }
    }

    pub fn file_name(&self) -> String {
        profile_file_name(&self.name, &self.id)
    }
}

/// On-disk grouping for profiles. The parent relation forms a forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileFolder {
    pub id: String,
    pub name: String,
    pub icon: String,
    /// Empty means root.
    pub parent_id: String,
    /// Legacy path string, recomputed from the ID graph on every save.
    pub path: String,
    pub sort_order: u32,
    pub expanded: bool,
    pub tags: Vec<String>,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ProfileFolder {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: String::new(),
            icon: String::new(),
            parent_id: String::new(),
            path: String::new(),
            sort_order: 0,
            expanded: true,
            tags: Vec::new(),
            color: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl ProfileFolder {
    pub fn validate(&self) -> CoreResult<()> {
        if self.id.is_empty() {
            return Err(CoreError::validation("folder id must not be empty"));
        }
        Ok(())
    }

    pub fn file_name(&self) -> String {
        folder_file_name(&self.name, &self.id)
    }
}

/// Presentation-only derived grouping. No on-disk representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VirtualFolderKind {
    Favorites,
    Recent,
    MostUsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    Name,
    LastUsed,
    UsageCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize)]
pub struct VirtualFolderFilter {
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VirtualFolder {
    pub kind: VirtualFolderKind,
    pub name: String,
    pub filter: VirtualFolderFilter,
    pub profile_ids: Vec<String>,
}

/// Aggregates recomputed on every save and persisted to `metrics.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileMetrics {
    pub total_profiles: usize,
    pub total_folders: usize,
    pub top_used: Vec<String>,
    pub top_recent: Vec<String>,
    pub favorites: Vec<String>,
    pub tag_usage: HashMap<String, u32>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sixteen_hex_chars() {
        let id = generate_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sanitize_covers_reserved_characters() {
        assert_eq!(sanitize_filename("Web Prod"), "Web_Prod");
        assert_eq!(sanitize_filename("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("trailing... "), "trailing");
        assert_eq!(sanitize_filename("ctl\x07chars"), "ctlchars");
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename(". "), "unnamed");
    }

    #[test]
    fn classify_extracts_kind_and_id() {
        assert_eq!(
            classify_file_name("Web_Prod-abcd1234abcd1234.yaml"),
            Some((EntityKind::Profile, "abcd1234abcd1234".to_string()))
        );
        assert_eq!(
            classify_file_name("folder-Work-1122334455667788.yaml"),
            Some((EntityKind::Folder, "1122334455667788".to_string()))
        );
        assert_eq!(classify_file_name("metrics.yaml"), None);
        assert_eq!(classify_file_name("notes.txt"), None);
        assert_eq!(classify_file_name("noid.yaml"), None);
    }

    #[test]
    fn ssh_config_rejects_bad_values() {
        let mut cfg = SshConfig {
            host: "example.com".into(),
            port: 22,
            username: "deploy".into(),
            ..Default::default()
        };
        cfg.validate().unwrap();
        cfg.port = 0;
        assert!(cfg.validate().is_err());
        cfg.port = 22;
        cfg.host = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rdp_config_enforces_color_depth() {
        let mut cfg = RdpConfig {
            host: "winbox".into(),
            username: "admin".into(),
            ..Default::default()
        };
        cfg.validate().unwrap();
        cfg.color_depth = 15;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn profile_tag_cap_enforced() {
        let mut profile = Profile {
            id: generate_id(),
            name: "x".into(),
            ..Default::default()
        };
        profile.tags = (0..=MAX_TAGS_PER_PROFILE).map(|i| format!("t{i}")).collect();
        assert!(profile.validate().is_err());
    }
}
