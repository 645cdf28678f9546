//! Per-entity YAML persistence for profiles and folders, with a
//! filesystem watcher, ID↔path dual referencing and derived metrics.
//!
//! Identity never depends on the filename: the in-file `id` field is the
//! truth and the trailing `-<id>.yaml` segment only locates files. A bad
//! file logs and is skipped; it never prevents loading the others.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{Duration as ChronoDuration, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use super::bounded::trim_head;
use super::error::{CoreError, CoreResult};
use super::events::{Event, EventBus, ProfileChangeKind};
use super::profile_models::{
    classify_file_name, generate_id, EntityKind, Profile, ProfileFolder, ProfileMetrics,
    SortBy, SortOrder, VirtualFolder, VirtualFolderFilter, VirtualFolderKind,
    METRICS_FILE_NAME,
};
use crate::{MAX_FILE_HISTORY, MAX_PROFILES, RECENT_PROFILE_DAYS};

struct StoreInner {
    profiles: HashMap<String, Profile>,
    folders: HashMap<String, ProfileFolder>,
}

pub struct ProfileStore {
    dir: PathBuf,
    inner: Mutex<StoreInner>,
    bus: EventBus,
    /// Set while our own saves touch the directory so the watcher does
    /// not reenter. Best-effort: duplicate reloads are harmless because
    /// the map is keyed by ID.
    watcher_suspended: Arc<AtomicBool>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ProfileStore {
    /// Opens the store, loading every parseable file and seeding the
    /// default set when the directory is empty.
    pub fn open(dir: PathBuf, bus: EventBus) -> CoreResult<Arc<Self>> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| CoreError::io(format!("create {}", dir.display()), e))?;
        let store = Arc::new(Self {
            dir,
            inner: Mutex::new(StoreInner {
                profiles: HashMap::new(),
                folders: HashMap::new(),
            }),
            bus,
            watcher_suspended: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
        });
        store.load_all();
        if store.is_empty() {
            store.seed_defaults()?;
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.profiles.is_empty() && inner.folders.is_empty()
    }

    // --- loading ---

    fn load_all(&self) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("profiles: cannot read {}: {e}", self.dir.display());
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                self.load_file(&path);
            }
        }
        let inner = self.lock();
        log::info!(
            "profiles: loaded {} profiles, {} folders from {}",
            inner.profiles.len(),
            inner.folders.len(),
            self.dir.display()
        );
    }

    /// Parses one file into the map. Returns the entity id on success.
    fn load_file(&self, path: &Path) -> Option<(EntityKind, String)> {
        let file_name = path.file_name()?.to_str()?;
        let (kind, _) = classify_file_name(file_name)?;
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("profiles: skipping {}: {e}", path.display());
                return None;
            }
        };
        match kind {
            EntityKind::Profile => match serde_yaml::from_str::<Profile>(&raw) {
                Ok(profile) if !profile.id.is_empty() => {
                    let id = profile.id.clone();
                    self.lock().profiles.insert(id.clone(), profile);
                    Some((kind, id))
                }
                Ok(_) => {
                    log::warn!("profiles: {} has no id, skipping", path.display());
                    None
                }
                Err(e) => {
                    log::warn!("profiles: broken file {}: {e}", path.display());
                    None
                }
            },
            EntityKind::Folder => match serde_yaml::from_str::<ProfileFolder>(&raw) {
                Ok(folder) if !folder.id.is_empty() => {
                    let id = folder.id.clone();
                    self.lock().folders.insert(id.clone(), folder);
                    Some((kind, id))
                }
                Ok(_) => {
                    log::warn!("profiles: {} has no id, skipping", path.display());
                    None
                }
                Err(e) => {
                    log::warn!("profiles: broken file {}: {e}", path.display());
                    None
                }
            },
        }
    }

    // --- save protocol ---

    /// Locates any existing file whose name ends in `-<id>.yaml`.
    fn find_file_for_id(&self, id: &str) -> Option<PathBuf> {
        let suffix = format!("-{id}.yaml");
        let entries = std::fs::read_dir(&self.dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(&suffix) {
                return Some(entry.path());
            }
        }
        None
    }

    /// Writes `contents` under `file_name`, removing any previous file
    /// for the same id whose name differs (rename case). The watcher is
    /// suspended around the writes.
    fn save_file(&self, id: &str, file_name: &str, contents: &str) -> CoreResult<()> {
        let existing = self.find_file_for_id(id);
        self.watcher_suspended.store(true, Ordering::Release);
        let result = (|| -> CoreResult<()> {
            let target = self.dir.join(file_name);
            std::fs::write(&target, contents.as_bytes())
                .map_err(|e| CoreError::io(format!("write {}", target.display()), e))?;
            if let Some(old) = existing {
                if old != target {
                    std::fs::remove_file(&old)
                        .map_err(|e| CoreError::io(format!("remove {}", old.display()), e))?;
                }
            }
            Ok(())
        })();
        self.watcher_suspended.store(false, Ordering::Release);
        result
    }

    fn delete_file(&self, id: &str) -> CoreResult<()> {
        let Some(path) = self.find_file_for_id(id) else {
            return Ok(());
        };
        self.watcher_suspended.store(true, Ordering::Release);
        let result = std::fs::remove_file(&path)
            .map_err(|e| CoreError::io(format!("remove {}", path.display()), e));
        self.watcher_suspended.store(false, Ordering::Release);
        result
    }

    fn persist_profile(&self, profile: &Profile) -> CoreResult<()> {
        let yaml = serde_yaml::to_string(profile)
            .map_err(|e| CoreError::protocol(format!("profile marshal failed: {e}")))?;
        self.save_file(&profile.id, &profile.file_name(), &yaml)?;
        self.write_metrics();
        Ok(())
    }

    fn persist_folder(&self, folder: &ProfileFolder) -> CoreResult<()> {
        let yaml = serde_yaml::to_string(folder)
            .map_err(|e| CoreError::protocol(format!("folder marshal failed: {e}")))?;
        self.save_file(&folder.id, &folder.file_name(), &yaml)?;
        self.write_metrics();
        Ok(())
    }

    // --- ID↔path duality ---

    /// Recomputes the legacy path string for a folder id by walking the
    /// ID graph to the root. Empty id means root ("").
    fn folder_path_of(inner: &StoreInner, folder_id: &str) -> String {
        let mut segments = Vec::new();
        let mut current = folder_id.to_string();
        // The parent relation is a forest; the hop bound guards against
        // corrupted files introducing a cycle on disk.
        let mut hops = 0;
        while !current.is_empty() && hops < 64 {
            let Some(folder) = inner.folders.get(&current) else {
                break;
            };
            segments.push(folder.name.clone());
            current = folder.parent_id.clone();
            hops += 1;
        }
        segments.reverse();
        segments.join("/")
    }

    /// True when `candidate` is `folder_id` itself or one of its
    /// transitive descendants.
    fn is_self_or_descendant(inner: &StoreInner, folder_id: &str, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        let mut current = candidate.to_string();
        let mut hops = 0;
        while !current.is_empty() && hops < 64 {
            if current == folder_id {
                return true;
            }
            current = inner
                .folders
                .get(&current)
                .map(|f| f.parent_id.clone())
                .unwrap_or_default();
            hops += 1;
        }
        false
    }

    fn require_folder_exists(inner: &StoreInner, folder_id: &str) -> CoreResult<()> {
        if folder_id.is_empty() || inner.folders.contains_key(folder_id) {
            Ok(())
        } else {
            Err(CoreError::validation(format!(
                "folder id {folder_id:?} does not reference an existing folder"
            )))
        }
    }

    // --- profile CRUD ---

    pub fn list_profiles(&self) -> Vec<Profile> {
        let inner = self.lock();
        let mut profiles: Vec<Profile> = inner.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }

    pub fn get_profile(&self, id: &str) -> CoreResult<Profile> {
        self.lock()
            .profiles
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("profile", id))
    }

    pub fn create_profile(&self, mut profile: Profile) -> CoreResult<Profile> {
        profile.id = generate_id();
        let now = Utc::now();
        profile.created_at = now;
        profile.updated_at = now;
        trim_head(&mut profile.file_history, MAX_FILE_HISTORY);
        profile.validate()?;
        {
            let mut inner = self.lock();
            if inner.profiles.len() >= MAX_PROFILES {
                return Err(CoreError::capacity(format!(
                    "profile cap reached ({MAX_PROFILES})"
                )));
            }
            Self::require_folder_exists(&inner, &profile.folder_id)?;
            profile.folder_path = Self::folder_path_of(&inner, &profile.folder_id);
            inner.profiles.insert(profile.id.clone(), profile.clone());
        }
        self.persist_profile(&profile)?;
        Ok(profile)
    }

    pub fn update_profile(&self, mut profile: Profile) -> CoreResult<Profile> {
        profile.updated_at = Utc::now();
        trim_head(&mut profile.file_history, MAX_FILE_HISTORY);
        profile.validate()?;
        {
            let mut inner = self.lock();
            let existing = inner
                .profiles
                .get(&profile.id)
                .ok_or_else(|| CoreError::not_found("profile", profile.id.clone()))?;
            profile.created_at = existing.created_at;
            Self::require_folder_exists(&inner, &profile.folder_id)?;
            profile.folder_path = Self::folder_path_of(&inner, &profile.folder_id);
            inner.profiles.insert(profile.id.clone(), profile.clone());
        }
        self.persist_profile(&profile)?;
        Ok(profile)
    }

    pub fn delete_profile(&self, id: &str) -> CoreResult<()> {
        {
            let mut inner = self.lock();
            inner
                .profiles
                .remove(id)
                .ok_or_else(|| CoreError::not_found("profile", id))?;
        }
        self.delete_file(id)?;
        self.write_metrics();
        Ok(())
    }

    /// Bumps usage-count and last-used. Invoked asynchronously when a
    /// tab is created from the profile; failure only logs.
    pub fn record_usage(&self, id: &str) -> CoreResult<()> {
        let profile = {
            let mut inner = self.lock();
            let profile = inner
                .profiles
                .get_mut(id)
                .ok_or_else(|| CoreError::not_found("profile", id))?;
            profile.usage_count += 1;
            profile.last_used = Some(Utc::now());
            profile.clone()
        };
        self.persist_profile(&profile)
    }

    /// Appends a remote path to the profile's bounded file history.
    pub fn push_file_history(&self, id: &str, path: &str) -> CoreResult<()> {
        let profile = {
            let mut inner = self.lock();
            let profile = inner
                .profiles
                .get_mut(id)
                .ok_or_else(|| CoreError::not_found("profile", id))?;
            profile.file_history.retain(|p| p != path);
            profile.file_history.push(path.to_string());
            trim_head(&mut profile.file_history, MAX_FILE_HISTORY);
            profile.updated_at = Utc::now();
            profile.clone()
        };
        self.persist_profile(&profile)
    }

    // --- folder CRUD ---

    pub fn list_folders(&self) -> Vec<ProfileFolder> {
        let inner = self.lock();
        let mut folders: Vec<ProfileFolder> = inner.folders.values().cloned().collect();
        folders.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.name.cmp(&b.name)));
        folders
    }

    pub fn get_folder(&self, id: &str) -> CoreResult<ProfileFolder> {
        self.lock()
            .folders
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("folder", id))
    }

    pub fn create_folder(&self, mut folder: ProfileFolder) -> CoreResult<ProfileFolder> {
        folder.id = generate_id();
        let now = Utc::now();
        folder.created_at = now;
        folder.updated_at = now;
        folder.validate()?;
        {
            let mut inner = self.lock();
            Self::require_folder_exists(&inner, &folder.parent_id)?;
            inner.folders.insert(folder.id.clone(), folder.clone());
            folder.path = Self::folder_path_of(&inner, &folder.id);
            inner.folders.insert(folder.id.clone(), folder.clone());
        }
        self.persist_folder(&folder)?;
        Ok(folder)
    }

    pub fn update_folder(&self, mut folder: ProfileFolder) -> CoreResult<ProfileFolder> {
        folder.updated_at = Utc::now();
        folder.validate()?;
        {
            let mut inner = self.lock();
            let existing = inner
                .folders
                .get(&folder.id)
                .ok_or_else(|| CoreError::not_found("folder", folder.id.clone()))?;
            folder.created_at = existing.created_at;
            Self::require_folder_exists(&inner, &folder.parent_id)?;
            if Self::is_self_or_descendant(&inner, &folder.id, &folder.parent_id) {
                return Err(CoreError::validation(
                    "folder cannot be parented to itself or a descendant",
                ));
            }
            inner.folders.insert(folder.id.clone(), folder.clone());
            folder.path = Self::folder_path_of(&inner, &folder.id);
            inner.folders.insert(folder.id.clone(), folder.clone());
        }
        self.persist_folder(&folder)?;
        Ok(folder)
    }

    /// Deletes a folder; its direct children (profiles and folders) move
    /// up one level to the deleted folder's parent.
    pub fn delete_folder(&self, id: &str) -> CoreResult<()> {
        let (orphaned_profiles, orphaned_folders) = {
            let mut inner = self.lock();
            let removed = inner
                .folders
                .remove(id)
                .ok_or_else(|| CoreError::not_found("folder", id))?;
            let new_parent = removed.parent_id.clone();

            let mut profiles = Vec::new();
            for profile in inner.profiles.values_mut() {
                if profile.folder_id == id {
                    profile.folder_id = new_parent.clone();
                    profile.updated_at = Utc::now();
                }
            }
            let mut folders = Vec::new();
            for folder in inner.folders.values_mut() {
                if folder.parent_id == id {
                    folder.parent_id = new_parent.clone();
                    folder.updated_at = Utc::now();
                }
            }
            // Recompute legacy paths after the reparent.
            let profile_ids: Vec<String> = inner
                .profiles
                .values()
                .filter(|p| p.folder_id == new_parent)
                .map(|p| p.id.clone())
                .collect();
            for pid in profile_ids {
                let path = {
                    let folder_id = inner.profiles[&pid].folder_id.clone();
                    Self::folder_path_of(&inner, &folder_id)
                };
                if let Some(p) = inner.profiles.get_mut(&pid) {
                    p.folder_path = path;
                    profiles.push(p.clone());
                }
            }
            let folder_ids: Vec<String> = inner
                .folders
                .values()
                .filter(|f| f.parent_id == new_parent)
                .map(|f| f.id.clone())
                .collect();
            for fid in folder_ids {
                let path = Self::folder_path_of(&inner, &fid);
                if let Some(f) = inner.folders.get_mut(&fid) {
                    f.path = path;
                    folders.push(f.clone());
                }
            }
            (profiles, folders)
        };
        self.delete_file(id)?;
        for profile in &orphaned_profiles {
            if let Err(e) = self.persist_profile(profile) {
                log::warn!("profiles: persisting reparented profile failed: {e}");
            }
        }
        for folder in &orphaned_folders {
            if let Err(e) = self.persist_folder(folder) {
                log::warn!("profiles: persisting reparented folder failed: {e}");
            }
        }
        self.write_metrics();
        Ok(())
    }

    /// Moves a folder under a new parent. Refuses the folder itself and
    /// any transitive descendant as target, then recomputes and persists
    /// the legacy path strings of every transitive child.
    pub fn move_folder(&self, id: &str, new_parent_id: &str) -> CoreResult<()> {
        let (moved, affected_profiles, affected_folders) = {
            let mut inner = self.lock();
            if !inner.folders.contains_key(id) {
                return Err(CoreError::not_found("folder", id));
            }
            Self::require_folder_exists(&inner, new_parent_id)?;
            if Self::is_self_or_descendant(&inner, id, new_parent_id) || id == new_parent_id {
                return Err(CoreError::validation(
                    "cannot move a folder into itself or its descendants",
                ));
            }
            if let Some(folder) = inner.folders.get_mut(id) {
                folder.parent_id = new_parent_id.to_string();
                folder.updated_at = Utc::now();
            }

            // Refresh legacy paths across the moved subtree.
            let folder_ids: Vec<String> = inner.folders.keys().cloned().collect();
            let mut affected_folders = Vec::new();
            for fid in folder_ids {
                if Self::is_self_or_descendant(&inner, id, &fid) {
                    let path = Self::folder_path_of(&inner, &fid);
                    if let Some(f) = inner.folders.get_mut(&fid) {
                        f.path = path;
                        affected_folders.push(f.clone());
                    }
                }
            }
            let profile_ids: Vec<String> = inner.profiles.keys().cloned().collect();
            let mut affected_profiles = Vec::new();
            for pid in profile_ids {
                let folder_id = inner.profiles[&pid].folder_id.clone();
                if Self::is_self_or_descendant(&inner, id, &folder_id) {
                    let path = Self::folder_path_of(&inner, &folder_id);
                    if let Some(p) = inner.profiles.get_mut(&pid) {
                        p.folder_path = path;
                        affected_profiles.push(p.clone());
                    }
                }
            }
            let moved = inner
                .folders
                .get(id)
                .cloned()
                .ok_or_else(|| CoreError::not_found("folder", id))?;
            (moved, affected_profiles, affected_folders)
        };

        self.persist_folder(&moved)?;
        for folder in affected_folders.iter().filter(|f| f.id != moved.id) {
            if let Err(e) = self.persist_folder(folder) {
                log::warn!("profiles: persisting moved subtree folder failed: {e}");
            }
        }
        for profile in &affected_profiles {
            if let Err(e) = self.persist_profile(profile) {
                log::warn!("profiles: persisting moved subtree profile failed: {e}");
            }
        }
        Ok(())
    }

    // --- virtual folders ---

    /// Derived, presentation-only groupings. Recomputed on every call.
    pub fn virtual_folders(&self) -> Vec<VirtualFolder> {
        let profiles = self.list_profiles();
        let now = Utc::now();
        let recent_cutoff = now - ChronoDuration::days(RECENT_PROFILE_DAYS);

        let mut favorites: Vec<&Profile> = profiles.iter().filter(|p| p.is_favorite).collect();
        favorites.sort_by(|a, b| a.name.cmp(&b.name));

        let mut recent: Vec<&Profile> = profiles
            .iter()
            .filter(|p| p.last_used.map(|t| t >= recent_cutoff).unwrap_or(false))
            .collect();
        recent.sort_by(|a, b| b.last_used.cmp(&a.last_used));

        let mut most_used: Vec<&Profile> =
            profiles.iter().filter(|p| p.usage_count > 0).collect();
        most_used.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));

        let limit = 10usize;
        vec![
            VirtualFolder {
                kind: VirtualFolderKind::Favorites,
                name: "Favorites".to_string(),
                filter: VirtualFolderFilter {
                    sort_by: SortBy::Name,
                    sort_order: SortOrder::Asc,
                    limit,
                    date_range: None,
                },
                profile_ids: favorites.iter().take(limit).map(|p| p.id.clone()).collect(),
            },
            VirtualFolder {
                kind: VirtualFolderKind::Recent,
                name: "Recent".to_string(),
                filter: VirtualFolderFilter {
                    sort_by: SortBy::LastUsed,
                    sort_order: SortOrder::Desc,
                    limit,
                    date_range: Some((recent_cutoff, now)),
                },
                profile_ids: recent.iter().take(limit).map(|p| p.id.clone()).collect(),
            },
            VirtualFolder {
                kind: VirtualFolderKind::MostUsed,
                name: "Most Used".to_string(),
                filter: VirtualFolderFilter {
                    sort_by: SortBy::UsageCount,
                    sort_order: SortOrder::Desc,
                    limit,
                    date_range: None,
                },
                profile_ids: most_used.iter().take(limit).map(|p| p.id.clone()).collect(),
            },
        ]
    }

    // --- metrics ---

    /// Full recompute, not incremental.
    fn compute_metrics(&self) -> ProfileMetrics {
        let inner = self.lock();
        let mut by_usage: Vec<&Profile> = inner.profiles.values().collect();
        by_usage.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
        let mut by_recent: Vec<&Profile> = inner
            .profiles
            .values()
            .filter(|p| p.last_used.is_some())
            .collect();
        by_recent.sort_by(|a, b| b.last_used.cmp(&a.last_used));

        let mut tag_usage: HashMap<String, u32> = HashMap::new();
        for profile in inner.profiles.values() {
            for tag in &profile.tags {
                *tag_usage.entry(tag.clone()).or_insert(0) += 1;
            }
        }

        ProfileMetrics {
            total_profiles: inner.profiles.len(),
            total_folders: inner.folders.len(),
            top_used: by_usage.iter().take(5).map(|p| p.id.clone()).collect(),
            top_recent: by_recent.iter().take(5).map(|p| p.id.clone()).collect(),
            favorites: inner
                .profiles
                .values()
                .filter(|p| p.is_favorite)
                .map(|p| p.id.clone())
                .collect(),
            tag_usage,
            updated_at: Some(Utc::now()),
        }
    }

    fn write_metrics(&self) {
        let metrics = self.compute_metrics();
        let path = self.dir.join(METRICS_FILE_NAME);
        let yaml = match serde_yaml::to_string(&metrics) {
            Ok(yaml) => yaml,
            Err(e) => {
                log::warn!("profiles: metrics marshal failed: {e}");
                return;
            }
        };
        self.watcher_suspended.store(true, Ordering::Release);
        if let Err(e) = std::fs::write(&path, yaml.as_bytes()) {
            log::warn!("profiles: metrics write failed: {e}");
        }
        self.watcher_suspended.store(false, Ordering::Release);
    }

    pub fn metrics(&self) -> ProfileMetrics {
        self.compute_metrics()
    }

    // --- seeding ---

    /// First-run content so the UI is not blank.
    fn seed_defaults(&self) -> CoreResult<()> {
        log::info!("profiles: empty directory, seeding defaults");
        let folder = self.create_folder(ProfileFolder {
            name: "General".to_string(),
            icon: "folder".to_string(),
            expanded: true,
            ..Default::default()
        })?;
        self.create_profile(Profile {
            name: "Default Shell".to_string(),
            icon: "terminal".to_string(),
            shell: "auto".to_string(),
            folder_id: folder.id.clone(),
            is_favorite: true,
            description: "System default shell".to_string(),
            ..Default::default()
        })?;
        self.create_profile(Profile {
            name: "Home".to_string(),
            icon: "home".to_string(),
            shell: "auto".to_string(),
            working_dir: "~".to_string(),
            folder_id: folder.id,
            ..Default::default()
        })?;
        Ok(())
    }

    // --- watcher ---

    /// Starts the directory watcher. Events are drained on a dedicated
    /// thread holding only a weak reference, so dropping the store stops
    /// the pipeline.
    pub fn start_watcher(self: &Arc<Self>) -> CoreResult<()> {
        let (tx, rx) = std::sync::mpsc::channel::<PathBuf>();
        let suspended = self.watcher_suspended.clone();
        let mut watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("profiles: watcher error: {e}");
                        return;
                    }
                };
                if suspended.load(Ordering::Acquire) {
                    return;
                }
                if !matches!(
                    event.kind,
                    notify::EventKind::Create(_)
                        | notify::EventKind::Modify(_)
                        | notify::EventKind::Remove(_)
                ) {
                    return;
                }
                for path in event.paths {
                    let _ = tx.send(path);
                }
            },
        )
        .map_err(|e| CoreError::state(format!("watcher init failed: {e}")))?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| CoreError::state(format!("watch {} failed: {e}", self.dir.display())))?;
        {
            let mut guard = match self.watcher.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            *guard = Some(watcher);
        }

        let weak: Weak<ProfileStore> = Arc::downgrade(self);
        std::thread::Builder::new()
            .name("profile-watcher".to_string())
            .spawn(move || {
                while let Ok(path) = rx.recv() {
                    let Some(store) = weak.upgrade() else { break };
                    store.handle_watch_event(&path);
                }
                log::debug!("profile watcher drain thread exited");
            })
            .map_err(|e| CoreError::state(format!("watcher thread spawn failed: {e}")))?;
        Ok(())
    }

    /// Stops observing the directory. Used by shutdown teardown.
    pub fn stop_watcher(&self) {
        let mut guard = match self.watcher.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        *guard = None;
    }

    /// Reconciles one changed path: existing files reload by in-file ID,
    /// vanished files drop the ID extracted from the name. Deduplication
    /// is by ID, never by path.
    fn handle_watch_event(&self, path: &Path) {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let Some((kind, file_id)) = classify_file_name(file_name) else {
            return;
        };
        if path.exists() {
            let known = {
                let inner = self.lock();
                match kind {
                    EntityKind::Profile => inner.profiles.contains_key(&file_id),
                    EntityKind::Folder => inner.folders.contains_key(&file_id),
                }
            };
            if let Some((_, id)) = self.load_file(path) {
                let change_kind = if known {
                    ProfileChangeKind::Modified
                } else {
                    ProfileChangeKind::Created
                };
                log::debug!("profiles: watcher reloaded {} ({id})", path.display());
                self.bus.emit(Event::ProfileUpdated {
                    change_kind,
                    path: path.display().to_string(),
                    id,
                });
            }
        } else {
            let removed = {
                let mut inner = self.lock();
                match kind {
                    EntityKind::Profile => inner.profiles.remove(&file_id).is_some(),
                    EntityKind::Folder => inner.folders.remove(&file_id).is_some(),
                }
            };
            if removed {
                log::debug!("profiles: watcher dropped {file_id}");
                self.bus.emit(Event::ProfileUpdated {
                    change_kind: ProfileChangeKind::Deleted,
                    path: path.display().to_string(),
                    id: file_id,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile_models::profile_file_name;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> Arc<ProfileStore> {
        ProfileStore::open(dir.to_path_buf(), EventBus::default()).unwrap()
    }

    fn bare_profile(name: &str) -> Profile {
        Profile {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_directory_is_seeded() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(!store.list_profiles().is_empty());
        assert!(!store.list_folders().is_empty());
        assert!(dir.path().join(METRICS_FILE_NAME).exists());
    }

    #[test]
    fn rename_changes_filename_keeps_identity() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let mut profile = store.create_profile(bare_profile("Web")).unwrap();
        let old_file = dir.path().join(profile_file_name("Web", &profile.id));
        assert!(old_file.exists());

        profile.name = "Web Prod".to_string();
        let updated = store.update_profile(profile.clone()).unwrap();
        assert_eq!(updated.id, profile.id);

        let new_file = dir.path().join(profile_file_name("Web Prod", &profile.id));
        assert!(new_file.exists(), "renamed file missing");
        assert!(!old_file.exists(), "old file not removed");
        assert_eq!(store.get_profile(&profile.id).unwrap().name, "Web Prod");
    }

    #[test]
    fn broken_file_is_skipped_others_load() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.create_profile(bare_profile("Good")).unwrap();
        }
        std::fs::write(dir.path().join("Bad-ffffffffffffffff.yaml"), "{not yaml").unwrap();
        let store = open_store(dir.path());
        assert!(store.list_profiles().iter().any(|p| p.name == "Good"));
    }

    #[test]
    fn move_folder_refuses_self_and_descendants() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let a = store
            .create_folder(ProfileFolder {
                name: "A".into(),
                ..Default::default()
            })
            .unwrap();
        let b = store
            .create_folder(ProfileFolder {
                name: "B".into(),
                parent_id: a.id.clone(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.move_folder(&a.id, &a.id).is_err());
        assert!(store.move_folder(&a.id, &b.id).is_err());
        // Moving the child to root is fine.
        store.move_folder(&b.id, "").unwrap();
        assert_eq!(store.get_folder(&b.id).unwrap().parent_id, "");
    }

    #[test]
    fn legacy_path_recomputed_from_id_graph() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let outer = store
            .create_folder(ProfileFolder {
                name: "Outer".into(),
                ..Default::default()
            })
            .unwrap();
        let inner = store
            .create_folder(ProfileFolder {
                name: "Inner".into(),
                parent_id: outer.id.clone(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.get_folder(&inner.id).unwrap().path, "Outer/Inner");

        let profile = store
            .create_profile(Profile {
                name: "P".into(),
                folder_id: inner.id.clone(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(profile.folder_path, "Outer/Inner");

        store.move_folder(&inner.id, "").unwrap();
        assert_eq!(store.get_folder(&inner.id).unwrap().path, "Inner");
        assert_eq!(store.get_profile(&profile.id).unwrap().folder_path, "Inner");
    }

    #[test]
    fn delete_folder_moves_children_up() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let top = store
            .create_folder(ProfileFolder {
                name: "Top".into(),
                ..Default::default()
            })
            .unwrap();
        let mid = store
            .create_folder(ProfileFolder {
                name: "Mid".into(),
                parent_id: top.id.clone(),
                ..Default::default()
            })
            .unwrap();
        let profile = store
            .create_profile(Profile {
                name: "P".into(),
                folder_id: mid.id.clone(),
                ..Default::default()
            })
            .unwrap();

        store.delete_folder(&mid.id).unwrap();
        assert!(store.get_folder(&mid.id).is_err());
        assert_eq!(store.get_profile(&profile.id).unwrap().folder_id, top.id);
    }

    #[test]
    fn dangling_folder_reference_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let err = store
            .create_profile(Profile {
                name: "P".into(),
                folder_id: "feedfeedfeedfeed".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("existing folder"));
    }

    #[test]
    fn usage_recording_feeds_virtual_folders() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let p = store.create_profile(bare_profile("Busy")).unwrap();
        store.record_usage(&p.id).unwrap();
        store.record_usage(&p.id).unwrap();

        let virtuals = store.virtual_folders();
        let most_used = virtuals
            .iter()
            .find(|v| v.kind == VirtualFolderKind::MostUsed)
            .unwrap();
        assert_eq!(most_used.profile_ids.first(), Some(&p.id));
        let recent = virtuals
            .iter()
            .find(|v| v.kind == VirtualFolderKind::Recent)
            .unwrap();
        assert!(recent.profile_ids.contains(&p.id));
    }

    #[test]
    fn metrics_track_tags_and_favorites() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let mut p = bare_profile("Tagged");
        p.tags = vec!["prod".into(), "db".into()];
        p.is_favorite = true;
        let p = store.create_profile(p).unwrap();

        let metrics = store.metrics();
        assert!(metrics.favorites.contains(&p.id));
        assert_eq!(metrics.tag_usage.get("prod"), Some(&1));
    }

    #[tokio::test]
    async fn watcher_reloads_external_writes_by_id() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.start_watcher().unwrap();
        let mut rx = store.bus.subscribe();

        // Simulate a third-party writer dropping a new profile in.
        let external = Profile {
            id: "abcdefabcdefabcd".to_string(),
            name: "External".to_string(),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&external).unwrap();
        std::fs::write(dir.path().join(external.file_name()), yaml).unwrap();

        // The watcher pipeline is asynchronous; poll with a deadline.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if store.get_profile(&external.id).is_ok() {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "watcher never reloaded the external file"
            );
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        // At least one profile:updated event surfaced.
        let mut saw_event = false;
        while let Ok(event) = rx.try_recv() {
            if event.name() == "profile:updated" {
                saw_event = true;
            }
        }
        assert!(saw_event);
    }
}
