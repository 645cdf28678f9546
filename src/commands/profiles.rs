//! Profile and folder CRUD plus the derived virtual folders.

use crate::core::error::{CoreError, CoreResult};
use crate::core::profile_models::{
    Profile, ProfileFolder, ProfileMetrics, VirtualFolder,
};
use crate::App;

pub fn get_profiles(app: &App) -> Vec<Profile> {
    app.profiles.list_profiles()
}

pub fn get_profile(app: &App, profile_id: &str) -> CoreResult<Profile> {
    app.profiles.get_profile(profile_id)
}

/// Creates a profile; the id is generated server-side.
pub fn create_profile(app: &App, profile: Profile) -> CoreResult<Profile> {
    app.profiles.create_profile(profile)
}

pub fn update_profile(app: &App, profile: Profile) -> CoreResult<Profile> {
    if profile.id.is_empty() {
        return Err(CoreError::validation("profile id must not be empty"));
    }
    app.profiles.update_profile(profile)
}

pub fn delete_profile(app: &App, profile_id: &str) -> CoreResult<()> {
    app.profiles.delete_profile(profile_id)
}

pub fn get_folders(app: &App) -> Vec<ProfileFolder> {
    app.profiles.list_folders()
}

pub fn create_folder(app: &App, folder: ProfileFolder) -> CoreResult<ProfileFolder> {
    app.profiles.create_folder(folder)
}

pub fn update_folder(app: &App, folder: ProfileFolder) -> CoreResult<ProfileFolder> {
    if folder.id.is_empty() {
        return Err(CoreError::validation("folder id must not be empty"));
    }
    app.profiles.update_folder(folder)
}

/// Deletes a folder; its direct children move up one level.
pub fn delete_folder(app: &App, folder_id: &str) -> CoreResult<()> {
    app.profiles.delete_folder(folder_id)
}

/// Moves a folder under a new parent (empty string means root).
/// Refuses the folder itself and its transitive descendants.
pub fn move_folder(app: &App, folder_id: &str, new_parent_id: &str) -> CoreResult<()> {
    app.profiles.move_folder(folder_id, new_parent_id)
}

pub fn get_virtual_folders(app: &App) -> Vec<VirtualFolder> {
    app.profiles.virtual_folders()
}

pub fn get_profile_metrics(app: &App) -> ProfileMetrics {
    app.profiles.metrics()
}
