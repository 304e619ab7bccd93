use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::ports::plugin_store::{
    ModuleSettings, PluginRowsError, PluginSettings, PluginStore, StoredSettings,
};

/// Per-user plugin and module settings captured for a later import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataSnapshot {
    pub plugin_slug: String,
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub plugin: PluginSettings,
    #[serde(default)]
    pub modules: Vec<ModuleSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub plugin_id: String,
    pub modules_restored: Vec<String>,
    pub modules_skipped: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum UserDataError {
    #[error("plugin not installed")]
    NotInstalled,
    #[error("snapshot belongs to plugin {found}, expected {expected}")]
    SlugMismatch { expected: String, found: String },
    #[error("failed to access plugin settings")]
    Storage(#[source] anyhow::Error),
}

pub struct ExportUserData<'a, S: PluginStore + ?Sized> {
    pub store: &'a S,
}

impl<'a, S: PluginStore + ?Sized> ExportUserData<'a, S> {
    pub async fn execute(
        &self,
        plugin_slug: &str,
        user_id: &str,
    ) -> Result<UserDataSnapshot, UserDataError> {
        let installed = self
            .store
            .find_installed(user_id, plugin_slug)
            .await
            .map_err(UserDataError::Storage)?
            .ok_or(UserDataError::NotInstalled)?;
        let settings = self
            .store
            .load_settings(user_id, &installed.id)
            .await
            .map_err(UserDataError::Storage)?
            .ok_or(UserDataError::NotInstalled)?;

        tracing::info!(
            user_id,
            plugin_id = installed.id.as_str(),
            modules = settings.modules.len(),
            "plugin_user_data_exported"
        );
        Ok(UserDataSnapshot {
            plugin_slug: plugin_slug.to_string(),
            version: installed.version,
            exported_at: Utc::now(),
            plugin: settings.plugin,
            modules: settings.modules,
        })
    }
}

pub struct ImportUserData<'a, S: PluginStore + ?Sized> {
    pub store: &'a S,
}

impl<'a, S: PluginStore + ?Sized> ImportUserData<'a, S> {
    pub async fn execute(
        &self,
        plugin_slug: &str,
        user_id: &str,
        snapshot: &UserDataSnapshot,
    ) -> Result<ImportOutcome, UserDataError> {
        if snapshot.plugin_slug != plugin_slug {
            return Err(UserDataError::SlugMismatch {
                expected: plugin_slug.to_string(),
                found: snapshot.plugin_slug.clone(),
            });
        }
        let installed = self
            .store
            .find_installed(user_id, plugin_slug)
            .await
            .map_err(UserDataError::Storage)?
            .ok_or(UserDataError::NotInstalled)?;

        let settings = StoredSettings {
            plugin: snapshot.plugin.clone(),
            modules: snapshot.modules.clone(),
        };
        let applied = self
            .store
            .apply_settings(user_id, &installed.id, &settings)
            .await
            .map_err(|err| match err {
                PluginRowsError::NotFound => UserDataError::NotInstalled,
                PluginRowsError::Storage(inner) => UserDataError::Storage(inner),
                other => UserDataError::Storage(anyhow::Error::new(other)),
            })?;

        if !applied.modules_skipped.is_empty() {
            tracing::warn!(
                user_id,
                plugin_id = installed.id.as_str(),
                skipped = ?applied.modules_skipped,
                "plugin_user_data_modules_skipped"
            );
        }
        tracing::info!(
            user_id,
            plugin_id = installed.id.as_str(),
            restored = applied.modules_updated.len(),
            from_version = snapshot.version.as_str(),
            "plugin_user_data_imported"
        );
        Ok(ImportOutcome {
            plugin_id: installed.id,
            modules_restored: applied.modules_updated,
            modules_skipped: applied.modules_skipped,
        })
    }
}
