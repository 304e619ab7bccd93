use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::plugins::descriptor::{
    ModuleDescriptor, PluginDescriptor, module_row_id, plugin_row_id,
};

/// Full `plugin` row as written at install time.
#[derive(Debug, Clone)]
pub struct PluginRow {
    pub id: String,
    pub user_id: String,
    pub plugin_slug: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub plugin_type: String,
    pub enabled: bool,
    pub icon: String,
    pub category: String,
    pub status: String,
    pub official: bool,
    pub author: String,
    pub compatibility: String,
    pub downloads: i64,
    pub scope: String,
    pub bundle_method: String,
    pub bundle_location: String,
    pub is_local: bool,
    pub long_description: String,
    pub config_fields: JsonValue,
    pub source_type: String,
    pub source_url: String,
    pub update_check_url: Option<String>,
    pub last_update_check: Option<DateTime<Utc>>,
    pub update_available: bool,
    pub latest_version: Option<String>,
    pub installation_type: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PluginRow {
    pub fn for_user(plugin: &PluginDescriptor, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: plugin_row_id(user_id, &plugin.slug),
            user_id: user_id.to_string(),
            plugin_slug: plugin.slug.clone(),
            name: plugin.name.clone(),
            description: plugin.description.clone(),
            version: plugin.version.clone(),
            plugin_type: plugin.plugin_type.clone(),
            enabled: true,
            icon: plugin.icon.clone(),
            category: plugin.category.clone(),
            status: "activated".to_string(),
            official: plugin.official,
            author: plugin.author.clone(),
            compatibility: plugin.compatibility.clone(),
            downloads: 0,
            scope: plugin.scope.clone(),
            bundle_method: plugin.bundle_method.clone(),
            bundle_location: plugin.bundle_location.clone(),
            is_local: plugin.is_local,
            long_description: plugin.long_description.clone(),
            config_fields: JsonValue::Object(Default::default()),
            source_type: plugin.source_type.clone(),
            source_url: plugin.source_url.clone(),
            update_check_url: plugin.update_check.url.clone(),
            last_update_check: plugin.update_check.last_checked,
            update_available: plugin.update_check.update_available,
            latest_version: plugin.update_check.latest_version.clone(),
            installation_type: plugin.installation_type.clone(),
            permissions: plugin.permissions.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Full `module` row as written at install time.
#[derive(Debug, Clone)]
pub struct ModuleRow {
    pub id: String,
    pub plugin_id: String,
    pub user_id: String,
    pub module: ModuleDescriptor,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModuleRow {
    pub fn for_user(
        plugin_slug: &str,
        module: &ModuleDescriptor,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: module_row_id(user_id, plugin_slug, &module.name),
            plugin_id: plugin_row_id(user_id, plugin_slug),
            user_id: user_id.to_string(),
            module: module.clone(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Identity of an installed plugin row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstalledPlugin {
    pub id: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub plugin_slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSettings {
    pub config_fields: JsonValue,
    pub enabled: bool,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSettings {
    pub name: String,
    pub config_fields: JsonValue,
    pub enabled: bool,
    pub priority: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSettings {
    pub plugin: PluginSettings,
    pub modules: Vec<ModuleSettings>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsApplied {
    pub modules_updated: Vec<String>,
    pub modules_skipped: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum PluginRowsError {
    #[error("plugin rows already exist")]
    Duplicate,
    #[error("plugin row not found")]
    NotFound,
    #[error("plugin store failure")]
    Storage(#[source] anyhow::Error),
}

#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn find_installed(
        &self,
        user_id: &str,
        plugin_slug: &str,
    ) -> anyhow::Result<Option<InstalledPlugin>>;

    /// Inserts the plugin row and all module rows in one transaction.
    async fn insert_with_modules(
        &self,
        plugin: &PluginRow,
        modules: &[ModuleRow],
    ) -> Result<(), PluginRowsError>;

    /// Deletes module rows then the plugin row in one transaction and
    /// returns the number of module rows removed.
    async fn delete_with_modules(&self, user_id: &str, plugin_id: &str)
    -> Result<u64, PluginRowsError>;

    async fn find_module_id(
        &self,
        user_id: &str,
        plugin_id: &str,
        module_name: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Users owning a row for this plugin slug at this version.
    async fn list_users(&self, plugin_slug: &str, version: &str) -> anyhow::Result<Vec<String>>;

    async fn load_settings(
        &self,
        user_id: &str,
        plugin_id: &str,
    ) -> anyhow::Result<Option<StoredSettings>>;

    /// Writes plugin and module settings back, matching modules by name.
    async fn apply_settings(
        &self,
        user_id: &str,
        plugin_id: &str,
        settings: &StoredSettings,
    ) -> Result<SettingsApplied, PluginRowsError>;
}
