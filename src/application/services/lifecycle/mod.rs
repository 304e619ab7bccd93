use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::application::ports::bundle_store::{BundleStore, ValidationReport};
use crate::application::ports::page_repository::PageRepository;
use crate::application::ports::plugin_store::{InstalledPlugin, PluginStore};
use crate::application::use_cases::plugins::PluginTarget;
use crate::application::use_cases::plugins::install::{
    InstallOutcome, InstallPlugin, InstallPluginError,
};
use crate::application::use_cases::plugins::status::{GetPluginStatus, PluginStatusReport};
use crate::application::use_cases::plugins::uninstall::{
    UninstallOutcome, UninstallPlugin, UninstallPluginError,
};
use crate::application::use_cases::plugins::update::{
    UpdateOutcome, UpdatePlugin, UpdatePluginError,
};
use crate::application::use_cases::plugins::user_data::{
    ExportUserData, ImportOutcome, ImportUserData, UserDataError, UserDataSnapshot,
};
use crate::application::use_cases::plugins::validate::ValidateInstallation;
use crate::domain::plugins::definition::PluginDefinition;
use crate::domain::plugins::descriptor::{ModuleDescriptor, PluginDescriptor};

pub mod registry;

#[derive(Debug, Clone, Copy)]
pub struct LifecycleOptions {
    pub verify_after_install: bool,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            verify_after_install: true,
        }
    }
}

#[derive(Clone)]
pub struct LifecyclePorts {
    pub store: Arc<dyn PluginStore>,
    pub pages: Arc<dyn PageRepository>,
    pub bundles: Arc<dyn BundleStore>,
}

/// `{root}/shared/{slug}/v{version}`
pub fn shared_storage_path(root: &Path, slug: &str, version: &str) -> PathBuf {
    root.join("shared").join(slug).join(format!("v{version}"))
}

/// Drives install/uninstall/status/update for one plugin version.
pub struct PluginLifecycleManager {
    definition: Arc<PluginDefinition>,
    source_dir: PathBuf,
    shared_path: PathBuf,
    options: LifecycleOptions,
    ports: LifecyclePorts,
    // Advisory only; rows in the store are authoritative.
    active_users: RwLock<HashSet<String>>,
}

impl PluginLifecycleManager {
    /// Without a storage root the bundle is served straight from its source directory.
    pub fn new(
        definition: PluginDefinition,
        storage_root: Option<&Path>,
        sources_root: &Path,
        ports: LifecyclePorts,
        options: LifecycleOptions,
    ) -> Self {
        let source_dir = match &definition.source_dir {
            Some(dir) => PathBuf::from(dir),
            None => sources_root
                .join(definition.slug())
                .join(definition.version()),
        };
        let shared_path = match storage_root {
            Some(root) => shared_storage_path(root, definition.slug(), definition.version()),
            None => source_dir.clone(),
        };
        Self {
            definition: Arc::new(definition),
            source_dir,
            shared_path,
            options,
            ports,
            active_users: RwLock::new(HashSet::new()),
        }
    }

    pub fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    pub fn plugin(&self) -> &PluginDescriptor {
        &self.definition.plugin
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.definition.modules
    }

    pub fn slug(&self) -> &str {
        self.definition.slug()
    }

    pub fn version(&self) -> &str {
        self.definition.version()
    }

    pub fn instance_id(&self) -> String {
        format!("{}_{}", self.slug(), self.version())
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn shared_path(&self) -> &Path {
        &self.shared_path
    }

    fn target(&self) -> PluginTarget<'_> {
        PluginTarget {
            definition: &self.definition,
            source_dir: &self.source_dir,
            shared_path: &self.shared_path,
        }
    }

    /// The user's row for this slug, whichever version wrote it.
    pub async fn find_installed(&self, user_id: &str) -> anyhow::Result<Option<InstalledPlugin>> {
        self.ports.store.find_installed(user_id, self.slug()).await
    }

    pub async fn install(&self, user_id: &str) -> Result<InstallOutcome, InstallPluginError> {
        let uc = InstallPlugin {
            store: self.ports.store.as_ref(),
            pages: self.ports.pages.as_ref(),
            bundles: self.ports.bundles.as_ref(),
            verify: self.options.verify_after_install,
            refresh_bundle: false,
        };
        let outcome = uc.execute(&self.target(), user_id).await?;
        self.active_users.write().await.insert(user_id.to_string());
        Ok(outcome)
    }

    pub async fn uninstall(&self, user_id: &str) -> Result<UninstallOutcome, UninstallPluginError> {
        let uc = UninstallPlugin {
            store: self.ports.store.as_ref(),
            pages: self.ports.pages.as_ref(),
        };
        let outcome = uc.execute(&self.target(), user_id).await?;
        self.active_users.write().await.remove(user_id);
        Ok(outcome)
    }

    pub async fn status(&self, user_id: &str) -> anyhow::Result<PluginStatusReport> {
        let uc = GetPluginStatus {
            store: self.ports.store.as_ref(),
            bundles: self.ports.bundles.as_ref(),
        };
        uc.execute(&self.target(), user_id).await
    }

    /// Checks `plugin_dir`, or this version's shared path when `None`.
    pub async fn validate_installation(&self, plugin_dir: Option<&Path>) -> ValidationReport {
        let uc = ValidateInstallation {
            bundles: self.ports.bundles.as_ref(),
        };
        uc.execute(plugin_dir.unwrap_or(&self.shared_path), &self.definition.bundle)
            .await
    }

    pub async fn export_user_data(&self, user_id: &str) -> Result<UserDataSnapshot, UserDataError> {
        ExportUserData {
            store: self.ports.store.as_ref(),
        }
        .execute(self.slug(), user_id)
        .await
    }

    pub async fn import_user_data(
        &self,
        user_id: &str,
        snapshot: &UserDataSnapshot,
    ) -> Result<ImportOutcome, UserDataError> {
        ImportUserData {
            store: self.ports.store.as_ref(),
        }
        .execute(self.slug(), user_id, snapshot)
        .await
    }

    /// Moves `user_id` from this version to `next`, carrying settings across.
    pub async fn update(
        &self,
        user_id: &str,
        next: &PluginLifecycleManager,
    ) -> Result<UpdateOutcome, UpdatePluginError> {
        let uc = UpdatePlugin {
            store: self.ports.store.as_ref(),
            pages: self.ports.pages.as_ref(),
            bundles: self.ports.bundles.as_ref(),
            verify: next.options.verify_after_install,
        };
        let outcome = uc.execute(&self.target(), &next.target(), user_id).await?;
        self.active_users.write().await.remove(user_id);
        next.active_users.write().await.insert(user_id.to_string());
        Ok(outcome)
    }

    pub async fn active_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.active_users.read().await.iter().cloned().collect();
        users.sort();
        users
    }

    pub async fn rebuild_active_users(&self) -> anyhow::Result<usize> {
        let users = self
            .ports
            .store
            .list_users(self.slug(), self.version())
            .await?;
        let count = users.len();
        *self.active_users.write().await = users.into_iter().collect();
        tracing::debug!(instance = %self.instance_id(), users = count, "plugin_active_users_rebuilt");
        Ok(count)
    }
}
