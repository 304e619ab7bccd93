use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::bail;

use super::{LifecycleOptions, LifecyclePorts, PluginLifecycleManager};
use crate::application::ports::plugin_store::InstalledPlugin;
use crate::domain::plugins::definition::{PluginDefinition, compare_versions};

#[derive(thiserror::Error, Debug)]
pub enum ResolveManagerError {
    #[error("unknown plugin {0}")]
    UnknownPlugin(String),
    #[error("installed version {version} of {slug} is not registered")]
    UnregisteredVersion { slug: String, version: String },
    #[error("failed to look up plugin installation")]
    Lookup(#[source] anyhow::Error),
}

/// Manager chosen for one user's request, with the row that chose it.
pub struct UserManager {
    pub manager: Arc<PluginLifecycleManager>,
    pub installed: Option<InstalledPlugin>,
}

/// Lifecycle managers for every known plugin version, keyed by slug.
#[derive(Default)]
pub struct LifecycleRegistry {
    managers: BTreeMap<String, Vec<Arc<PluginLifecycleManager>>>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(
        definitions: Vec<PluginDefinition>,
        storage_root: Option<&Path>,
        sources_root: &Path,
        ports: LifecyclePorts,
        options: LifecycleOptions,
    ) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(PluginLifecycleManager::new(
                definition,
                storage_root,
                sources_root,
                ports.clone(),
                options,
            ))?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, manager: PluginLifecycleManager) -> anyhow::Result<()> {
        let versions = self.managers.entry(manager.slug().to_string()).or_default();
        if versions.iter().any(|m| m.version() == manager.version()) {
            bail!("plugin {} registered twice", manager.instance_id());
        }
        versions.push(Arc::new(manager));
        versions.sort_by(|a, b| compare_versions(a.version(), b.version()));
        Ok(())
    }

    /// Highest registered version of `slug`.
    pub fn current(&self, slug: &str) -> Option<Arc<PluginLifecycleManager>> {
        self.managers.get(slug)?.last().cloned()
    }

    pub fn version(&self, slug: &str, version: &str) -> Option<Arc<PluginLifecycleManager>> {
        self.managers
            .get(slug)?
            .iter()
            .find(|m| m.version() == version)
            .cloned()
    }

    /// Manager for the version `user_id` has installed, or the newest version
    /// when the user has no row for `slug`.
    pub async fn for_user(&self, slug: &str, user_id: &str) -> Result<UserManager, ResolveManagerError> {
        let current = self
            .current(slug)
            .ok_or_else(|| ResolveManagerError::UnknownPlugin(slug.to_string()))?;
        let installed = current
            .find_installed(user_id)
            .await
            .map_err(ResolveManagerError::Lookup)?;
        let manager = match &installed {
            Some(row) if row.version != current.version() => self
                .version(slug, &row.version)
                .ok_or_else(|| ResolveManagerError::UnregisteredVersion {
                    slug: slug.to_string(),
                    version: row.version.clone(),
                })?,
            _ => current,
        };
        Ok(UserManager { manager, installed })
    }

    /// All managers ordered by slug, then version.
    pub fn managers(&self) -> impl Iterator<Item = &Arc<PluginLifecycleManager>> {
        self.managers.values().flatten()
    }

    /// Rebuilds every manager's advisory active-user set from stored rows.
    pub async fn rebuild_all(&self) -> anyhow::Result<usize> {
        let mut total = 0;
        for manager in self.managers() {
            total += manager.rebuild_active_users().await?;
        }
        tracing::info!(managers = self.managers().count(), users = total, "plugin_registry_rebuilt");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plugins::catalog;
    use crate::infrastructure::bundles::filesystem_store::FilesystemBundleStore;
    use crate::infrastructure::db::memory_pool;
    use crate::infrastructure::db::repositories::page_repository_sqlx::SqlxPageRepository;
    use crate::infrastructure::db::repositories::plugin_store_sqlx::SqlxPluginStore;
    use tempfile::TempDir;

    async fn ports() -> LifecyclePorts {
        let pool = memory_pool().await;
        LifecyclePorts {
            store: Arc::new(SqlxPluginStore::new(pool.clone())),
            pages: Arc::new(SqlxPageRepository::new(pool)),
            bundles: Arc::new(FilesystemBundleStore::new()),
        }
    }

    fn notes_at(version: &str) -> PluginDefinition {
        let mut def = catalog::notes_panel();
        def.plugin.version = version.to_string();
        def
    }

    #[tokio::test]
    async fn current_is_highest_semver() {
        let registry = LifecycleRegistry::from_definitions(
            vec![notes_at("1.10.0"), notes_at("1.9.2"), catalog::model_evaluator()],
            None,
            Path::new("/srv/sources"),
            ports().await,
            LifecycleOptions::default(),
        )
        .unwrap();

        assert_eq!(registry.current("NotesPanel").unwrap().version(), "1.10.0");
        assert_eq!(
            registry.version("NotesPanel", "1.9.2").unwrap().instance_id(),
            "NotesPanel_1.9.2"
        );
        assert!(registry.version("NotesPanel", "2.0.0").is_none());
        assert!(registry.current("Unknown").is_none());
        assert_eq!(registry.managers().count(), 3);
    }

    fn write_sources(root: &Path, versions: &[&str]) {
        for version in versions {
            let dir = root.join("NotesPanel").join(version);
            std::fs::create_dir_all(dir.join("dist")).unwrap();
            std::fs::write(dir.join("package.json"), r#"{"name":"NotesPanel","version":"1"}"#)
                .unwrap();
            std::fs::write(dir.join("dist/remoteEntry.js"), "export {};").unwrap();
        }
    }

    #[tokio::test]
    async fn for_user_follows_installed_version() {
        let tmp = TempDir::new().unwrap();
        let sources = tmp.path().join("sources");
        let root = tmp.path().join("plugins");
        write_sources(&sources, &["1.2.0", "1.3.0"]);
        let ports = ports().await;
        let registry = LifecycleRegistry::from_definitions(
            vec![notes_at("1.2.0"), notes_at("1.3.0")],
            Some(&root),
            &sources,
            ports.clone(),
            LifecycleOptions::default(),
        )
        .unwrap();

        let resolved = registry.for_user("NotesPanel", "u1").await.unwrap();
        assert_eq!(resolved.manager.version(), "1.3.0");
        assert!(resolved.installed.is_none());

        registry
            .version("NotesPanel", "1.2.0")
            .unwrap()
            .install("u1")
            .await
            .unwrap();
        let resolved = registry.for_user("NotesPanel", "u1").await.unwrap();
        assert_eq!(resolved.manager.version(), "1.2.0");
        assert_eq!(resolved.installed.unwrap().id, "u1_NotesPanel");

        assert!(matches!(
            registry.for_user("Unknown", "u1").await,
            Err(ResolveManagerError::UnknownPlugin(_))
        ));

        let newer_only = LifecycleRegistry::from_definitions(
            vec![notes_at("1.3.0")],
            Some(&root),
            &sources,
            ports,
            LifecycleOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            newer_only.for_user("NotesPanel", "u1").await,
            Err(ResolveManagerError::UnregisteredVersion { ref version, .. }) if version == "1.2.0"
        ));
    }

    #[tokio::test]
    async fn duplicate_versions_are_rejected() {
        let result = LifecycleRegistry::from_definitions(
            vec![catalog::notes_panel(), catalog::notes_panel()],
            None,
            Path::new("/srv/sources"),
            ports().await,
            LifecycleOptions::default(),
        );
        assert!(result.is_err());
    }
}
