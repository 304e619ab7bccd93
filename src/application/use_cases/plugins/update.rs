use serde::Serialize;

use super::PluginTarget;
use super::install::{InstallOutcome, InstallPlugin, InstallPluginError};
use super::uninstall::{UninstallPlugin, UninstallPluginError};
use super::user_data::{ExportUserData, ImportUserData, UserDataError, UserDataSnapshot};
use crate::application::ports::bundle_store::BundleStore;
use crate::application::ports::page_repository::PageRepository;
use crate::application::ports::plugin_store::PluginStore;
use crate::domain::plugins::definition::is_newer_version;

#[derive(thiserror::Error, Debug)]
pub enum UpdatePluginError {
    #[error("cannot update plugin {current} to plugin {candidate}")]
    SlugMismatch { current: String, candidate: String },
    #[error("version {candidate} is not newer than {current}")]
    NotNewer { current: String, candidate: String },
    #[error("failed to export user data")]
    Export(#[source] UserDataError),
    #[error("failed to remove current version")]
    Uninstall(#[source] UninstallPluginError),
    #[error("failed to install new version")]
    Install(#[source] InstallPluginError),
    #[error("new version installed but user data was not restored")]
    Import(#[source] UserDataError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    pub from_version: String,
    pub to_version: String,
    pub install: InstallOutcome,
    pub modules_restored: Vec<String>,
    pub modules_skipped: Vec<String>,
}

pub struct UpdatePlugin<'a, S, P, B>
where
    S: PluginStore + ?Sized,
    P: PageRepository + ?Sized,
    B: BundleStore + ?Sized,
{
    pub store: &'a S,
    pub pages: &'a P,
    pub bundles: &'a B,
    pub verify: bool,
}

impl<'a, S, P, B> UpdatePlugin<'a, S, P, B>
where
    S: PluginStore + ?Sized,
    P: PageRepository + ?Sized,
    B: BundleStore + ?Sized,
{
    pub async fn execute(
        &self,
        current: &PluginTarget<'_>,
        next: &PluginTarget<'_>,
        user_id: &str,
    ) -> Result<UpdateOutcome, UpdatePluginError> {
        if current.slug() != next.slug() {
            return Err(UpdatePluginError::SlugMismatch {
                current: current.slug().to_string(),
                candidate: next.slug().to_string(),
            });
        }
        if !is_newer_version(current.version(), next.version()) {
            return Err(UpdatePluginError::NotNewer {
                current: current.version().to_string(),
                candidate: next.version().to_string(),
            });
        }
        tracing::info!(
            user_id,
            plugin = current.slug(),
            from = current.version(),
            to = next.version(),
            "plugin_update_started"
        );

        let snapshot = ExportUserData { store: self.store }
            .execute(current.slug(), user_id)
            .await
            .map_err(UpdatePluginError::Export)?;

        UninstallPlugin {
            store: self.store,
            pages: self.pages,
        }
        .execute(current, user_id)
        .await
        .map_err(UpdatePluginError::Uninstall)?;

        let install = match self.installer(true).execute(next, user_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = ?err, user_id, to = next.version(), "plugin_update_install_failed");
                self.restore(current, user_id, &snapshot).await;
                return Err(UpdatePluginError::Install(err));
            }
        };

        let imported = ImportUserData { store: self.store }
            .execute(next.slug(), user_id, &snapshot)
            .await
            .map_err(UpdatePluginError::Import)?;

        tracing::info!(
            user_id,
            plugin_id = install.plugin_id.as_str(),
            to = next.version(),
            "plugin_update_completed"
        );
        Ok(UpdateOutcome {
            from_version: snapshot.version,
            to_version: next.version().to_string(),
            install,
            modules_restored: imported.modules_restored,
            modules_skipped: imported.modules_skipped,
        })
    }

    fn installer(&self, refresh_bundle: bool) -> InstallPlugin<'a, S, P, B> {
        InstallPlugin {
            store: self.store,
            pages: self.pages,
            bundles: self.bundles,
            verify: self.verify,
            refresh_bundle,
        }
    }

    /// Best effort: puts the previous version back and replays its settings.
    async fn restore(&self, current: &PluginTarget<'_>, user_id: &str, snapshot: &UserDataSnapshot) {
        if let Err(err) = self.installer(false).execute(current, user_id).await {
            tracing::error!(error = ?err, user_id, version = current.version(), "plugin_update_restore_failed");
            return;
        }
        match (ImportUserData { store: self.store })
            .execute(current.slug(), user_id, snapshot)
            .await
        {
            Ok(_) => tracing::info!(user_id, version = current.version(), "plugin_update_restored"),
            Err(err) => {
                tracing::error!(error = ?err, user_id, version = current.version(), "plugin_update_restore_import_failed")
            }
        }
    }
}
