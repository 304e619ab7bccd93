use serde::Serialize;

use super::PluginTarget;
use crate::application::ports::page_repository::PageRepository;
use crate::application::ports::plugin_store::{PluginRowsError, PluginStore};

#[derive(thiserror::Error, Debug)]
pub enum UninstallPluginError {
    #[error("plugin not installed")]
    NotInstalled,
    #[error("failed to look up plugin installation")]
    Lookup(#[source] anyhow::Error),
    #[error("failed to delete plugin page")]
    Page(#[source] anyhow::Error),
    #[error("plugin row disappeared during uninstall")]
    PluginNotFound,
    #[error("failed to delete plugin rows")]
    Persist(#[source] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UninstallOutcome {
    pub plugin_id: String,
    pub deleted_modules: u64,
    pub page_deleted: bool,
}

pub struct UninstallPlugin<'a, S, P>
where
    S: PluginStore + ?Sized,
    P: PageRepository + ?Sized,
{
    pub store: &'a S,
    pub pages: &'a P,
}

impl<'a, S, P> UninstallPlugin<'a, S, P>
where
    S: PluginStore + ?Sized,
    P: PageRepository + ?Sized,
{
    /// Shared bundle files are left in place; other users may still run them.
    pub async fn execute(
        &self,
        target: &PluginTarget<'_>,
        user_id: &str,
    ) -> Result<UninstallOutcome, UninstallPluginError> {
        let slug = target.slug();
        tracing::info!(user_id, plugin = slug, "plugin_uninstall_started");

        let installed = self
            .store
            .find_installed(user_id, slug)
            .await
            .map_err(UninstallPluginError::Lookup)?
            .ok_or(UninstallPluginError::NotInstalled)?;

        let mut page_deleted = false;
        if let Some(template) = &target.definition.page {
            let removed = self
                .pages
                .delete_by_route(user_id, &template.route)
                .await
                .map_err(|err| {
                    tracing::error!(error = ?err, user_id, route = template.route.as_str(), "plugin_page_delete_failed");
                    UninstallPluginError::Page(err)
                })?;
            page_deleted = removed > 0;
        }

        let deleted_modules = self
            .store
            .delete_with_modules(user_id, &installed.id)
            .await
            .map_err(|err| match err {
                PluginRowsError::NotFound => UninstallPluginError::PluginNotFound,
                PluginRowsError::Storage(inner) => UninstallPluginError::Persist(inner),
                other => UninstallPluginError::Persist(anyhow::Error::new(other)),
            })?;

        tracing::info!(
            user_id,
            plugin_id = installed.id.as_str(),
            deleted_modules,
            page_deleted,
            "plugin_uninstall_completed"
        );
        Ok(UninstallOutcome {
            plugin_id: installed.id,
            deleted_modules,
            page_deleted,
        })
    }
}
