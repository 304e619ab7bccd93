use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::PluginTarget;
use crate::application::ports::bundle_store::{BundleCopyError, BundleStaging, BundleStore};
use crate::application::ports::page_repository::{NewPage, PageRepository};
use crate::application::ports::plugin_store::{ModuleRow, PluginRow, PluginRowsError, PluginStore};
use crate::domain::plugins::descriptor::module_row_id;
use crate::domain::plugins::page::{PageContent, PageTemplate};

#[derive(thiserror::Error, Debug)]
pub enum InstallPluginError {
    #[error("plugin already installed")]
    AlreadyInstalled { plugin_id: String },
    #[error("plugin id {plugin_id} is taken by another installation")]
    IdConflict { plugin_id: String },
    #[error("failed to look up plugin installation")]
    Lookup(#[source] anyhow::Error),
    #[error("failed to stage plugin bundle")]
    Bundle(#[source] BundleCopyError),
    #[error("failed to persist plugin rows")]
    Persist(#[source] anyhow::Error),
    #[error("installation verification failed")]
    VerificationFailed,
    #[error("unable to resolve module for plugin page")]
    ModuleUnresolved,
    #[error("failed to create plugin page")]
    Page(#[source] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageOutcome {
    pub page_id: String,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallOutcome {
    pub plugin_id: String,
    pub plugin_slug: String,
    pub plugin_name: String,
    pub modules_created: Vec<String>,
    pub files_copied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageOutcome>,
}

pub struct InstallPlugin<'a, S, P, B>
where
    S: PluginStore + ?Sized,
    P: PageRepository + ?Sized,
    B: BundleStore + ?Sized,
{
    pub store: &'a S,
    pub pages: &'a P,
    pub bundles: &'a B,
    /// Re-read the plugin row after commit and fail if it is not visible.
    pub verify: bool,
    /// Replace bundle files already present in shared storage.
    pub refresh_bundle: bool,
}

impl<'a, S, P, B> InstallPlugin<'a, S, P, B>
where
    S: PluginStore + ?Sized,
    P: PageRepository + ?Sized,
    B: BundleStore + ?Sized,
{
    pub async fn execute(
        &self,
        target: &PluginTarget<'_>,
        user_id: &str,
    ) -> Result<InstallOutcome, InstallPluginError> {
        let definition = target.definition;
        let slug = target.slug();
        tracing::info!(user_id, plugin = slug, version = target.version(), "plugin_install_started");

        if let Some(existing) = self
            .store
            .find_installed(user_id, slug)
            .await
            .map_err(InstallPluginError::Lookup)?
        {
            tracing::warn!(user_id, plugin = slug, "plugin_already_installed");
            return Err(InstallPluginError::AlreadyInstalled {
                plugin_id: existing.id,
            });
        }

        let report = self
            .bundles
            .stage(BundleStaging {
                source: target.source_dir,
                target: target.shared_path,
                filter: &definition.copy_filter,
                update: self.refresh_bundle,
            })
            .await
            .map_err(InstallPluginError::Bundle)?;

        let now = Utc::now();
        let plugin_row = PluginRow::for_user(&definition.plugin, user_id, now);
        let module_rows: Vec<ModuleRow> = definition
            .modules
            .iter()
            .map(|m| ModuleRow::for_user(slug, m, user_id, now))
            .collect();
        let plugin_id = plugin_row.id.clone();

        match self.store.insert_with_modules(&plugin_row, &module_rows).await {
            Ok(()) => {}
            Err(PluginRowsError::Duplicate) => {
                return Err(self.duplicate_error(user_id, slug, &plugin_id).await);
            }
            Err(PluginRowsError::Storage(inner)) => return Err(InstallPluginError::Persist(inner)),
            Err(other) => return Err(InstallPluginError::Persist(anyhow::Error::new(other))),
        }
        let modules_created: Vec<String> = module_rows.into_iter().map(|m| m.id).collect();
        tracing::info!(
            user_id,
            plugin_id = plugin_id.as_str(),
            modules = modules_created.len(),
            "plugin_rows_created"
        );

        if self.verify {
            match self.store.find_installed(user_id, slug).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::error!(user_id, plugin_id = plugin_id.as_str(), "plugin_install_not_visible");
                    return Err(InstallPluginError::VerificationFailed);
                }
                Err(err) => return Err(InstallPluginError::Lookup(err)),
            }
        }

        let page = match &definition.page {
            Some(template) => {
                match self
                    .create_page(template, target, user_id, &plugin_id, &modules_created)
                    .await
                {
                    Ok(page) => Some(page),
                    Err(err) => {
                        tracing::error!(error = ?err, user_id, plugin_id = plugin_id.as_str(), "plugin_page_create_failed");
                        self.compensate(user_id, &plugin_id).await;
                        return Err(err);
                    }
                }
            }
            None => None,
        };

        tracing::info!(user_id, plugin_id = plugin_id.as_str(), "plugin_install_completed");
        Ok(InstallOutcome {
            plugin_id,
            plugin_slug: slug.to_string(),
            plugin_name: definition.plugin.name.clone(),
            modules_created,
            files_copied: report.copied.len(),
            page,
        })
    }

    async fn create_page(
        &self,
        template: &PageTemplate,
        target: &PluginTarget<'_>,
        user_id: &str,
        plugin_id: &str,
        modules_created: &[String],
    ) -> Result<PageOutcome, InstallPluginError> {
        if let Some(page_id) = self
            .pages
            .find_id_by_route(user_id, &template.route)
            .await
            .map_err(InstallPluginError::Page)?
        {
            tracing::info!(user_id, page_id = page_id.as_str(), "plugin_page_exists");
            return Ok(PageOutcome {
                page_id,
                created: false,
            });
        }

        let module_id = self
            .resolve_page_module(template, target, user_id, plugin_id, modules_created)
            .await?;

        let now = Utc::now();
        let content =
            PageContent::single_module(template, target.slug(), &module_id, now.timestamp_millis());
        let page = NewPage {
            id: Uuid::new_v4().simple().to_string(),
            name: template.name.clone(),
            route: template.route.clone(),
            content: serde_json::to_value(&content).map_err(|e| InstallPluginError::Page(e.into()))?,
            creator_id: user_id.to_string(),
            is_published: template.published,
            created_at: now,
        };
        self.pages
            .insert(&page)
            .await
            .map_err(InstallPluginError::Page)?;

        tracing::info!(user_id, page_id = page.id.as_str(), "plugin_page_created");
        Ok(PageOutcome {
            page_id: page.id,
            created: true,
        })
    }

    /// Named module among the created rows, else from the store, else the
    /// first created module.
    async fn resolve_page_module(
        &self,
        template: &PageTemplate,
        target: &PluginTarget<'_>,
        user_id: &str,
        plugin_id: &str,
        modules_created: &[String],
    ) -> Result<String, InstallPluginError> {
        if let Some(name) = &template.module {
            let expected = module_row_id(user_id, target.slug(), name);
            if modules_created.contains(&expected) {
                return Ok(expected);
            }
            if let Some(id) = self
                .store
                .find_module_id(user_id, plugin_id, name)
                .await
                .map_err(InstallPluginError::Page)?
            {
                return Ok(id);
            }
            tracing::warn!(user_id, module = name.as_str(), "plugin_page_module_missing");
        }
        modules_created
            .first()
            .cloned()
            .ok_or(InstallPluginError::ModuleUnresolved)
    }

    /// A unique violation is either a concurrent install of the same plugin or
    /// another user's row whose composite id matches ours.
    async fn duplicate_error(&self, user_id: &str, slug: &str, plugin_id: &str) -> InstallPluginError {
        match self.store.find_installed(user_id, slug).await {
            Ok(Some(existing)) => {
                tracing::warn!(user_id, plugin = slug, "plugin_install_raced");
                InstallPluginError::AlreadyInstalled {
                    plugin_id: existing.id,
                }
            }
            Ok(None) => {
                tracing::error!(user_id, plugin_id, "plugin_id_conflict");
                InstallPluginError::IdConflict {
                    plugin_id: plugin_id.to_string(),
                }
            }
            Err(err) => InstallPluginError::Lookup(err),
        }
    }

    /// Removes the rows inserted by a failed install. A missing row counts as removed.
    async fn compensate(&self, user_id: &str, plugin_id: &str) {
        match self.store.delete_with_modules(user_id, plugin_id).await {
            Ok(deleted_modules) => {
                tracing::info!(user_id, plugin_id, deleted_modules, "plugin_install_rolled_back");
            }
            Err(PluginRowsError::NotFound) => {}
            Err(err) => {
                tracing::error!(error = ?err, user_id, plugin_id, "plugin_install_rollback_failed");
            }
        }
    }
}
