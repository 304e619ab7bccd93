use serde::Serialize;

use super::PluginTarget;
use crate::application::ports::bundle_store::{BundleHealth, BundleStore};
use crate::application::ports::plugin_store::{InstalledPlugin, PluginStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    NotInstalled,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginStatusReport {
    pub status: PluginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<InstalledPlugin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<BundleHealth>,
}

impl PluginStatusReport {
    pub fn exists(&self) -> bool {
        self.plugin.is_some()
    }
}

pub struct GetPluginStatus<'a, S, B>
where
    S: PluginStore + ?Sized,
    B: BundleStore + ?Sized,
{
    pub store: &'a S,
    pub bundles: &'a B,
}

impl<'a, S, B> GetPluginStatus<'a, S, B>
where
    S: PluginStore + ?Sized,
    B: BundleStore + ?Sized,
{
    pub async fn execute(
        &self,
        target: &PluginTarget<'_>,
        user_id: &str,
    ) -> anyhow::Result<PluginStatusReport> {
        let Some(plugin) = self.store.find_installed(user_id, target.slug()).await? else {
            return Ok(PluginStatusReport {
                status: PluginStatus::NotInstalled,
                plugin: None,
                health: None,
            });
        };

        let health = self
            .bundles
            .health(target.shared_path, &target.definition.bundle)
            .await;
        let status = if health.is_healthy() {
            PluginStatus::Healthy
        } else {
            tracing::warn!(
                user_id,
                plugin_id = plugin.id.as_str(),
                error = health.error.as_deref().unwrap_or("incomplete bundle"),
                "plugin_bundle_unhealthy"
            );
            PluginStatus::Unhealthy
        };

        Ok(PluginStatusReport {
            status,
            plugin: Some(plugin),
            health: Some(health),
        })
    }
}
