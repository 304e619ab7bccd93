use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::Row;

use crate::application::ports::plugin_store::{
    InstalledPlugin, ModuleRow, ModuleSettings, PluginRow, PluginRowsError, PluginSettings,
    PluginStore, SettingsApplied, StoredSettings,
};
use crate::infrastructure::db::DbPool;

pub struct SqlxPluginStore {
    pub pool: DbPool,
}

impl SqlxPluginStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn rows_error(err: sqlx::Error) -> PluginRowsError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return PluginRowsError::Duplicate;
        }
    }
    PluginRowsError::Storage(anyhow::Error::new(err))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, PluginRowsError> {
    serde_json::to_string(value).map_err(|e| PluginRowsError::Storage(e.into()))
}

fn parse_json(raw: Option<String>) -> anyhow::Result<JsonValue> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
        _ => Ok(JsonValue::Null),
    }
}

#[async_trait]
impl PluginStore for SqlxPluginStore {
    async fn find_installed(
        &self,
        user_id: &str,
        plugin_slug: &str,
    ) -> anyhow::Result<Option<InstalledPlugin>> {
        let row = sqlx::query(
            r#"SELECT id, name, version, enabled, created_at, updated_at, plugin_slug
               FROM plugin
               WHERE user_id = ? AND plugin_slug = ?"#,
        )
        .bind(user_id)
        .bind(plugin_slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| InstalledPlugin {
            id: r.get("id"),
            name: r.get("name"),
            version: r.get("version"),
            enabled: r.get("enabled"),
            plugin_slug: r.get("plugin_slug"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn insert_with_modules(
        &self,
        plugin: &PluginRow,
        modules: &[ModuleRow],
    ) -> Result<(), PluginRowsError> {
        let mut tx = self.pool.begin().await.map_err(rows_error)?;

        sqlx::query(
            r#"INSERT INTO plugin
               (id, name, description, version, type, enabled, icon, category, status,
                official, author, last_updated, compatibility, downloads, scope,
                bundle_method, bundle_location, is_local, long_description,
                config_fields, messages, dependencies, created_at, updated_at, user_id,
                plugin_slug, source_type, source_url, update_check_url, last_update_check,
                update_available, latest_version, installation_type, permissions)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                       ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&plugin.id)
        .bind(&plugin.name)
        .bind(&plugin.description)
        .bind(&plugin.version)
        .bind(&plugin.plugin_type)
        .bind(plugin.enabled)
        .bind(&plugin.icon)
        .bind(&plugin.category)
        .bind(&plugin.status)
        .bind(plugin.official)
        .bind(&plugin.author)
        .bind(plugin.updated_at)
        .bind(&plugin.compatibility)
        .bind(plugin.downloads)
        .bind(&plugin.scope)
        .bind(&plugin.bundle_method)
        .bind(&plugin.bundle_location)
        .bind(plugin.is_local)
        .bind(&plugin.long_description)
        .bind(to_json(&plugin.config_fields)?)
        .bind(Option::<String>::None)
        .bind(Option::<String>::None)
        .bind(plugin.created_at)
        .bind(plugin.updated_at)
        .bind(&plugin.user_id)
        .bind(&plugin.plugin_slug)
        .bind(&plugin.source_type)
        .bind(&plugin.source_url)
        .bind(&plugin.update_check_url)
        .bind(plugin.last_update_check)
        .bind(plugin.update_available)
        .bind(&plugin.latest_version)
        .bind(&plugin.installation_type)
        .bind(to_json(&plugin.permissions)?)
        .execute(&mut *tx)
        .await
        .map_err(rows_error)?;

        for row in modules {
            let m = &row.module;
            sqlx::query(
                r#"INSERT INTO module
                   (id, plugin_id, name, display_name, description, icon, category,
                    enabled, priority, props, config_fields, messages, required_services,
                    dependencies, layout, tags, created_at, updated_at, user_id)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&row.id)
            .bind(&row.plugin_id)
            .bind(&m.name)
            .bind(&m.display_name)
            .bind(&m.description)
            .bind(&m.icon)
            .bind(&m.category)
            .bind(row.enabled)
            .bind(m.priority)
            .bind(to_json(&m.props)?)
            .bind(to_json(&m.config_fields)?)
            .bind(to_json(&m.messages)?)
            .bind(to_json(&m.required_services)?)
            .bind(to_json(&m.dependencies)?)
            .bind(to_json(&m.layout)?)
            .bind(to_json(&m.tags)?)
            .bind(row.created_at)
            .bind(row.updated_at)
            .bind(&row.user_id)
            .execute(&mut *tx)
            .await
            .map_err(rows_error)?;
        }

        tx.commit().await.map_err(rows_error)?;
        Ok(())
    }

    async fn delete_with_modules(
        &self,
        user_id: &str,
        plugin_id: &str,
    ) -> Result<u64, PluginRowsError> {
        let mut tx = self.pool.begin().await.map_err(rows_error)?;

        let deleted_modules = sqlx::query("DELETE FROM module WHERE plugin_id = ? AND user_id = ?")
            .bind(plugin_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(rows_error)?
            .rows_affected();

        let deleted_plugins = sqlx::query("DELETE FROM plugin WHERE id = ? AND user_id = ?")
            .bind(plugin_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(rows_error)?
            .rows_affected();

        if deleted_plugins == 0 {
            tx.rollback().await.map_err(rows_error)?;
            return Err(PluginRowsError::NotFound);
        }

        tx.commit().await.map_err(rows_error)?;
        Ok(deleted_modules)
    }

    async fn find_module_id(
        &self,
        user_id: &str,
        plugin_id: &str,
        module_name: &str,
    ) -> anyhow::Result<Option<String>> {
        let id = sqlx::query_scalar::<_, String>(
            "SELECT id FROM module WHERE user_id = ? AND plugin_id = ? AND name = ?",
        )
        .bind(user_id)
        .bind(plugin_id)
        .bind(module_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn list_users(&self, plugin_slug: &str, version: &str) -> anyhow::Result<Vec<String>> {
        let users = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM plugin WHERE plugin_slug = ? AND version = ? ORDER BY user_id",
        )
        .bind(plugin_slug)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn load_settings(
        &self,
        user_id: &str,
        plugin_id: &str,
    ) -> anyhow::Result<Option<StoredSettings>> {
        let Some(row) = sqlx::query(
            "SELECT config_fields, enabled, status FROM plugin WHERE id = ? AND user_id = ?",
        )
        .bind(plugin_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let plugin = PluginSettings {
            config_fields: parse_json(row.get("config_fields"))?,
            enabled: row.get("enabled"),
            status: row
                .get::<Option<String>, _>("status")
                .unwrap_or_default(),
        };

        let rows = sqlx::query(
            r#"SELECT name, config_fields, enabled, priority
               FROM module
               WHERE plugin_id = ? AND user_id = ?
               ORDER BY priority, name"#,
        )
        .bind(plugin_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut modules = Vec::with_capacity(rows.len());
        for r in rows {
            modules.push(ModuleSettings {
                name: r.get("name"),
                config_fields: parse_json(r.get("config_fields"))?,
                enabled: r.get("enabled"),
                priority: r.get("priority"),
            });
        }

        Ok(Some(StoredSettings { plugin, modules }))
    }

    async fn apply_settings(
        &self,
        user_id: &str,
        plugin_id: &str,
        settings: &StoredSettings,
    ) -> Result<SettingsApplied, PluginRowsError> {
        let now = chrono::Utc::now();
        let mut tx = self.pool.begin().await.map_err(rows_error)?;

        let updated = sqlx::query(
            r#"UPDATE plugin SET config_fields = ?, enabled = ?, status = ?, updated_at = ?
               WHERE id = ? AND user_id = ?"#,
        )
        .bind(to_json(&settings.plugin.config_fields)?)
        .bind(settings.plugin.enabled)
        .bind(&settings.plugin.status)
        .bind(now)
        .bind(plugin_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(rows_error)?
        .rows_affected();
        if updated == 0 {
            tx.rollback().await.map_err(rows_error)?;
            return Err(PluginRowsError::NotFound);
        }

        let mut applied = SettingsApplied::default();
        for module in &settings.modules {
            let res = sqlx::query(
                r#"UPDATE module SET config_fields = ?, enabled = ?, priority = ?, updated_at = ?
                   WHERE plugin_id = ? AND user_id = ? AND name = ?"#,
            )
            .bind(to_json(&module.config_fields)?)
            .bind(module.enabled)
            .bind(module.priority)
            .bind(now)
            .bind(plugin_id)
            .bind(user_id)
            .bind(&module.name)
            .execute(&mut *tx)
            .await
            .map_err(rows_error)?;
            if res.rows_affected() > 0 {
                applied.modules_updated.push(module.name.clone());
            } else {
                applied.modules_skipped.push(module.name.clone());
            }
        }

        tx.commit().await.map_err(rows_error)?;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plugins::catalog;
    use crate::infrastructure::db::memory_pool;

    fn rows_for(user_id: &str) -> (PluginRow, Vec<ModuleRow>) {
        let def = catalog::notes_panel();
        let now = chrono::Utc::now();
        let plugin = PluginRow::for_user(&def.plugin, user_id, now);
        let modules = def
            .modules
            .iter()
            .map(|m| ModuleRow::for_user(def.slug(), m, user_id, now))
            .collect();
        (plugin, modules)
    }

    async fn module_count(pool: &DbPool, user_id: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM module WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_then_find_installed() {
        let pool = memory_pool().await;
        let store = SqlxPluginStore::new(pool.clone());
        let (plugin, modules) = rows_for("u1");

        store.insert_with_modules(&plugin, &modules).await.unwrap();

        let found = store.find_installed("u1", "NotesPanel").await.unwrap().unwrap();
        assert_eq!(found.id, "u1_NotesPanel");
        assert_eq!(found.version, "1.2.0");
        assert!(found.enabled);
        assert_eq!(module_count(&pool, "u1").await, 2);
        assert!(store.find_installed("u2", "NotesPanel").await.unwrap().is_none());
        assert_eq!(
            store
                .find_module_id("u1", "u1_NotesPanel", "NotesSearch")
                .await
                .unwrap()
                .as_deref(),
            Some("u1_NotesPanel_NotesSearch")
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_reported_and_rolled_back() {
        let pool = memory_pool().await;
        let store = SqlxPluginStore::new(pool.clone());
        let (plugin, modules) = rows_for("u1");
        store.insert_with_modules(&plugin, &modules).await.unwrap();

        let err = store
            .insert_with_modules(&plugin, &modules)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginRowsError::Duplicate));
        assert_eq!(module_count(&pool, "u1").await, 2);
    }

    #[tokio::test]
    async fn delete_removes_unit_and_reports_missing_plugin() {
        let pool = memory_pool().await;
        let store = SqlxPluginStore::new(pool.clone());
        let (plugin, modules) = rows_for("u1");
        store.insert_with_modules(&plugin, &modules).await.unwrap();

        let deleted = store.delete_with_modules("u1", "u1_NotesPanel").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(module_count(&pool, "u1").await, 0);

        let err = store
            .delete_with_modules("u1", "u1_NotesPanel")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginRowsError::NotFound));
    }

    #[tokio::test]
    async fn settings_round_trip_and_skip_unknown_modules() {
        let pool = memory_pool().await;
        let store = SqlxPluginStore::new(pool);
        let (plugin, modules) = rows_for("u1");
        store.insert_with_modules(&plugin, &modules).await.unwrap();

        let mut settings = store
            .load_settings("u1", "u1_NotesPanel")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settings.plugin.status, "activated");
        assert_eq!(settings.modules.len(), 2);

        settings.plugin.enabled = false;
        settings.modules[0].priority = 9;
        settings.modules.push(ModuleSettings {
            name: "Retired".into(),
            config_fields: JsonValue::Null,
            enabled: true,
            priority: 0,
        });
        let applied = store
            .apply_settings("u1", "u1_NotesPanel", &settings)
            .await
            .unwrap();
        assert_eq!(applied.modules_updated.len(), 2);
        assert_eq!(applied.modules_skipped, vec!["Retired".to_string()]);

        let reloaded = store
            .load_settings("u1", "u1_NotesPanel")
            .await
            .unwrap()
            .unwrap();
        assert!(!reloaded.plugin.enabled);
        assert!(reloaded.modules.iter().any(|m| m.priority == 9));
    }

    #[tokio::test]
    async fn list_users_returns_owners_of_version() {
        let pool = memory_pool().await;
        let store = SqlxPluginStore::new(pool);
        for user in ["b", "a"] {
            let (plugin, modules) = rows_for(user);
            store.insert_with_modules(&plugin, &modules).await.unwrap();
        }
        assert_eq!(
            store.list_users("NotesPanel", "1.2.0").await.unwrap(),
            vec!["a", "b"]
        );
        assert!(store.list_users("NotesPanel", "1.1.0").await.unwrap().is_empty());
        assert!(store.list_users("Other", "1.2.0").await.unwrap().is_empty());
    }
}
