use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::application::ports::bundle_store::BundleCopyError;
use crate::application::ports::plugin_store::{ModuleSettings, PluginSettings};
use crate::application::services::lifecycle::PluginLifecycleManager;
use crate::application::services::lifecycle::registry::{ResolveManagerError, UserManager};
use crate::application::use_cases::plugins::install::{InstallOutcome, InstallPluginError};
use crate::application::use_cases::plugins::status::{PluginStatus, PluginStatusReport};
use crate::application::use_cases::plugins::uninstall::UninstallPluginError;
use crate::application::use_cases::plugins::update::UpdatePluginError;
use crate::application::use_cases::plugins::user_data::{UserDataError, UserDataSnapshot};
use crate::bootstrap::app_context::AppContext;

pub fn routes(ctx: AppContext) -> Router {
    Router::new()
        .route("/plugins", get(list_plugins))
        .route("/plugins/:slug/validate", post(validate_plugin))
        .route("/users/:user_id/plugins/:slug/install", post(install_plugin))
        .route("/users/:user_id/plugins/:slug", delete(uninstall_plugin))
        .route("/users/:user_id/plugins/:slug/status", get(plugin_status))
        .route("/users/:user_id/plugins/:slug/update", post(update_plugin))
        .route("/users/:user_id/plugins/:slug/export", get(export_user_data))
        .route("/users/:user_id/plugins/:slug/import", post(import_user_data))
        .with_state(ctx)
}

/// JSON error body: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(err: &(dyn std::error::Error + 'static)) -> Self {
        tracing::error!(error = ?err, "plugin_request_failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<InstallPluginError> for ApiError {
    fn from(err: InstallPluginError) -> Self {
        match &err {
            InstallPluginError::AlreadyInstalled { .. } | InstallPluginError::IdConflict { .. } => {
                Self::new(StatusCode::CONFLICT, err.to_string())
            }
            InstallPluginError::Bundle(BundleCopyError::MissingSource(_)) => {
                Self::not_found("plugin bundle source not found")
            }
            _ => Self::internal(&err),
        }
    }
}

impl From<UninstallPluginError> for ApiError {
    fn from(err: UninstallPluginError) -> Self {
        match &err {
            UninstallPluginError::NotInstalled | UninstallPluginError::PluginNotFound => {
                Self::not_found(err.to_string())
            }
            _ => Self::internal(&err),
        }
    }
}

impl From<UserDataError> for ApiError {
    fn from(err: UserDataError) -> Self {
        match &err {
            UserDataError::NotInstalled => Self::not_found(err.to_string()),
            UserDataError::SlugMismatch { .. } => Self::bad_request(err.to_string()),
            UserDataError::Storage(_) => Self::internal(&err),
        }
    }
}

impl From<UpdatePluginError> for ApiError {
    fn from(err: UpdatePluginError) -> Self {
        match err {
            UpdatePluginError::SlugMismatch { .. } | UpdatePluginError::NotNewer { .. } => {
                Self::bad_request(err.to_string())
            }
            UpdatePluginError::Export(inner) => inner.into(),
            UpdatePluginError::Uninstall(inner) => inner.into(),
            UpdatePluginError::Install(inner) => inner.into(),
            UpdatePluginError::Import(_) => Self::internal(&err),
        }
    }
}

impl From<ResolveManagerError> for ApiError {
    fn from(err: ResolveManagerError) -> Self {
        match &err {
            ResolveManagerError::UnknownPlugin(_) => Self::not_found(err.to_string()),
            ResolveManagerError::UnregisteredVersion { .. } => {
                Self::new(StatusCode::CONFLICT, err.to_string())
            }
            ResolveManagerError::Lookup(_) => Self::internal(&err),
        }
    }
}

fn manager(ctx: &AppContext, slug: &str) -> Result<Arc<PluginLifecycleManager>, ApiError> {
    ctx.plugin_manager(slug)
        .ok_or_else(|| ApiError::not_found(format!("unknown plugin {slug}")))
}

/// Manager for the version the user has installed; the newest one otherwise.
async fn user_manager(ctx: &AppContext, slug: &str, user_id: &str) -> Result<UserManager, ApiError> {
    check_user_id(user_id)?;
    Ok(ctx.registry().for_user(slug, user_id).await?)
}

fn check_user_id(user_id: &str) -> Result<(), ApiError> {
    if user_id.trim().is_empty() || user_id.len() > 128 {
        return Err(ApiError::bad_request("invalid user id"));
    }
    Ok(())
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PluginSummary {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub category: String,
    pub modules: Vec<String>,
    pub creates_page: bool,
    pub active_users: usize,
}

#[utoipa::path(
    get,
    path = "/api/plugins",
    responses((status = 200, body = [PluginSummary])),
    tag = "Plugins"
)]
pub async fn list_plugins(State(ctx): State<AppContext>) -> Json<Vec<PluginSummary>> {
    let registry = ctx.registry();
    let mut items = Vec::new();
    for m in registry.managers() {
        let plugin = m.plugin();
        items.push(PluginSummary {
            slug: plugin.slug.clone(),
            name: plugin.name.clone(),
            version: plugin.version.clone(),
            description: plugin.description.clone(),
            category: plugin.category.clone(),
            modules: m.modules().iter().map(|d| d.name.clone()).collect(),
            creates_page: m.definition().page.is_some(),
            active_users: m.active_users().await.len(),
        });
    }
    Json(items)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/plugins/{slug}/validate",
    params(("slug" = String, Path, description = "Plugin slug")),
    responses((status = 200, body = ValidationResponse)),
    tag = "Plugins"
)]
pub async fn validate_plugin(
    State(ctx): State<AppContext>,
    Path(slug): Path<String>,
) -> Result<Json<ValidationResponse>, ApiError> {
    let manager = manager(&ctx, &slug)?;
    let report = manager.validate_installation(None).await;
    Ok(Json(ValidationResponse {
        valid: report.valid,
        error: report.error,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PageResponse {
    pub page_id: String,
    pub created: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InstallResponse {
    pub plugin_id: String,
    pub plugin_slug: String,
    pub plugin_name: String,
    pub modules_created: Vec<String>,
    pub files_copied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageResponse>,
}

impl From<InstallOutcome> for InstallResponse {
    fn from(value: InstallOutcome) -> Self {
        Self {
            plugin_id: value.plugin_id,
            plugin_slug: value.plugin_slug,
            plugin_name: value.plugin_name,
            modules_created: value.modules_created,
            files_copied: value.files_copied,
            page: value.page.map(|p| PageResponse {
                page_id: p.page_id,
                created: p.created,
            }),
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/plugins/{slug}/install",
    params(
        ("user_id" = String, Path, description = "User ID"),
        ("slug" = String, Path, description = "Plugin slug")
    ),
    responses(
        (status = 200, body = InstallResponse),
        (status = 404, description = "Unknown plugin"),
        (status = 409, description = "Already installed")
    ),
    tag = "Plugins",
    operation_id = "pluginsInstall"
)]
pub async fn install_plugin(
    State(ctx): State<AppContext>,
    Path((user_id, slug)): Path<(String, String)>,
) -> Result<Json<InstallResponse>, ApiError> {
    check_user_id(&user_id)?;
    let manager = manager(&ctx, &slug)?;
    let outcome = manager.install(&user_id).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UninstallResponse {
    pub plugin_id: String,
    pub deleted_modules: u64,
    pub page_deleted: bool,
}

#[utoipa::path(
    delete,
    path = "/api/users/{user_id}/plugins/{slug}",
    params(
        ("user_id" = String, Path, description = "User ID"),
        ("slug" = String, Path, description = "Plugin slug")
    ),
    responses(
        (status = 200, body = UninstallResponse),
        (status = 404, description = "Not installed")
    ),
    tag = "Plugins",
    operation_id = "pluginsUninstall"
)]
pub async fn uninstall_plugin(
    State(ctx): State<AppContext>,
    Path((user_id, slug)): Path<(String, String)>,
) -> Result<Json<UninstallResponse>, ApiError> {
    let UserManager { manager, .. } = user_manager(&ctx, &slug, &user_id).await?;
    let outcome = manager.uninstall(&user_id).await?;
    Ok(Json(UninstallResponse {
        plugin_id: outcome.plugin_id,
        deleted_modules: outcome.deleted_modules,
        page_deleted: outcome.page_deleted,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InstalledPluginResponse {
    pub id: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BundleHealthResponse {
    pub bundle_exists: bool,
    pub bundle_size: u64,
    pub metadata_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// `not_installed`, `healthy` or `unhealthy`
    pub status: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<InstalledPluginResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<BundleHealthResponse>,
}

impl From<PluginStatusReport> for StatusResponse {
    fn from(report: PluginStatusReport) -> Self {
        let status = match report.status {
            PluginStatus::NotInstalled => "not_installed",
            PluginStatus::Healthy => "healthy",
            PluginStatus::Unhealthy => "unhealthy",
        };
        Self {
            status: status.to_string(),
            exists: report.exists(),
            plugin: report.plugin.map(|p| InstalledPluginResponse {
                id: p.id,
                name: p.name,
                version: p.version,
                enabled: p.enabled,
                created_at: p.created_at,
                updated_at: p.updated_at,
            }),
            health: report.health.map(|h| BundleHealthResponse {
                bundle_exists: h.bundle_exists,
                bundle_size: h.bundle_size,
                metadata_valid: h.metadata_valid,
                error: h.error,
            }),
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/plugins/{slug}/status",
    params(
        ("user_id" = String, Path, description = "User ID"),
        ("slug" = String, Path, description = "Plugin slug")
    ),
    responses((status = 200, body = StatusResponse)),
    tag = "Plugins"
)]
pub async fn plugin_status(
    State(ctx): State<AppContext>,
    Path((user_id, slug)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let UserManager { manager, .. } = user_manager(&ctx, &slug, &user_id).await?;
    let report = manager
        .status(&user_id)
        .await
        .map_err(|err| ApiError::internal(&*err))?;
    Ok(Json(report.into()))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateBody {
    /// Target version; the newest registered version when omitted.
    pub version: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateResponse {
    pub plugin_id: String,
    pub from_version: String,
    pub to_version: String,
    pub files_copied: usize,
    pub modules_restored: Vec<String>,
    pub modules_skipped: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/plugins/{slug}/update",
    params(
        ("user_id" = String, Path, description = "User ID"),
        ("slug" = String, Path, description = "Plugin slug")
    ),
    request_body = UpdateBody,
    responses(
        (status = 200, body = UpdateResponse),
        (status = 400, description = "Target version is not newer"),
        (status = 404, description = "Unknown plugin, version or installation"),
        (status = 409, description = "Installed version is not registered")
    ),
    tag = "Plugins",
    operation_id = "pluginsUpdate"
)]
pub async fn update_plugin(
    State(ctx): State<AppContext>,
    Path((user_id, slug)): Path<(String, String)>,
    Json(body): Json<UpdateBody>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let UserManager {
        manager: current,
        installed,
    } = user_manager(&ctx, &slug, &user_id).await?;
    if installed.is_none() {
        return Err(ApiError::not_found("plugin not installed"));
    }
    let next = match body.version.as_deref() {
        Some(version) => ctx
            .registry()
            .version(&slug, version)
            .ok_or_else(|| ApiError::not_found(format!("unknown version {version} of {slug}")))?,
        None => manager(&ctx, &slug)?,
    };

    let outcome = current.update(&user_id, &next).await?;
    Ok(Json(UpdateResponse {
        plugin_id: outcome.install.plugin_id,
        from_version: outcome.from_version,
        to_version: outcome.to_version,
        files_copied: outcome.install.files_copied,
        modules_restored: outcome.modules_restored,
        modules_skipped: outcome.modules_skipped,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserDataBody {
    pub plugin_slug: String,
    pub version: String,
    pub exported_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub plugin: PluginSettings,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub modules: Vec<ModuleSettings>,
}

impl From<UserDataSnapshot> for UserDataBody {
    fn from(s: UserDataSnapshot) -> Self {
        Self {
            plugin_slug: s.plugin_slug,
            version: s.version,
            exported_at: s.exported_at,
            plugin: s.plugin,
            modules: s.modules,
        }
    }
}

impl From<UserDataBody> for UserDataSnapshot {
    fn from(b: UserDataBody) -> Self {
        Self {
            plugin_slug: b.plugin_slug,
            version: b.version,
            exported_at: b.exported_at,
            plugin: b.plugin,
            modules: b.modules,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/plugins/{slug}/export",
    params(
        ("user_id" = String, Path, description = "User ID"),
        ("slug" = String, Path, description = "Plugin slug")
    ),
    responses((status = 200, body = UserDataBody), (status = 404, description = "Not installed")),
    tag = "Plugins"
)]
pub async fn export_user_data(
    State(ctx): State<AppContext>,
    Path((user_id, slug)): Path<(String, String)>,
) -> Result<Json<UserDataBody>, ApiError> {
    let UserManager { manager, .. } = user_manager(&ctx, &slug, &user_id).await?;
    let snapshot = manager.export_user_data(&user_id).await?;
    Ok(Json(snapshot.into()))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImportResponse {
    pub plugin_id: String,
    pub modules_restored: Vec<String>,
    pub modules_skipped: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/plugins/{slug}/import",
    params(
        ("user_id" = String, Path, description = "User ID"),
        ("slug" = String, Path, description = "Plugin slug")
    ),
    request_body = UserDataBody,
    responses(
        (status = 200, body = ImportResponse),
        (status = 400, description = "Snapshot for another plugin"),
        (status = 404, description = "Not installed")
    ),
    tag = "Plugins"
)]
pub async fn import_user_data(
    State(ctx): State<AppContext>,
    Path((user_id, slug)): Path<(String, String)>,
    Json(body): Json<UserDataBody>,
) -> Result<Json<ImportResponse>, ApiError> {
    let UserManager { manager, .. } = user_manager(&ctx, &slug, &user_id).await?;
    let outcome = manager
        .import_user_data(&user_id, &UserDataSnapshot::from(body))
        .await?;
    Ok(Json(ImportResponse {
        plugin_id: outcome.plugin_id,
        modules_restored: outcome.modules_restored,
        modules_skipped: outcome.modules_skipped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::lifecycle::registry::LifecycleRegistry;
    use crate::application::services::lifecycle::{LifecycleOptions, LifecyclePorts};
    use crate::bootstrap::app_context::AppServices;
    use crate::bootstrap::config::Config;
    use crate::domain::plugins::catalog;
    use crate::domain::plugins::definition::PluginDefinition;
    use crate::infrastructure::bundles::filesystem_store::FilesystemBundleStore;
    use crate::infrastructure::db::memory_pool;
    use crate::infrastructure::db::repositories::page_repository_sqlx::SqlxPageRepository;
    use crate::infrastructure::db::repositories::plugin_store_sqlx::SqlxPluginStore;
    use tempfile::TempDir;

    async fn context(tmp: &TempDir) -> AppContext {
        context_with(tmp, catalog::builtin()).await
    }

    async fn context_with(tmp: &TempDir, definitions: Vec<PluginDefinition>) -> AppContext {
        let sources = tmp.path().join("sources");
        let root = tmp.path().join("plugins");
        for def in &definitions {
            let dir = sources.join(def.slug()).join(def.version());
            std::fs::create_dir_all(dir.join("dist")).unwrap();
            std::fs::write(
                dir.join("package.json"),
                format!(r#"{{"name":"{}","version":"{}"}}"#, def.slug(), def.version()),
            )
            .unwrap();
            std::fs::write(dir.join("dist/remoteEntry.js"), "export {};").unwrap();
        }
        let pool = memory_pool().await;
        let ports = LifecyclePorts {
            store: Arc::new(SqlxPluginStore::new(pool.clone())),
            pages: Arc::new(SqlxPageRepository::new(pool)),
            bundles: Arc::new(FilesystemBundleStore::new()),
        };
        let registry = LifecycleRegistry::from_definitions(
            definitions,
            Some(&root),
            &sources,
            ports,
            LifecycleOptions::default(),
        )
        .unwrap();
        let cfg = Config::from_lookup(|_| None).unwrap();
        AppContext::new(cfg, AppServices::new(Arc::new(registry)))
    }

    fn path(user: &str, slug: &str) -> Path<(String, String)> {
        Path((user.to_string(), slug.to_string()))
    }

    #[tokio::test]
    async fn install_conflict_and_uninstall_map_to_status_codes() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp).await;

        let Json(installed) = install_plugin(State(ctx.clone()), path("u1", "ModelEvaluator"))
            .await
            .unwrap();
        assert_eq!(installed.plugin_id, "u1_ModelEvaluator");
        assert!(installed.page.unwrap().created);

        let err = install_plugin(State(ctx.clone()), path("u1", "ModelEvaluator"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let Json(status) = plugin_status(State(ctx.clone()), path("u1", "ModelEvaluator"))
            .await
            .unwrap();
        assert_eq!(status.status, "healthy");

        let Json(removed) = uninstall_plugin(State(ctx.clone()), path("u1", "ModelEvaluator"))
            .await
            .unwrap();
        assert!(removed.page_deleted);

        let err = uninstall_plugin(State(ctx), path("u1", "ModelEvaluator"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn per_user_requests_use_the_installed_version() {
        let tmp = TempDir::new().unwrap();
        let mut next = catalog::model_evaluator();
        next.plugin.version = "1.1.0".into();
        next.page = None;
        let ctx = context_with(&tmp, vec![catalog::model_evaluator(), next]).await;
        let registry = ctx.registry();
        let v1 = registry.version("ModelEvaluator", "1.0.0").unwrap();
        v1.install("u1").await.unwrap();

        let Json(status) = plugin_status(State(ctx.clone()), path("u1", "ModelEvaluator"))
            .await
            .unwrap();
        assert_eq!(status.status, "healthy");
        assert_eq!(status.plugin.unwrap().version, "1.0.0");

        let Json(snapshot) = export_user_data(State(ctx.clone()), path("u1", "ModelEvaluator"))
            .await
            .unwrap();
        assert_eq!(snapshot.version, "1.0.0");

        let Json(removed) = uninstall_plugin(State(ctx.clone()), path("u1", "ModelEvaluator"))
            .await
            .unwrap();
        assert!(removed.page_deleted);
        assert!(v1.active_users().await.is_empty());

        let Json(status) = plugin_status(State(ctx), path("u1", "ModelEvaluator"))
            .await
            .unwrap();
        assert_eq!(status.status, "not_installed");
    }

    #[tokio::test]
    async fn unknown_plugin_and_bad_user_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp).await;

        let err = install_plugin(State(ctx.clone()), path("u1", "Nope"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = install_plugin(State(ctx), path(" ", "NotesPanel"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn export_import_and_update_via_handlers() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp).await;
        install_plugin(State(ctx.clone()), path("u1", "NotesPanel"))
            .await
            .unwrap();

        let Json(snapshot) = export_user_data(State(ctx.clone()), path("u1", "NotesPanel"))
            .await
            .unwrap();
        assert_eq!(snapshot.modules.len(), 2);

        let Json(imported) =
            import_user_data(State(ctx.clone()), path("u1", "NotesPanel"), Json(snapshot))
                .await
                .unwrap();
        assert_eq!(imported.modules_restored.len(), 2);

        let err = update_plugin(
            State(ctx.clone()),
            path("u1", "NotesPanel"),
            Json(UpdateBody::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let Json(listed) = list_plugins(State(ctx)).await;
        let notes = listed.iter().find(|p| p.slug == "NotesPanel").unwrap();
        assert_eq!(notes.active_users, 1);
        assert!(!notes.creates_page);
    }
}
