use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::MatchedPath;
use dotenvy::dotenv;
use http::HeaderValue;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use plugin_lifecycle::application::services::lifecycle::registry::LifecycleRegistry;
use plugin_lifecycle::application::services::lifecycle::{LifecycleOptions, LifecyclePorts};
use plugin_lifecycle::bootstrap::app_context::{AppContext, AppServices};
use plugin_lifecycle::bootstrap::config::Config;
use plugin_lifecycle::domain::plugins::catalog;
use plugin_lifecycle::infrastructure::bundles::filesystem_store::FilesystemBundleStore;
use plugin_lifecycle::infrastructure::db::repositories::page_repository_sqlx::SqlxPageRepository;
use plugin_lifecycle::infrastructure::db::repositories::plugin_store_sqlx::SqlxPluginStore;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
        paths(
            plugin_lifecycle::presentation::http::plugins::list_plugins,
            plugin_lifecycle::presentation::http::plugins::validate_plugin,
            plugin_lifecycle::presentation::http::plugins::install_plugin,
            plugin_lifecycle::presentation::http::plugins::uninstall_plugin,
            plugin_lifecycle::presentation::http::plugins::plugin_status,
            plugin_lifecycle::presentation::http::plugins::update_plugin,
            plugin_lifecycle::presentation::http::plugins::export_user_data,
            plugin_lifecycle::presentation::http::plugins::import_user_data,
            plugin_lifecycle::presentation::http::health::health,
        ),
        components(schemas(
            plugin_lifecycle::presentation::http::plugins::PluginSummary,
            plugin_lifecycle::presentation::http::plugins::ValidationResponse,
            plugin_lifecycle::presentation::http::plugins::PageResponse,
            plugin_lifecycle::presentation::http::plugins::InstallResponse,
            plugin_lifecycle::presentation::http::plugins::UninstallResponse,
            plugin_lifecycle::presentation::http::plugins::InstalledPluginResponse,
            plugin_lifecycle::presentation::http::plugins::BundleHealthResponse,
            plugin_lifecycle::presentation::http::plugins::StatusResponse,
            plugin_lifecycle::presentation::http::plugins::UpdateBody,
            plugin_lifecycle::presentation::http::plugins::UpdateResponse,
            plugin_lifecycle::presentation::http::plugins::UserDataBody,
            plugin_lifecycle::presentation::http::plugins::ImportResponse,
            plugin_lifecycle::presentation::http::health::HealthResp,
        )),
        tags(
            (name = "Plugins", description = "Plugin lifecycle management"),
            (name = "Health", description = "System health checks")
        )
    )]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "plugin_lifecycle=debug,axum=info,tower_http=info".into()),
        )
        .init();

    let cfg = Config::from_env()?;
    info!(?cfg, "Starting plugin lifecycle service");

    // Database
    let pool = plugin_lifecycle::infrastructure::db::connect_pool(
        &cfg.database_url,
        cfg.database_max_connections,
    )
    .await?;
    plugin_lifecycle::infrastructure::db::migrate(&pool).await?;

    if let Some(root) = &cfg.plugins_dir {
        if let Err(e) = tokio::fs::create_dir_all(root.join("shared")).await {
            tracing::warn!(error = ?e, dir = %root.display(), "plugin_storage_root_unavailable");
        }
    }

    let ports = LifecyclePorts {
        store: Arc::new(SqlxPluginStore::new(pool.clone())),
        pages: Arc::new(SqlxPageRepository::new(pool.clone())),
        bundles: Arc::new(FilesystemBundleStore::new()),
    };
    let definitions = catalog::load(cfg.plugin_catalog.as_deref())?;
    let registry = LifecycleRegistry::from_definitions(
        definitions,
        cfg.plugins_dir.as_deref(),
        &cfg.plugin_sources_dir,
        ports,
        LifecycleOptions {
            verify_after_install: cfg.verify_after_install,
        },
    )?;
    registry.rebuild_all().await?;
    for manager in registry.managers() {
        info!(
            instance = %manager.instance_id(),
            shared_path = %manager.shared_path().display(),
            "plugin_registered"
        );
    }

    let ctx = AppContext::new(cfg.clone(), AppServices::new(Arc::new(registry)));

    let methods = [
        http::Method::GET,
        http::Method::POST,
        http::Method::DELETE,
        http::Method::OPTIONS,
    ];
    let cors = match cfg.frontend_url.as_deref().map(HeaderValue::from_str) {
        Some(Ok(origin)) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(methods)
            .allow_headers([http::header::CONTENT_TYPE]),
        _ if cfg.is_production => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(HeaderValue::from_static("http://invalid")))
            .allow_methods(methods)
            .allow_headers([http::header::CONTENT_TYPE]),
        // Development convenience
        _ => CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(methods)
            .allow_headers([http::header::CONTENT_TYPE]),
    };

    let app = Router::new()
        .nest(
            "/api",
            plugin_lifecycle::presentation::http::health::routes(pool.clone()),
        )
        .nest(
            "/api",
            plugin_lifecycle::presentation::http::plugins::routes(ctx.clone()),
        )
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &http::Request<_>| {
                let method = req.method().clone();
                let uri = req.uri().clone();
                let matched = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default();
                tracing::info_span!("http", %method, %uri, matched_path = %matched)
            }),
        );

    let api_addr = SocketAddr::from(([0, 0, 0, 0], cfg.api_port));
    info!(%api_addr, "HTTP API listening");
    let listener = tokio::net::TcpListener::bind(api_addr).await?;

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(?e, "API server failed");
        return Err(e.into());
    }
    pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(?e, "failed to listen for shutdown signal");
    }
    info!("shutdown_requested");
}
