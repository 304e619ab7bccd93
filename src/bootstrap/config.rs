use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_port: u16,
    pub frontend_url: Option<String>,
    pub database_url: String,
    pub database_max_connections: u32,
    /// Storage root for shared bundles; bundles are served from their sources when unset.
    pub plugins_dir: Option<PathBuf>,
    pub plugin_sources_dir: PathBuf,
    pub plugin_catalog: Option<PathBuf>,
    pub verify_after_install: bool,
    pub is_production: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_port = non_empty("API_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(8890);
        let frontend_url = non_empty("FRONTEND_URL");
        let database_url =
            non_empty("DATABASE_URL").unwrap_or_else(|| "sqlite://plugin_lifecycle.db".into());
        let database_max_connections = non_empty("DATABASE_MAX_CONNECTIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        let plugins_dir = non_empty("PLUGINS_DIR").map(PathBuf::from);
        let plugin_sources_dir = non_empty("PLUGIN_SOURCES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./plugin-sources"));
        let plugin_catalog = non_empty("PLUGIN_CATALOG").map(PathBuf::from);
        let verify_after_install = non_empty("VERIFY_AFTER_INSTALL")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);
        let is_production = matches!(
            lookup("RUST_ENV").as_deref(),
            Some("production") | Some("prod")
        );

        // Serving bundles out of the source tree is for local development only
        if is_production && plugins_dir.is_none() {
            anyhow::bail!("PLUGINS_DIR must be set in production");
        }

        Ok(Self {
            api_port,
            frontend_url,
            database_url,
            database_max_connections,
            plugins_dir,
            plugin_sources_dir,
            plugin_catalog,
            verify_after_install,
            is_production,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.api_port, 8890);
        assert_eq!(cfg.database_url, "sqlite://plugin_lifecycle.db");
        assert_eq!(cfg.database_max_connections, 5);
        assert!(cfg.plugins_dir.is_none());
        assert_eq!(cfg.plugin_sources_dir, PathBuf::from("./plugin-sources"));
        assert!(cfg.verify_after_install);
        assert!(!cfg.is_production);
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("API_PORT", "9000"),
            ("PLUGINS_DIR", "/var/lib/plugins"),
            ("VERIFY_AFTER_INSTALL", "false"),
            ("PLUGIN_CATALOG", " "),
        ])
        .unwrap();
        assert_eq!(cfg.api_port, 9000);
        assert_eq!(cfg.plugins_dir, Some(PathBuf::from("/var/lib/plugins")));
        assert!(!cfg.verify_after_install);
        assert!(cfg.plugin_catalog.is_none());
    }

    #[test]
    fn production_requires_storage_root() {
        assert!(config(&[("RUST_ENV", "production")]).is_err());
        let cfg = config(&[("RUST_ENV", "prod"), ("PLUGINS_DIR", "/srv/plugins")]).unwrap();
        assert!(cfg.is_production);
    }
}
