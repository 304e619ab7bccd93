use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use walkdir::WalkDir;

use crate::application::ports::bundle_store::{
    BundleCopyError, BundleHealth, BundleStaging, BundleStore, CopyReport, ValidationReport,
};
use crate::domain::plugins::bundle::{BundleSpec, CopyFilter};

/// Stages plugin bundles on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FilesystemBundleStore;

impl FilesystemBundleStore {
    pub fn new() -> Self {
        Self
    }

    fn same_dir(a: &Path, b: &Path) -> bool {
        match (a.canonicalize(), b.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Returns `Ok(false)` when the target exists and `update` is off.
    fn copy_file(source: &Path, dest: &Path, update: bool) -> std::io::Result<bool> {
        if dest.exists() {
            if !update {
                return Ok(false);
            }
            std::fs::remove_file(dest)?;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, dest)?;
        Ok(true)
    }

    fn copy_tree(
        source: &Path,
        target: &Path,
        filter: &CopyFilter,
        update: bool,
    ) -> Result<CopyReport, BundleCopyError> {
        if !source.is_dir() {
            return Err(BundleCopyError::MissingSource(source.to_path_buf()));
        }
        std::fs::create_dir_all(target).map_err(|e| BundleCopyError::Io(anyhow::anyhow!(e)))?;
        if Self::same_dir(source, target) {
            tracing::debug!(path = ?source, "plugin_bundle_copy_skipped_same_dir");
            return Ok(CopyReport::default());
        }

        let mut report = CopyReport::default();
        // Links are copied as the files they point to; loops and dangling links land in `failed`.
        let walker = WalkDir::new(source)
            .min_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| match entry.path().strip_prefix(source) {
                Ok(rel) => filter.allows(rel),
                Err(_) => false,
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(BundleCopyError::Io(anyhow::anyhow!(err)));
                }
                Err(err) => {
                    tracing::warn!(error = ?err, path = ?err.path(), "plugin_bundle_walk_failed");
                    if let Some(path) = err.path() {
                        let rel = path.strip_prefix(source).unwrap_or(path);
                        report.failed.push(rel.to_string_lossy().replace('\\', "/"));
                    }
                    continue;
                }
            };
            let Ok(rel) = entry.path().strip_prefix(source) else {
                continue;
            };
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            let dest = target.join(rel);

            if entry.file_type().is_dir() {
                if let Err(err) = std::fs::create_dir_all(&dest) {
                    tracing::warn!(error = ?err, path = rel_str.as_str(), "plugin_bundle_mkdir_failed");
                    report.failed.push(rel_str);
                }
                continue;
            }
            match Self::copy_file(entry.path(), &dest, update) {
                Ok(true) => report.copied.push(rel_str),
                Ok(false) => report.unchanged.push(rel_str),
                Err(err) => {
                    tracing::warn!(error = ?err, path = rel_str.as_str(), "plugin_bundle_copy_failed");
                    report.failed.push(rel_str);
                }
            }
        }

        if report.copied.is_empty() && report.unchanged.is_empty() && !report.failed.is_empty() {
            return Err(BundleCopyError::NothingCopied);
        }
        Ok(report)
    }

    async fn read_metadata(path: &Path) -> anyhow::Result<JsonValue> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl BundleStore for FilesystemBundleStore {
    async fn stage(&self, staging: BundleStaging<'_>) -> Result<CopyReport, BundleCopyError> {
        let source = staging.source.to_path_buf();
        let target = staging.target.to_path_buf();
        let filter = staging.filter.clone();
        let update = staging.update;
        let report = tokio::task::spawn_blocking(move || {
            FilesystemBundleStore::copy_tree(&source, &target, &filter, update)
        })
        .await
        .map_err(|e| BundleCopyError::Io(anyhow::anyhow!(e)))??;

        tracing::info!(
            target = ?staging.target,
            copied = report.copied.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "plugin_bundle_staged"
        );
        Ok(report)
    }

    async fn health(&self, plugin_dir: &Path, spec: &BundleSpec) -> BundleHealth {
        let mut health = BundleHealth::default();

        match tokio::fs::metadata(plugin_dir.join(&spec.entry_file)).await {
            Ok(meta) if meta.is_file() => {
                health.bundle_exists = true;
                health.bundle_size = meta.len();
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => health.error = Some(err.to_string()),
        }

        match Self::read_metadata(&plugin_dir.join(&spec.metadata_file)).await {
            Ok(_) => health.metadata_valid = true,
            Err(err) => {
                let missing = err
                    .downcast_ref::<std::io::Error>()
                    .map(|e| e.kind() == ErrorKind::NotFound)
                    .unwrap_or(false);
                if !missing && health.error.is_none() {
                    health.error = Some(format!("{}: {err}", spec.metadata_file));
                }
            }
        }
        health
    }

    async fn validate(&self, plugin_dir: &Path, spec: &BundleSpec) -> ValidationReport {
        let mut missing = Vec::new();
        for rel in &spec.required_files {
            if tokio::fs::metadata(plugin_dir.join(rel)).await.is_err() {
                missing.push(rel.as_str());
            }
        }
        if !missing.is_empty() {
            return ValidationReport::invalid(format!(
                "missing required files: {}",
                missing.join(", ")
            ));
        }

        let metadata = match Self::read_metadata(&plugin_dir.join(&spec.metadata_file)).await {
            Ok(value) => value,
            Err(err) => {
                return ValidationReport::invalid(format!("invalid {}: {err}", spec.metadata_file));
            }
        };
        for key in &spec.required_metadata_keys {
            if metadata.get(key).is_none() {
                return ValidationReport::invalid(format!(
                    "{} missing field: {key}",
                    spec.metadata_file
                ));
            }
        }

        match tokio::fs::metadata(plugin_dir.join(&spec.entry_file)).await {
            Ok(meta) if meta.len() > 0 => ValidationReport::ok(),
            Ok(_) => ValidationReport::invalid("bundle file is empty"),
            Err(err) => ValidationReport::invalid(format!("{}: {err}", spec.entry_file)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(path: PathBuf, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn bundle_source(root: &Path) -> PathBuf {
        let src = root.join("src");
        write(src.join("package.json"), r#"{"name":"notes","version":"1.2.0"}"#);
        write(src.join("dist/remoteEntry.js"), "var x = 1;");
        write(src.join("dist/chunks/a.js"), "a");
        write(src.join("node_modules/react/index.js"), "react");
        write(src.join("package-lock.json"), "{}");
        write(src.join(".git/HEAD"), "ref: refs/heads/main");
        write(src.join("tools/gen.pyc"), "bytecode");
        src
    }

    fn spec() -> BundleSpec {
        BundleSpec::new("dist/remoteEntry.js", "package.json")
    }

    #[tokio::test]
    async fn stage_copies_only_allowed_files() {
        let temp = TempDir::new().unwrap();
        let src = bundle_source(temp.path());
        let target = temp.path().join("shared/NotesPanel/v1.2.0");
        let filter = CopyFilter::default();

        let report = FilesystemBundleStore::new()
            .stage(BundleStaging {
                source: &src,
                target: &target,
                filter: &filter,
                update: false,
            })
            .await
            .unwrap();

        let mut copied = report.copied.clone();
        copied.sort();
        assert_eq!(
            copied,
            vec!["dist/chunks/a.js", "dist/remoteEntry.js", "package.json"]
        );
        assert!(target.join("dist/remoteEntry.js").is_file());
        assert!(!target.join("node_modules").exists());
        assert!(!target.join(".git").exists());
        assert!(!target.join("package-lock.json").exists());
        assert!(!target.join("tools/gen.pyc").exists());
    }

    #[tokio::test]
    async fn existing_files_are_replaced_only_in_update_mode() {
        let temp = TempDir::new().unwrap();
        let src = bundle_source(temp.path());
        let target = temp.path().join("shared");
        write(target.join("dist/remoteEntry.js"), "stale");
        let filter = CopyFilter::default();
        let store = FilesystemBundleStore::new();

        let report = store
            .stage(BundleStaging {
                source: &src,
                target: &target,
                filter: &filter,
                update: false,
            })
            .await
            .unwrap();
        assert!(report.unchanged.contains(&"dist/remoteEntry.js".to_string()));
        assert_eq!(
            std::fs::read_to_string(target.join("dist/remoteEntry.js")).unwrap(),
            "stale"
        );

        store
            .stage(BundleStaging {
                source: &src,
                target: &target,
                filter: &filter,
                update: true,
            })
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(target.join("dist/remoteEntry.js")).unwrap(),
            "var x = 1;"
        );
    }

    #[tokio::test]
    async fn missing_source_aborts_staging() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        let target = temp.path().join("shared");
        let filter = CopyFilter::default();

        let err = FilesystemBundleStore::new()
            .stage(BundleStaging {
                source: &missing,
                target: &target,
                filter: &filter,
                update: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BundleCopyError::MissingSource(_)));
    }

    #[tokio::test]
    async fn staging_into_source_dir_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let src = bundle_source(temp.path());
        let filter = CopyFilter::default();

        let report = FilesystemBundleStore::new()
            .stage(BundleStaging {
                source: &src,
                target: &src,
                filter: &filter,
                update: false,
            })
            .await
            .unwrap();
        assert_eq!(report, CopyReport::default());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_files_are_copied_by_content() {
        let temp = TempDir::new().unwrap();
        let src = bundle_source(temp.path());
        write(temp.path().join("outside/styles.css"), "body {}");
        std::os::unix::fs::symlink(temp.path().join("outside/styles.css"), src.join("dist/styles.css"))
            .unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone.js"), src.join("dist/dangling.js")).unwrap();
        let target = temp.path().join("shared");
        let filter = CopyFilter::default();

        let report = FilesystemBundleStore::new()
            .stage(BundleStaging {
                source: &src,
                target: &target,
                filter: &filter,
                update: false,
            })
            .await
            .unwrap();

        assert!(report.copied.contains(&"dist/styles.css".to_string()));
        let copied = target.join("dist/styles.css");
        assert!(!copied.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "body {}");
        assert_eq!(report.failed, vec!["dist/dangling.js"]);
        assert!(!target.join("dist/dangling.js").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn source_with_no_readable_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone.js"), src.join("remoteEntry.js")).unwrap();
        let target = temp.path().join("shared");
        let filter = CopyFilter::default();

        let err = FilesystemBundleStore::new()
            .stage(BundleStaging {
                source: &src,
                target: &target,
                filter: &filter,
                update: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BundleCopyError::NothingCopied));
    }

    #[tokio::test]
    async fn health_tracks_entry_file_and_metadata() {
        let temp = TempDir::new().unwrap();
        let dir = bundle_source(temp.path());
        let store = FilesystemBundleStore::new();

        let health = store.health(&dir, &spec()).await;
        assert!(health.is_healthy());
        assert_eq!(health.bundle_size, 10);

        std::fs::remove_file(dir.join("dist/remoteEntry.js")).unwrap();
        let health = store.health(&dir, &spec()).await;
        assert!(!health.bundle_exists);
        assert!(!health.is_healthy());

        write(dir.join("dist/remoteEntry.js"), "");
        write(dir.join("package.json"), "{not json");
        let health = store.health(&dir, &spec()).await;
        assert!(health.bundle_exists);
        assert!(!health.metadata_valid);
        assert!(health.error.is_some());
    }

    #[tokio::test]
    async fn validate_reports_first_problem() {
        let temp = TempDir::new().unwrap();
        let dir = bundle_source(temp.path());
        let store = FilesystemBundleStore::new();

        assert_eq!(store.validate(&dir, &spec()).await, ValidationReport::ok());

        write(dir.join("package.json"), r#"{"name":"notes"}"#);
        let report = store.validate(&dir, &spec()).await;
        assert!(!report.valid);
        assert!(report.error.unwrap().contains("version"));

        write(dir.join("package.json"), r#"{"name":"notes","version":"1"}"#);
        write(dir.join("dist/remoteEntry.js"), "");
        let report = store.validate(&dir, &spec()).await;
        assert_eq!(report.error.as_deref(), Some("bundle file is empty"));

        std::fs::remove_file(dir.join("package.json")).unwrap();
        let report = store.validate(&dir, &spec()).await;
        assert!(report.error.unwrap().contains("missing required files: package.json"));
    }
}
