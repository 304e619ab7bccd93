use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::bail;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::bundle::{BundleSpec, CopyFilter};
use super::descriptor::{ModuleDescriptor, PluginDescriptor};
use super::page::PageTemplate;

static PLUGIN_SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));
static PLUGIN_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid regex"));

/// Everything one lifecycle manager needs to know about its plugin.
///
/// Per-plugin behaviour is data here: the copy filter decides which bundle
/// files are staged and the optional page template adds the post-install
/// page step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub plugin: PluginDescriptor,
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
    pub bundle: BundleSpec,
    #[serde(default)]
    pub copy_filter: CopyFilter,
    #[serde(default)]
    pub page: Option<PageTemplate>,
    /// Bundle source directory; resolved under the configured sources root when absent.
    #[serde(default)]
    pub source_dir: Option<String>,
}

impl PluginDefinition {
    pub fn slug(&self) -> &str {
        &self.plugin.slug
    }

    pub fn version(&self) -> &str {
        &self.plugin.version
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_valid_slug(&self.plugin.slug) {
            bail!("invalid plugin slug: {:?}", self.plugin.slug);
        }
        if !PLUGIN_VERSION_RE.is_match(&self.plugin.version) {
            bail!(
                "invalid version {:?} for plugin {}",
                self.plugin.version,
                self.plugin.slug
            );
        }
        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.name.trim().is_empty() {
                bail!("plugin {} has a module without a name", self.plugin.slug);
            }
            if !seen.insert(module.name.as_str()) {
                bail!(
                    "plugin {} declares module {} twice",
                    self.plugin.slug,
                    module.name
                );
            }
        }
        if let Some(page) = &self.page {
            if page.route.trim().is_empty() {
                bail!("plugin {} has a page without a route", self.plugin.slug);
            }
            if let Some(target) = &page.module {
                if !self.modules.iter().any(|m| &m.name == target) {
                    bail!(
                        "page of plugin {} targets unknown module {}",
                        self.plugin.slug,
                        target
                    );
                }
            }
        }
        Ok(())
    }
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && PLUGIN_SLUG_RE.is_match(slug)
}

/// Total order over version strings: unparseable versions sort below every
/// semver version and among themselves by string order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Whether `candidate` may replace `current` in an update. Unparseable
/// versions only need to differ.
pub fn is_newer_version(current: &str, candidate: &str) -> bool {
    match (
        semver::Version::parse(current),
        semver::Version::parse(candidate),
    ) {
        (Ok(current), Ok(candidate)) => candidate > current,
        _ => candidate != current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plugins::catalog;

    #[test]
    fn builtin_definitions_are_valid() {
        for def in catalog::builtin() {
            def.validate().unwrap();
        }
    }

    #[test]
    fn rejects_bad_slug_and_duplicate_modules() {
        let mut def = catalog::notes_panel();
        def.plugin.slug = "bad slug".into();
        assert!(def.validate().is_err());

        let mut def = catalog::notes_panel();
        let dup = def.modules[0].clone();
        def.modules.push(dup);
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_page_targeting_unknown_module() {
        let mut def = catalog::model_evaluator();
        if let Some(page) = def.page.as_mut() {
            page.module = Some("Missing".into());
        }
        assert!(def.validate().is_err());
    }

    #[test]
    fn version_ordering_prefers_semver() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("2024.1", "2024.2"), Ordering::Less);
        assert!(is_newer_version("1.0.0", "1.0.1"));
        assert!(!is_newer_version("1.2.0", "1.1.9"));
        assert!(!is_newer_version("1.0.0", "1.0.0"));
        assert!(is_newer_version("nightly-a", "nightly-b"));
    }

    #[test]
    fn mixed_versions_sort_consistently() {
        let mut versions = vec!["1.9.0", "1.5", "1.10.0", "nightly", "1.0.0"];
        versions.sort_by(|a, b| compare_versions(a, b));
        assert_eq!(versions, vec!["1.5", "nightly", "1.0.0", "1.9.0", "1.10.0"]);
        assert_eq!(compare_versions("1.5", "1.10.0"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.5"), Ordering::Greater);
    }
}
