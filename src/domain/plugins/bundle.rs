use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Files a staged bundle must contain to be considered installable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSpec {
    /// Relative path of the packaged entry file, e.g. `dist/remoteEntry.js`.
    pub entry_file: String,
    /// Relative path of the JSON metadata file, e.g. `package.json`.
    pub metadata_file: String,
    #[serde(default)]
    pub required_files: Vec<String>,
    #[serde(default)]
    pub required_metadata_keys: Vec<String>,
}

impl BundleSpec {
    pub fn new(entry_file: &str, metadata_file: &str) -> Self {
        Self {
            entry_file: entry_file.to_string(),
            metadata_file: metadata_file.to_string(),
            required_files: vec![metadata_file.to_string(), entry_file.to_string()],
            required_metadata_keys: vec!["name".to_string(), "version".to_string()],
        }
    }
}

pub const DEFAULT_EXCLUDES: &[&str] = &[
    "node_modules",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    ".git",
    ".gitignore",
    "__pycache__",
    "*.pyc",
    ".DS_Store",
    "Thumbs.db",
];

/// Denylist applied while copying a bundle tree.
///
/// A literal pattern matches any path component with the same name, so a
/// directory pattern prunes everything below it. A pattern containing `*`
/// matches file names ending with whatever follows the star.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CopyFilter {
    patterns: Vec<String>,
}

impl Default for CopyFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDES.iter().map(|p| p.to_string()))
    }
}

impl CopyFilter {
    pub fn new<I>(patterns: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Whether `relative` (relative to the bundle root) should be copied.
    pub fn allows(&self, relative: &Path) -> bool {
        for component in relative.components() {
            let Component::Normal(part) = component else {
                continue;
            };
            let part = part.to_string_lossy();
            if self
                .patterns
                .iter()
                .any(|p| !p.contains('*') && p.as_str() == part)
            {
                return false;
            }
        }

        let Some(name) = relative.file_name().map(|n| n.to_string_lossy()) else {
            return true;
        };
        !self
            .patterns
            .iter()
            .filter(|p| p.contains('*'))
            .any(|p| name.ends_with(&p.replace('*', "")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn excludes_literal_names_anywhere_in_path() {
        let filter = CopyFilter::default();
        assert!(!filter.allows(Path::new("node_modules")));
        assert!(!filter.allows(Path::new("node_modules/react/index.js")));
        assert!(!filter.allows(Path::new("src/.git/HEAD")));
        assert!(!filter.allows(Path::new("package-lock.json")));
        assert!(filter.allows(Path::new("dist/remoteEntry.js")));
        assert!(filter.allows(Path::new("package.json")));
    }

    #[test]
    fn excludes_suffix_patterns_by_file_name() {
        let filter = CopyFilter::default();
        assert!(!filter.allows(Path::new("scripts/build.pyc")));
        assert!(filter.allows(Path::new("scripts/build.py")));
    }

    #[test]
    fn custom_patterns_replace_defaults() {
        let filter = CopyFilter::new(vec!["*.map".to_string(), " ".to_string()]);
        assert_eq!(filter, CopyFilter::new(vec!["*.map".to_string()]));
        assert!(!filter.allows(&PathBuf::from("dist/main.js.map")));
        assert!(filter.allows(Path::new("node_modules/x.js")));
    }

    #[test]
    fn bundle_spec_requires_entry_and_metadata() {
        let spec = BundleSpec::new("dist/remoteEntry.js", "package.json");
        assert_eq!(
            spec.required_files,
            vec!["package.json".to_string(), "dist/remoteEntry.js".to_string()]
        );
        assert_eq!(spec.required_metadata_keys, vec!["name", "version"]);
    }
}
