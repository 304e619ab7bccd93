use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::plugins::bundle::{BundleSpec, CopyFilter};

#[derive(Debug, Clone)]
pub struct BundleStaging<'a> {
    pub source: &'a Path,
    pub target: &'a Path,
    pub filter: &'a CopyFilter,
    /// Replace files already present in the target.
    pub update: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyReport {
    pub copied: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum BundleCopyError {
    #[error("bundle source {0} does not exist")]
    MissingSource(PathBuf),
    #[error("no bundle file could be copied")]
    NothingCopied,
    #[error("failed to stage plugin bundle")]
    Io(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BundleHealth {
    pub bundle_exists: bool,
    pub bundle_size: u64,
    pub metadata_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BundleHealth {
    pub fn is_healthy(&self) -> bool {
        self.bundle_exists && self.bundle_size > 0 && self.metadata_valid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn stage(&self, staging: BundleStaging<'_>) -> Result<CopyReport, BundleCopyError>;

    async fn health(&self, plugin_dir: &Path, spec: &BundleSpec) -> BundleHealth;

    async fn validate(&self, plugin_dir: &Path, spec: &BundleSpec) -> ValidationReport;
}
