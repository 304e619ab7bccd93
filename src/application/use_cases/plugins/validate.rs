use std::path::Path;

use crate::application::ports::bundle_store::{BundleStore, ValidationReport};
use crate::domain::plugins::bundle::BundleSpec;

pub struct ValidateInstallation<'a, B: BundleStore + ?Sized> {
    pub bundles: &'a B,
}

impl<'a, B: BundleStore + ?Sized> ValidateInstallation<'a, B> {
    pub async fn execute(&self, plugin_dir: &Path, spec: &BundleSpec) -> ValidationReport {
        let report = self.bundles.validate(plugin_dir, spec).await;
        if let Some(error) = report.error.as_deref() {
            tracing::info!(dir = %plugin_dir.display(), error, "plugin_bundle_invalid");
        }
        report
    }
}
