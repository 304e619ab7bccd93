use std::path::Path;

use crate::domain::plugins::definition::PluginDefinition;

pub mod install;
pub mod status;
pub mod uninstall;
pub mod update;
pub mod user_data;
pub mod validate;

/// One plugin version together with where its bundle lives.
#[derive(Debug, Clone, Copy)]
pub struct PluginTarget<'a> {
    pub definition: &'a PluginDefinition,
    pub source_dir: &'a Path,
    pub shared_path: &'a Path,
}

impl PluginTarget<'_> {
    pub fn slug(&self) -> &str {
        self.definition.slug()
    }

    pub fn version(&self) -> &str {
        self.definition.version()
    }
}
