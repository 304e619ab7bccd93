use std::sync::Arc;

use crate::application::services::lifecycle::PluginLifecycleManager;
use crate::application::services::lifecycle::registry::LifecycleRegistry;
use crate::bootstrap::config::Config;

#[derive(Clone)]
pub struct AppContext {
    pub cfg: Config,
    services: Arc<AppServices>,
}

pub struct AppServices {
    registry: Arc<LifecycleRegistry>,
}

impl AppServices {
    pub fn new(registry: Arc<LifecycleRegistry>) -> Self {
        Self { registry }
    }
}

impl AppContext {
    pub fn new(cfg: Config, services: AppServices) -> Self {
        Self {
            cfg,
            services: Arc::new(services),
        }
    }

    pub fn registry(&self) -> Arc<LifecycleRegistry> {
        self.services.registry.clone()
    }

    /// Manager for the newest registered version of `slug`.
    pub fn plugin_manager(&self, slug: &str) -> Option<Arc<PluginLifecycleManager>> {
        self.services.registry.current(slug)
    }
}
