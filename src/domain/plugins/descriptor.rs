use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub long_description: String,
    #[serde(default = "default_plugin_type")]
    pub plugin_type: String,
    pub icon: String,
    pub category: String,
    #[serde(default)]
    pub official: bool,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub compatibility: String,
    pub scope: String,
    #[serde(default = "default_bundle_method")]
    pub bundle_method: String,
    pub bundle_location: String,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default = "default_installation_type")]
    pub installation_type: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub update_check: UpdateCheck,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateCheck {
    pub url: Option<String>,
    pub last_checked: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub update_available: bool,
    pub latest_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub props: JsonValue,
    #[serde(default)]
    pub config_fields: BTreeMap<String, ConfigField>,
    #[serde(default)]
    pub messages: JsonValue,
    #[serde(default)]
    pub required_services: BTreeMap<String, ServiceRequirement>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub layout: ModuleLayout,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequirement {
    pub methods: Vec<String>,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLayout {
    pub min_width: u32,
    pub min_height: u32,
    pub default_width: u32,
    pub default_height: u32,
}

fn default_plugin_type() -> String {
    "frontend".to_string()
}

fn default_bundle_method() -> String {
    "webpack".to_string()
}

fn default_installation_type() -> String {
    "remote".to_string()
}

/// Row id of a plugin installed for one user.
pub fn plugin_row_id(user_id: &str, plugin_slug: &str) -> String {
    format!("{user_id}_{plugin_slug}")
}

/// Row id of one module of a plugin installed for one user.
pub fn module_row_id(user_id: &str, plugin_slug: &str, module_name: &str) -> String {
    format!("{user_id}_{plugin_slug}_{module_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_ids_follow_user_slug_module_order() {
        assert_eq!(plugin_row_id("u1", "Notes"), "u1_Notes");
        assert_eq!(module_row_id("u1", "Notes", "Panel"), "u1_Notes_Panel");
    }

    #[test]
    fn module_descriptor_fills_optional_fields() {
        let module: ModuleDescriptor = serde_json::from_value(serde_json::json!({
            "name": "Panel",
            "display_name": "Panel",
            "config_fields": {
                "limit": { "type": "number", "default": 10 }
            },
            "layout": { "minWidth": 2, "minHeight": 2, "defaultWidth": 4, "defaultHeight": 3 }
        }))
        .unwrap();

        assert_eq!(module.priority, 0);
        assert!(module.tags.is_empty());
        assert_eq!(module.config_fields["limit"].field_type, "number");
        assert_eq!(module.layout.default_width, 4);
    }
}
