use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Page created alongside a plugin install, pointing at one of its modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTemplate {
    pub route: String,
    pub name: String,
    /// Module the page embeds; the first module of the plugin when absent.
    #[serde(default)]
    pub module: Option<String>,
    pub display_name: String,
    pub layout_prefix: String,
    pub desktop: PlacementSize,
    pub tablet: PlacementSize,
    pub mobile: PlacementSize,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementSize {
    pub w: u32,
    pub h: u32,
}

impl PlacementSize {
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub layouts: PageLayouts,
    #[serde(default)]
    pub modules: JsonMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLayouts {
    pub desktop: Vec<LayoutPlacement>,
    pub tablet: Vec<LayoutPlacement>,
    pub mobile: Vec<LayoutPlacement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPlacement {
    pub i: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub plugin_id: String,
    pub args: PlacementArgs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementArgs {
    pub module_id: String,
    pub display_name: String,
}

impl PageContent {
    /// Layout with a single placement of `module_id` at the origin of every breakpoint.
    pub fn single_module(
        template: &PageTemplate,
        plugin_slug: &str,
        module_id: &str,
        timestamp_ms: i64,
    ) -> Self {
        let layout_id = format!("{}_{}_{}", template.layout_prefix, module_id, timestamp_ms);
        let place = |size: PlacementSize| LayoutPlacement {
            i: layout_id.clone(),
            x: 0,
            y: 0,
            w: size.w,
            h: size.h,
            plugin_id: plugin_slug.to_string(),
            args: PlacementArgs {
                module_id: module_id.to_string(),
                display_name: template.display_name.clone(),
            },
        };
        Self {
            layouts: PageLayouts {
                desktop: vec![place(template.desktop)],
                tablet: vec![place(template.tablet)],
                mobile: vec![place(template.mobile)],
            },
            modules: JsonMap::new(),
        }
    }
}
