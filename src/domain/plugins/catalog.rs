use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, bail};
use serde_json::json;

use super::bundle::{BundleSpec, CopyFilter};
use super::definition::PluginDefinition;
use super::descriptor::{
    ConfigField, ModuleDescriptor, ModuleLayout, PluginDescriptor, ServiceRequirement, UpdateCheck,
};
use super::page::{PageTemplate, PlacementSize};

/// Definitions shipped with the service.
pub fn builtin() -> Vec<PluginDefinition> {
    vec![model_evaluator(), notes_panel()]
}

/// Reads a JSON array of definitions, or falls back to [`builtin`].
pub fn load(path: Option<&Path>) -> anyhow::Result<Vec<PluginDefinition>> {
    let defs = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read plugin catalog at {}", path.display()))?;
            serde_json::from_str::<Vec<PluginDefinition>>(&raw)
                .with_context(|| format!("parse plugin catalog at {}", path.display()))?
        }
        None => builtin(),
    };

    let mut seen = HashSet::new();
    for def in &defs {
        def.validate()?;
        if !seen.insert((def.slug().to_string(), def.version().to_string())) {
            bail!(
                "plugin {} version {} is defined twice",
                def.slug(),
                def.version()
            );
        }
    }
    Ok(defs)
}

fn service(methods: &[&str]) -> ServiceRequirement {
    ServiceRequirement {
        methods: methods.iter().map(|m| m.to_string()).collect(),
        version: "1.0.0".to_string(),
    }
}

fn field(field_type: &str, description: &str, default: serde_json::Value) -> ConfigField {
    ConfigField {
        field_type: field_type.to_string(),
        description: description.to_string(),
        default,
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn host_services() -> BTreeMap<String, ServiceRequirement> {
    BTreeMap::from([
        ("api".to_string(), service(&["get", "post", "put", "delete"])),
        (
            "theme".to_string(),
            service(&[
                "getCurrentTheme",
                "addThemeChangeListener",
                "removeThemeChangeListener",
            ]),
        ),
        (
            "settings".to_string(),
            service(&["getSetting", "setSetting", "getSettingDefinitions"]),
        ),
    ])
}

/// Evaluation dashboard; installs a page embedding its single module.
pub fn model_evaluator() -> PluginDefinition {
    let mut services = host_services();
    services.insert(
        "event".to_string(),
        service(&[
            "sendMessage",
            "subscribeToMessages",
            "unsubscribeFromMessages",
        ]),
    );
    services.insert(
        "pageContext".to_string(),
        service(&["getCurrentPageContext", "onPageContextChange"]),
    );

    PluginDefinition {
        plugin: PluginDescriptor {
            slug: "ModelEvaluator".to_string(),
            name: "ModelEvaluator".to_string(),
            version: "1.0.0".to_string(),
            description: "Automated evaluation of conversational models".to_string(),
            long_description: "Runs scripted conversations against a model and scores the \
                               transcripts on clarity, consistency, coverage and safety."
                .to_string(),
            plugin_type: "frontend".to_string(),
            icon: "ClipboardCheck".to_string(),
            category: "AI Tools".to_string(),
            official: false,
            author: "Plugin Host Team".to_string(),
            compatibility: "1.0.0".to_string(),
            scope: "ModelEvaluator".to_string(),
            bundle_method: "webpack".to_string(),
            bundle_location: "dist/remoteEntry.js".to_string(),
            is_local: false,
            source_type: "github".to_string(),
            source_url: "https://github.com/plugin-host/model-evaluator".to_string(),
            installation_type: "remote".to_string(),
            permissions: strings(&["storage.read", "storage.write", "api.access"]),
            update_check: UpdateCheck {
                url: Some(
                    "https://api.github.com/repos/plugin-host/model-evaluator/releases/latest"
                        .to_string(),
                ),
                ..UpdateCheck::default()
            },
        },
        modules: vec![ModuleDescriptor {
            name: "ModelEvaluator".to_string(),
            display_name: "Model Evaluator".to_string(),
            description: "Evaluate models with scripted conversations".to_string(),
            icon: "ClipboardCheck".to_string(),
            category: "AI Tools".to_string(),
            priority: 1,
            props: json!({
                "title": "Model Evaluator",
                "description": "Automated model evaluation"
            }),
            config_fields: BTreeMap::from([
                (
                    "api_key".to_string(),
                    field("password", "API key used by the judge model", json!("")),
                ),
                (
                    "default_temperature".to_string(),
                    field("number", "Default temperature for model calls", json!(0)),
                ),
            ]),
            messages: json!({}),
            required_services: services,
            dependencies: Vec::new(),
            layout: ModuleLayout {
                min_width: 8,
                min_height: 6,
                default_width: 12,
                default_height: 8,
            },
            tags: strings(&["ai", "evaluation", "benchmark"]),
        }],
        bundle: BundleSpec::new("dist/remoteEntry.js", "package.json"),
        copy_filter: CopyFilter::default(),
        page: Some(PageTemplate {
            route: "model-evaluator".to_string(),
            name: "Model Evaluator".to_string(),
            module: None,
            display_name: "Model Evaluator".to_string(),
            layout_prefix: "Evaluator".to_string(),
            desktop: PlacementSize::new(12, 10),
            tablet: PlacementSize::new(4, 6),
            mobile: PlacementSize::new(4, 6),
            published: true,
        }),
        source_dir: None,
    }
}

/// Note-taking widgets; no page, two modules.
pub fn notes_panel() -> PluginDefinition {
    let layout = ModuleLayout {
        min_width: 3,
        min_height: 3,
        default_width: 4,
        default_height: 4,
    };

    PluginDefinition {
        plugin: PluginDescriptor {
            slug: "NotesPanel".to_string(),
            name: "NotesPanel".to_string(),
            version: "1.2.0".to_string(),
            description: "Quick notes and note search for the dashboard".to_string(),
            long_description: String::new(),
            plugin_type: "frontend".to_string(),
            icon: "StickyNote".to_string(),
            category: "Productivity".to_string(),
            official: true,
            author: "Plugin Host Team".to_string(),
            compatibility: "1.0.0".to_string(),
            scope: "NotesPanel".to_string(),
            bundle_method: "webpack".to_string(),
            bundle_location: "dist/remoteEntry.js".to_string(),
            is_local: false,
            source_type: "github".to_string(),
            source_url: "https://github.com/plugin-host/notes-panel".to_string(),
            installation_type: "remote".to_string(),
            permissions: strings(&["storage.read", "storage.write"]),
            update_check: UpdateCheck::default(),
        },
        modules: vec![
            ModuleDescriptor {
                name: "NotesPanel".to_string(),
                display_name: "Notes".to_string(),
                description: "Write and pin short notes".to_string(),
                icon: "StickyNote".to_string(),
                category: "Productivity".to_string(),
                priority: 1,
                props: json!({ "title": "Notes" }),
                config_fields: BTreeMap::from([(
                    "max_notes".to_string(),
                    field("number", "Maximum number of notes kept", json!(50)),
                )]),
                messages: json!({}),
                required_services: host_services(),
                dependencies: Vec::new(),
                layout,
                tags: strings(&["notes"]),
            },
            ModuleDescriptor {
                name: "NotesSearch".to_string(),
                display_name: "Note Search".to_string(),
                description: "Search across saved notes".to_string(),
                icon: "Search".to_string(),
                category: "Productivity".to_string(),
                priority: 2,
                props: json!({ "title": "Search notes" }),
                config_fields: BTreeMap::from([(
                    "case_sensitive".to_string(),
                    field("boolean", "Match letter case", json!(false)),
                )]),
                messages: json!({}),
                required_services: host_services(),
                dependencies: strings(&["NotesPanel"]),
                layout,
                tags: strings(&["notes", "search"]),
            },
        ],
        bundle: BundleSpec::new("dist/remoteEntry.js", "package.json"),
        copy_filter: CopyFilter::default(),
        page: None,
        source_dir: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_without_path_returns_builtin() {
        let defs = load(None).unwrap();
        assert_eq!(defs.len(), 2);
        assert!(defs.iter().any(|d| d.page.is_some()));
        assert!(defs.iter().any(|d| d.page.is_none()));
    }

    #[test]
    fn load_reads_json_catalog_and_rejects_duplicates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.json");

        std::fs::write(&path, serde_json::to_string(&vec![notes_panel()]).unwrap()).unwrap();
        let defs = load(Some(&path)).unwrap();
        assert_eq!(defs, vec![notes_panel()]);

        std::fs::write(
            &path,
            serde_json::to_string(&vec![notes_panel(), notes_panel()]).unwrap(),
        )
        .unwrap();
        assert!(load(Some(&path)).is_err());
    }
}
