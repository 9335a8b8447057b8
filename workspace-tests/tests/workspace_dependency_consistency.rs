use proptest::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Every member crate that uses a dependency declared in
/// `[workspace.dependencies]` inherits it with `workspace = true`.
#[cfg(test)]
mod workspace_dependency_tests {
    use super::*;

    const MEMBERS: [&str; 3] = ["tcb-core", "tcb-agent", "workspace-tests"];

    fn read_toml(path: &str) -> toml::Value {
        let content = fs::read_to_string(path).unwrap_or_else(|e| panic!("read {}: {}", path, e));
        toml::from_str(&content).unwrap_or_else(|e| panic!("parse {}: {}", path, e))
    }

    fn workspace_dependencies() -> BTreeSet<String> {
        let root = read_toml("../Cargo.toml");
        root.get("workspace")
            .and_then(|w| w.get("dependencies"))
            .and_then(toml::Value::as_table)
            .map(|deps| deps.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Dependency name -> whether it inherits from the workspace
    fn crate_dependencies(manifest: &toml::Value) -> Vec<(String, bool)> {
        ["dependencies", "dev-dependencies", "build-dependencies"]
            .iter()
            .filter_map(|section| manifest.get(*section).and_then(toml::Value::as_table))
            .flat_map(|table| table.iter())
            .map(|(name, spec)| {
                let inherits = spec
                    .get("workspace")
                    .and_then(toml::Value::as_bool)
                    .unwrap_or(false);
                (name.clone(), inherits)
            })
            .collect()
    }

    #[test]
    fn test_root_lists_every_member() {
        let root = read_toml("../Cargo.toml");
        let members: BTreeSet<&str> = root["workspace"]["members"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(toml::Value::as_str)
            .collect();

        for member in MEMBERS {
            assert!(members.contains(member), "missing member {}", member);
            assert!(Path::new(&format!("../{}/Cargo.toml", member)).exists());
        }
        assert_eq!(root["workspace"]["resolver"].as_str(), Some("2"));
    }

    #[test]
    fn test_clap_features_are_derive_only() {
        // TCB_* variables are read by the agent's settings loader, not by clap
        let root = read_toml("../Cargo.toml");
        let features: Vec<&str> = root["workspace"]["dependencies"]["clap"]["features"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(toml::Value::as_str)
            .collect();
        assert_eq!(features, vec!["derive"]);
    }

    #[test]
    fn test_entry_points_exist() {
        assert!(Path::new("../tcb-core/src/lib.rs").exists());
        assert!(Path::new("../tcb-agent/src/lib.rs").exists());
        assert!(Path::new("../tcb-agent/src/main.rs").exists());
    }

    proptest! {
        #[test]
        fn test_workspace_dependency_consistency(crate_name in prop::sample::select(MEMBERS.to_vec())) {
            let manifest = read_toml(&format!("../{}/Cargo.toml", crate_name));
            let shared = workspace_dependencies();

            for (dep_name, inherits) in crate_dependencies(&manifest) {
                if shared.contains(&dep_name) {
                    prop_assert!(
                        inherits,
                        "Crate '{}' uses '{}' without 'workspace = true'",
                        crate_name,
                        dep_name
                    );
                }
            }
        }
    }

    #[test]
    fn test_crate_dependencies_detects_pinned_versions() {
        let manifest: toml::Value = toml::from_str(
            r#"
[package]
name = "sample"

[dependencies]
tokio = "1.0"
serde = { workspace = true }
"#,
        )
        .unwrap();

        let deps = crate_dependencies(&manifest);
        assert!(deps.contains(&("tokio".to_string(), false)));
        assert!(deps.contains(&("serde".to_string(), true)));
    }
}
