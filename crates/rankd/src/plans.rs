//! The plan store: a directory of `<name>.plan.json` files and an `index.json`
//! listing them.
use anyhow::Context;
use std::path::{Path, PathBuf};

#[derive(Debug, serde::Deserialize)]
struct Index {
    #[serde(default)]
    plans: Vec<IndexEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct IndexEntry {
    name: String,
}

/// Plan names are restricted so they can't escape the plan directory.
pub fn is_valid_plan_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Path of plan `name` within `plan_dir`.
pub fn plan_path(plan_dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    if !is_valid_plan_name(name) {
        anyhow::bail!("Invalid plan_name '{name}'. Plan names must match [A-Za-z0-9_]+ only.");
    }
    Ok(plan_dir.join(format!("{name}.plan.json")))
}

/// Names of the plans listed by `plan_dir/index.json`.
pub fn list_plans(plan_dir: &Path) -> anyhow::Result<Vec<String>> {
    let index_path = plan_dir.join("index.json");
    let content = std::fs::read_to_string(&index_path)
        .with_context(|| format!("Cannot open {}", index_path.display()))?;
    let index: Index = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", index_path.display()))?;

    Ok(index.plans.into_iter().map(|entry| entry.name).collect())
}
