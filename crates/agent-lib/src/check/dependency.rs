//! Dependency manifest inspection
//!
//! Two manifest shapes are understood:
//! - JSON manifests (`package.json`): keys of the dependency sections
//! - Line-based manifests (`requirements.txt`): one requirement per line

use super::paths::resolve;
use super::read_capped;
use crate::error::CheckFault;
use crate::models::Evidence;
use serde_json::Value;
use std::path::Path;

const JSON_SECTIONS: &[&str] = &[
    "dependencies",
    "devDependencies",
    "optionalDependencies",
    "peerDependencies",
];

pub(super) fn dependency(
    root: &Path,
    manifest: &str,
    patterns: &[String],
    read_cap: u64,
) -> Result<Option<Evidence>, CheckFault> {
    let target = resolve(root, manifest)?;
    if !target.is_file() {
        return Ok(None);
    }

    let bytes = read_capped(&target, read_cap).map_err(|source| CheckFault::Io {
        path: target.clone(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);

    let is_json = target
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("json"));

    let names = if is_json {
        json_dependencies(&text).map_err(|reason| CheckFault::Manifest {
            path: target.clone(),
            reason,
        })?
    } else {
        line_dependencies(&text)
    };

    for pattern in patterns {
        let needle = pattern.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        if let Some(name) = names.iter().find(|n| n.to_lowercase().contains(&needle)) {
            return Ok(Some(Evidence::Dependency {
                manifest: manifest.to_string(),
                dependency: name.clone(),
                pattern: pattern.clone(),
            }));
        }
    }

    Ok(None)
}

fn json_dependencies(text: &str) -> Result<Vec<String>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;

    let mut names = Vec::new();
    for section in JSON_SECTIONS {
        if let Some(Value::Object(entries)) = object.get(*section) {
            names.extend(entries.keys().cloned());
        }
    }
    Ok(names)
}

fn line_dependencies(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with('-') {
                return None;
            }
            let name: String = line
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                .collect();
            (!name.is_empty()).then_some(name)
        })
        .collect()
}
