//! Message template rendering

use crate::models::Evidence;
use std::path::Path;

const PLACEHOLDERS: &[&str] = &[
    "pattern",
    "filename",
    "path",
    "dependency",
    "usage",
    "rate",
    "processes",
    "size",
    "line",
    "sha256",
];

/// Fill `{placeholder}`s in a check message from the evidence
///
/// Known placeholders without a value for this evidence render empty;
/// unknown placeholders are left as written. The template is scanned once,
/// so substituted values are never themselves expanded.
pub fn render_message(template: &str, evidence: &Evidence) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let key = after
            .find('}')
            .map(|close| &after[..close])
            .filter(|key| PLACEHOLDERS.contains(key));

        match key {
            Some(key) => {
                rendered.push_str(&placeholder_value(evidence, key).unwrap_or_default());
                rest = &after[key.len() + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

fn placeholder_value(evidence: &Evidence, key: &str) -> Option<String> {
    match (evidence, key) {
        (Evidence::FileExistence { path, matched, .. }, "filename") => {
            Some(file_name(matched.as_deref().unwrap_or(path)))
        }
        (Evidence::FileExistence { path, .. }, "path") => Some(path.clone()),

        (Evidence::ContentMatch { pattern, .. }, "pattern") => Some(pattern.clone()),
        (Evidence::ContentMatch { path, .. }, "filename") => Some(file_name(path)),
        (Evidence::ContentMatch { path, .. }, "path") => Some(path.clone()),
        (Evidence::ContentMatch { sha256, .. }, "sha256") => sha256.clone(),

        (Evidence::Digest { path, .. }, "filename") => Some(file_name(path)),
        (Evidence::Digest { path, .. }, "path") => Some(path.clone()),
        (Evidence::Digest { sha256, .. }, "sha256") => Some(sha256.clone()),

        (Evidence::FileSize { path, .. }, "filename") => Some(file_name(path)),
        (Evidence::FileSize { path, .. }, "path") => Some(path.clone()),
        (Evidence::FileSize { size, .. }, "size") => Some(size.to_string()),

        (Evidence::Dependency { dependency, .. }, "dependency") => Some(dependency.clone()),
        (Evidence::Dependency { pattern, .. }, "pattern") => Some(pattern.clone()),
        (Evidence::Dependency { manifest, .. }, "filename") => Some(file_name(manifest)),
        (Evidence::Dependency { manifest, .. }, "path") => Some(manifest.clone()),

        (Evidence::LogLine { pattern, .. }, "pattern") => Some(pattern.clone()),
        (Evidence::LogLine { line, .. }, "line") => Some(line.clone()),

        (Evidence::Processes { processes, .. }, "processes") => Some(
            processes
                .iter()
                .map(|p| format!("{} (pid {}, {:.1}%)", p.name, p.pid, p.cpu_percent))
                .collect::<Vec<_>>()
                .join(", "),
        ),

        (Evidence::NetworkRate { total_bytes, .. }, "usage") => {
            Some(format!("{:.2}", *total_bytes as f64 / 1024.0 / 1024.0))
        }
        (Evidence::NetworkRate { bytes_per_sec, .. }, "rate") => Some(format!("{:.0}", bytes_per_sec)),

        _ => None,
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
