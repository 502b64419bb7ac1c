//! Volume-relative path resolution

use crate::error::CheckFault;
use std::path::{Component, Path, PathBuf};

/// Lexically normalise a check path relative to a volume root
///
/// A leading `/` is treated as the volume root. Returns `None` when `..`
/// components would climb above the root.
pub fn normalize_volume_path(raw: &str) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in Path::new(raw).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                normalized.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
        }
    }

    Some(normalized)
}

/// Resolve a check path inside `root`, rejecting lexical and symlink escapes
pub(crate) fn resolve(root: &Path, raw: &str) -> Result<PathBuf, CheckFault> {
    let relative = normalize_volume_path(raw).ok_or_else(|| CheckFault::PathEscape(raw.to_string()))?;
    let candidate = root.join(relative);

    // Only existing paths can be symlinks pointing elsewhere
    if candidate.symlink_metadata().is_err() {
        return Ok(candidate);
    }

    match (candidate.canonicalize(), root.canonicalize()) {
        (Ok(real), Ok(real_root)) if !real.starts_with(&real_root) => {
            Err(CheckFault::PathEscape(raw.to_string()))
        }
        _ => Ok(candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_volume_path("/malware.sh"), Some(PathBuf::from("malware.sh")));
        assert_eq!(
            normalize_volume_path("plugins/../plugins/./x.jar"),
            Some(PathBuf::from("plugins/x.jar"))
        );
        assert_eq!(normalize_volume_path("/"), Some(PathBuf::new()));
        assert_eq!(normalize_volume_path("../etc/passwd"), None);
        assert_eq!(normalize_volume_path("/a/../../b"), None);
    }

    #[test]
    fn test_resolve_inside_root() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve(dir.path(), "/server.jar").unwrap();
        assert_eq!(resolved, dir.path().join("server.jar"));
    }

    #[test]
    fn test_resolve_rejects_parent_escape() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            resolve(dir.path(), "../../etc/shadow"),
            Err(CheckFault::PathEscape(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), root.path().join("link")).unwrap();

        assert!(matches!(
            resolve(root.path(), "link"),
            Err(CheckFault::PathEscape(_))
        ));
    }
}
