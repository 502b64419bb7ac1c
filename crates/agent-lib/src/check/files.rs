//! Filesystem checks: existence, content and size

use super::paths::resolve;
use super::{digest::sha256_file, read_capped};
use crate::error::CheckFault;
use crate::models::Evidence;
use crate::strategy::{MatchMode, SizeDirection};
use glob_match::glob_match;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

pub(super) fn file_existence(
    root: &Path,
    raw_path: &str,
    patterns: &[String],
    negate: bool,
) -> Result<Option<Evidence>, CheckFault> {
    let target = resolve(root, raw_path)?;

    let (present, matched) = if patterns.is_empty() {
        (target.symlink_metadata().is_ok(), None)
    } else if target.is_dir() {
        let matched = find_glob_match(&target, patterns);
        (matched.is_some(), matched)
    } else {
        (false, None)
    };

    if present == negate {
        return Ok(None);
    }

    Ok(Some(Evidence::FileExistence {
        path: raw_path.to_string(),
        matched,
        present,
    }))
}

/// First entry below `dir` matching any pattern, patterns tried in order
fn find_glob_match(dir: &Path, patterns: &[String]) -> Option<String> {
    let depth = patterns
        .iter()
        .map(|p| p.trim_start_matches('/').split('/').count())
        .max()
        .unwrap_or(1);

    let entries: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(dir)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();

    patterns.iter().find_map(|pattern| {
        let pattern = pattern.trim_start_matches('/');
        entries.iter().find(|rel| glob_match(pattern, rel)).cloned()
    })
}

pub(super) fn file_content(
    root: &Path,
    raw_path: &str,
    patterns: &[String],
    mode: MatchMode,
    known_digests: &[String],
    read_cap: u64,
) -> Result<Option<Evidence>, CheckFault> {
    let target = resolve(root, raw_path)?;
    if !target.is_file() {
        return Ok(None);
    }

    let io_fault = |source: io::Error| CheckFault::Io {
        path: target.clone(),
        source,
    };

    let bytes = read_capped(&target, read_cap).map_err(io_fault)?;

    for pattern in patterns.iter().filter(|p| !p.is_empty()) {
        let offset = match mode {
            MatchMode::Substring => memchr::memmem::find(&bytes, pattern.as_bytes()),
            MatchMode::Regex => regex::bytes::Regex::new(pattern)
                .map_err(|source| CheckFault::Pattern {
                    pattern: pattern.clone(),
                    source,
                })?
                .find(&bytes)
                .map(|m| m.start()),
        };

        if let Some(offset) = offset {
            let sha256 = match sha256_file(&target) {
                Ok(digest) => Some(digest),
                Err(e) => {
                    debug!(path = %target.display(), error = %e, "Could not hash matched file");
                    None
                }
            };
            return Ok(Some(Evidence::ContentMatch {
                path: raw_path.to_string(),
                pattern: pattern.clone(),
                offset: offset as u64,
                sha256,
            }));
        }
    }

    if !known_digests.is_empty() {
        let digest = sha256_file(&target).map_err(io_fault)?;
        if known_digests.iter().any(|d| d.eq_ignore_ascii_case(&digest)) {
            return Ok(Some(Evidence::Digest {
                path: raw_path.to_string(),
                sha256: digest,
            }));
        }
    }

    Ok(None)
}

pub(super) fn file_size(
    root: &Path,
    raw_path: &str,
    threshold: u64,
    direction: SizeDirection,
) -> Result<Option<Evidence>, CheckFault> {
    let target = resolve(root, raw_path)?;
    let metadata = match std::fs::metadata(&target) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CheckFault::Io {
                path: target,
                source,
            })
        }
    };
    if !metadata.is_file() {
        return Ok(None);
    }

    let size = metadata.len();
    let exceeded = match direction {
        SizeDirection::Over => size > threshold,
        SizeDirection::Under => size < threshold,
    };

    Ok(exceeded.then(|| Evidence::FileSize {
        path: raw_path.to_string(),
        size,
        threshold,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::digest::sha256_hex;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_existence_default_flags_when_present() {
        let dir = TempDir::new().unwrap();
        assert!(file_existence(dir.path(), "/malware.sh", &[], false)
            .unwrap()
            .is_none());

        fs::write(dir.path().join("malware.sh"), "#!/bin/sh").unwrap();
        let evidence = file_existence(dir.path(), "/malware.sh", &[], false)
            .unwrap()
            .unwrap();
        assert!(matches!(evidence, Evidence::FileExistence { present: true, .. }));
    }

    #[test]
    fn test_existence_negated_flags_when_absent() {
        let dir = TempDir::new().unwrap();
        let evidence = file_existence(dir.path(), "eula.txt", &[], true)
            .unwrap()
            .unwrap();
        assert!(matches!(evidence, Evidence::FileExistence { present: false, .. }));

        fs::write(dir.path().join("eula.txt"), "eula=true").unwrap();
        assert!(file_existence(dir.path(), "eula.txt", &[], true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_existence_glob_patterns() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("plugins/sub")).unwrap();
        fs::write(dir.path().join("plugins/Essentials.jar"), "").unwrap();
        fs::write(dir.path().join("plugins/sub/xmrig"), "").unwrap();

        let patterns = vec!["*/xmrig".to_string(), "*.jar".to_string()];
        let evidence = file_existence(dir.path(), "plugins", &patterns, false)
            .unwrap()
            .unwrap();
        match evidence {
            Evidence::FileExistence { matched, .. } => {
                assert_eq!(matched.as_deref(), Some("sub/xmrig"));
            }
            other => panic!("unexpected evidence {:?}", other),
        }

        let none = vec!["*.sh".to_string()];
        assert!(file_existence(dir.path(), "plugins", &none, false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_content_substring_offset_and_digest() {
        let dir = TempDir::new().unwrap();
        let body = b"java -jar server.jar\n./xmrig -o stratum+tcp://pool:3333\n";
        fs::write(dir.path().join("start.sh"), body).unwrap();

        let patterns = vec!["nonexistent".to_string(), "stratum+tcp".to_string()];
        let evidence = file_content(dir.path(), "start.sh", &patterns, MatchMode::Substring, &[], 1024)
            .unwrap()
            .unwrap();

        match evidence {
            Evidence::ContentMatch {
                pattern,
                offset,
                sha256,
                ..
            } => {
                assert_eq!(pattern, "stratum+tcp");
                assert_eq!(offset, 32);
                assert_eq!(sha256, Some(sha256_hex(body)));
            }
            other => panic!("unexpected evidence {:?}", other),
        }
    }

    #[test]
    fn test_content_absent_file_yields_none() {
        let dir = TempDir::new().unwrap();
        let patterns = vec!["x".to_string()];
        assert!(file_content(dir.path(), "missing.txt", &patterns, MatchMode::Substring, &[], 1024)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_content_respects_read_cap() {
        let dir = TempDir::new().unwrap();
        let mut body = vec![b'a'; 100];
        body.extend_from_slice(b"needle");
        fs::write(dir.path().join("big.log"), &body).unwrap();

        let patterns = vec!["needle".to_string()];
        assert!(file_content(dir.path(), "big.log", &patterns, MatchMode::Substring, &[], 50)
            .unwrap()
            .is_none());
        assert!(file_content(dir.path(), "big.log", &patterns, MatchMode::Substring, &[], 200)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_content_regex_and_bad_pattern() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.yml"), "pool: stratum+ssl://x:443").unwrap();

        let good = vec![r"stratum\+(tcp|ssl)://".to_string()];
        assert!(file_content(dir.path(), "config.yml", &good, MatchMode::Regex, &[], 1024)
            .unwrap()
            .is_some());

        let bad = vec!["(unclosed".to_string()];
        assert!(matches!(
            file_content(dir.path(), "config.yml", &bad, MatchMode::Regex, &[], 1024),
            Err(CheckFault::Pattern { .. })
        ));
    }

    #[test]
    fn test_content_known_digest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("payload.bin"), b"abc").unwrap();
        let digests = vec!["BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD".to_string()];

        let evidence = file_content(dir.path(), "payload.bin", &[], MatchMode::Substring, &digests, 1024)
            .unwrap()
            .unwrap();
        assert!(matches!(evidence, Evidence::Digest { .. }));
    }

    #[test]
    fn test_file_size_directions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("world.zip"), vec![0u8; 2048]).unwrap();

        assert!(file_size(dir.path(), "world.zip", 1024, SizeDirection::Over)
            .unwrap()
            .is_some());
        assert!(file_size(dir.path(), "world.zip", 4096, SizeDirection::Over)
            .unwrap()
            .is_none());
        assert!(file_size(dir.path(), "world.zip", 4096, SizeDirection::Under)
            .unwrap()
            .is_some());
        assert!(file_size(dir.path(), "missing.zip", 0, SizeDirection::Over)
            .unwrap()
            .is_none());
    }
}
