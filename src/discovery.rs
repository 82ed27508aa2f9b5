//! Layered settings discovery.
//!
//! Reads JSON settings fragments from an ordered candidate list
//! (project-local, then project, then user home) and merges them, and scans
//! sibling directories of the base for version-controlled checkouts to use
//! as extra working directories. Discovery never fails supervisor startup:
//! every unreadable file or directory is recorded as a diagnostic and
//! skipped.

use std::path::{Path, PathBuf};

use serde_json::Value;

/// Subdirectory whose presence marks a sibling as a working directory.
const VCS_MARKER: &str = ".git";

/// Result of configuration discovery.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Merged settings document (JSON object; empty when nothing was found)
    pub settings: Value,
    /// Ordered, de-duplicated working directories: base first
    pub working_dirs: Vec<PathBuf>,
    /// Non-fatal problems encountered along the way
    pub diagnostics: Vec<String>,
}

/// Discover settings and working directories for `base_dir`.
pub async fn discover(base_dir: &Path) -> Discovery {
    let mut discovery = Discovery {
        settings: Value::Object(serde_json::Map::new()),
        ..Default::default()
    };

    for candidate in candidate_paths(base_dir) {
        match read_fragment(&candidate).await {
            Ok(Some(fragment)) => {
                log::debug!("merging settings from {}", candidate.display());
                merge_fragment(&mut discovery.settings, fragment);
            }
            Ok(None) => {}
            Err(reason) => {
                log::warn!("skipping {}: {}", candidate.display(), reason);
                discovery
                    .diagnostics
                    .push(format!("{}: {}", candidate.display(), reason));
            }
        }
    }

    discovery.working_dirs = working_dirs(base_dir, &mut discovery.diagnostics).await;
    discovery
}

/// Ordered settings candidates; earlier files win conflicting scalars.
fn candidate_paths(base_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![
        base_dir.join(".config").join("settings.local.json"),
        base_dir.join(".config").join("settings.json"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".config").join("settings.json"));
    }
    candidates
}

/// Read and parse one candidate. `Ok(None)` means the file does not exist.
async fn read_fragment(path: &Path) -> std::result::Result<Option<Value>, String> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("read error: {}", e)),
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(Some(Value::Object(map))),
        Ok(_) => Err("settings file is not a JSON object".to_string()),
        Err(e) => Err(format!("parse error: {}", e)),
    }
}

/// Merge a lower-precedence fragment into the accumulated settings.
///
/// Scalars already present win; missing keys are filled; arrays concatenate
/// (accumulated first, so higher-precedence entries lead); nested objects
/// merge recursively.
fn merge_fragment(accumulated: &mut Value, fragment: Value) {
    let (Value::Object(acc), Value::Object(frag)) = (accumulated, fragment) else {
        return;
    };

    for (key, incoming) in frag {
        match acc.get_mut(&key) {
            None => {
                acc.insert(key, incoming);
            }
            Some(Value::Array(existing)) => {
                if let Value::Array(items) = incoming {
                    existing.extend(items);
                }
            }
            Some(existing @ Value::Object(_)) => {
                merge_fragment(existing, incoming);
            }
            Some(_) => {
                // Scalar conflict: the earlier (higher precedence) value stays.
            }
        }
    }
}

/// Base directory first, then siblings carrying a VCS marker, de-duplicated.
async fn working_dirs(base_dir: &Path, diagnostics: &mut Vec<String>) -> Vec<PathBuf> {
    let mut dirs = vec![base_dir.to_path_buf()];

    let Some(parent) = base_dir.parent() else {
        return dirs;
    };

    let mut entries = match tokio::fs::read_dir(parent).await {
        Ok(entries) => entries,
        Err(e) => {
            diagnostics.push(format!("{}: list error: {}", parent.display(), e));
            return dirs;
        }
    };

    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                if path == *base_dir {
                    continue;
                }
                // One bad sibling must not abort the rest of the scan.
                match tokio::fs::metadata(path.join(VCS_MARKER)).await {
                    Ok(meta) if meta.is_dir() => {
                        if !dirs.contains(&path) {
                            dirs.push(path);
                        }
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        diagnostics.push(format!("{}: stat error: {}", path.display(), e));
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                diagnostics.push(format!("{}: list error: {}", parent.display(), e));
                break;
            }
        }
    }

    dirs
}
