//! Refresh the manual-page cache from the source tree.
use crate::paths::{manpage_file_pattern, WorkspacePaths};
use crate::staging::write_json_atomic;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// `utility -> source-relative directory`, persisted as `index.json`.
pub type GroffIndex = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub copied: Vec<String>,
    /// Directories skipped because they already carry tests.
    pub tested: Vec<String>,
    /// Directories listed but absent from the source tree.
    pub missing: Vec<String>,
}

/// Copy the manual pages of every listed utility lacking a `tests/`
/// directory into the cache and record where each came from.
pub fn refresh_cache(paths: &WorkspacePaths, sections: &[String]) -> Result<FetchReport> {
    let list_path = paths.utils_list_path();
    let list = fs::read_to_string(list_path).map_err(|err| {
        anyhow!(
            "read utility list {}: {err} (generate it before refreshing the cache)",
            list_path.display()
        )
    })?;
    let pattern = manpage_file_pattern(sections)?;
    let groff_dir = paths.groff_dir();
    fs::create_dir_all(groff_dir).with_context(|| format!("create {}", groff_dir.display()))?;

    let mut index = load_index(&paths.groff_index_path())?;
    let mut report = FetchReport::default();
    for rel_dir in list.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let source_dir = paths.src_root().join(rel_dir);
        if source_dir.join("tests").is_dir() {
            report.tested.push(rel_dir.to_string());
            continue;
        }
        let entries = match fs::read_dir(&source_dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    dir = %source_dir.display(),
                    error = %err,
                    "cannot open utility directory"
                );
                report.missing.push(rel_dir.to_string());
                continue;
            }
        };
        for entry in entries {
            let entry = entry.with_context(|| format!("read {}", source_dir.display()))?;
            if !entry.path().is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(captures) = pattern.captures(file_name) else {
                continue;
            };
            let dest = groff_dir.join(file_name);
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("copy {} to {}", entry.path().display(), dest.display()))?;
            index.insert(captures[1].to_string(), rel_dir.to_string());
            report.copied.push(file_name.to_string());
        }
    }

    write_json_atomic(&paths.groff_index_path(), &index)?;
    tracing::info!(
        copied = report.copied.len(),
        tested = report.tested.len(),
        missing = report.missing.len(),
        "manual page cache refreshed"
    );
    Ok(report)
}

pub fn load_index(path: &Path) -> Result<GroffIndex> {
    if !path.is_file() {
        return Ok(GroffIndex::new());
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}
