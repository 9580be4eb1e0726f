//! Typed paths into the generator's working layout.
//!
//! Centralizing path construction keeps file access consistent between the
//! orchestrator, the cache refresh and the install step.
use crate::config::GenConfig;
use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

pub const GROFF_INDEX_FILE: &str = "index.json";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
    groff_dir: PathBuf,
    tests_dir: PathBuf,
    annotations_dir: PathBuf,
    failed_dir: PathBuf,
    src_root: PathBuf,
    utils_list: PathBuf,
}

impl WorkspacePaths {
    /// Resolve the configured (possibly relative) locations against `root`.
    pub fn new(root: PathBuf, config: &GenConfig) -> Self {
        Self {
            groff_dir: root.join(&config.groff_dir),
            tests_dir: root.join(&config.tests_dir),
            annotations_dir: root.join(&config.annotations_dir),
            failed_dir: root.join(&config.failed_dir),
            src_root: root.join(&config.src_root),
            utils_list: root.join(&config.utils_list),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of cached manual pages, `<utility>.<section>`.
    pub fn groff_dir(&self) -> &Path {
        &self.groff_dir
    }

    /// `utility -> source directory` map written by the cache refresh.
    pub fn groff_index_path(&self) -> PathBuf {
        self.groff_dir.join(GROFF_INDEX_FILE)
    }

    pub fn tests_dir(&self) -> &Path {
        &self.tests_dir
    }

    pub fn test_script_path(&self, utility: &str) -> PathBuf {
        self.tests_dir.join(test_script_name(utility))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.tests_dir.join(SUMMARY_FILE)
    }

    pub fn annotations_dir(&self) -> &Path {
        &self.annotations_dir
    }

    /// Holding area for manual pages whose generation did not finish.
    pub fn failed_dir(&self) -> &Path {
        &self.failed_dir
    }

    pub fn src_root(&self) -> &Path {
        &self.src_root
    }

    pub fn utils_list_path(&self) -> &Path {
        &self.utils_list
    }
}

pub fn test_script_name(utility: &str) -> String {
    format!("{utility}_test.sh")
}

/// Matches `<utility>.<section>` file names; group 1 is the utility, group 2
/// the section.
pub fn manpage_file_pattern(sections: &[String]) -> Result<Regex> {
    let alternatives = sections
        .iter()
        .map(|section| regex::escape(section))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"^(.+)\.({alternatives})$")).context("compile manual page pattern")
}
