//! Generator configuration.
//!
//! Every field has a default so an absent or partial `atfgen.json` still
//! yields a usable config.
use crate::manpage::{OptionRelation, OptionTable};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOCAL_CONFIG_FILE: &str = "atfgen.json";
const CONFIG_DIR_NAME: &str = "atfgen";
const USER_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenConfig {
    pub groff_dir: PathBuf,
    pub tests_dir: PathBuf,
    pub annotations_dir: PathBuf,
    pub failed_dir: PathBuf,
    /// Root of the source tree the cache refresh and install step work in.
    pub src_root: PathBuf,
    /// Source-relative utility directories, one per line.
    pub utils_list: PathBuf,
    pub sections: Vec<String>,
    pub probe_timeout_ms: u64,
    pub utility_timeout_secs: u64,
    /// Environment overrides for every probe.
    pub env: BTreeMap<String, String>,
    /// Entries added to the built-in known-option table.
    pub known_options: Vec<OptionRelation>,
    /// Curated processing order; empty means directory-listing order.
    pub utilities: Vec<String>,
    pub skip_existing: bool,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            groff_dir: PathBuf::from("groff"),
            tests_dir: PathBuf::from("generated_tests"),
            annotations_dir: PathBuf::from("annotations"),
            failed_dir: PathBuf::from("failed_groff"),
            src_root: PathBuf::from("src"),
            utils_list: PathBuf::from("scripts/utils_list"),
            sections: vec!["1".to_string(), "8".to_string()],
            probe_timeout_ms: 2000,
            utility_timeout_secs: 60,
            env: BTreeMap::from([("LC_ALL".to_string(), "C".to_string())]),
            known_options: Vec::new(),
            utilities: Vec::new(),
            skip_existing: false,
        }
    }
}

impl GenConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn utility_timeout(&self) -> Duration {
        Duration::from_secs(self.utility_timeout_secs)
    }

    pub fn option_table(&self) -> OptionTable {
        OptionTable::new(&self.known_options)
    }

    /// `PATH` the probes will see, for locating utilities up front.
    pub fn probe_path(&self) -> Option<String> {
        self.env
            .get("PATH")
            .cloned()
            .or_else(|| std::env::var("PATH").ok())
    }
}

/// Config file in effect for `root`, if any.
pub fn config_path(root: &Path) -> Option<PathBuf> {
    let local = root.join(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(USER_CONFIG_FILE))
        .filter(|path| path.is_file())
}

/// Load the config for `root`, falling back to defaults when no file exists.
pub fn load_config(root: &Path) -> Result<GenConfig> {
    let Some(path) = config_path(root) else {
        tracing::debug!("no config file, using defaults");
        return Ok(GenConfig::default());
    };
    let config = read_config(&path)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

pub fn read_config(path: &Path) -> Result<GenConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: GenConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &GenConfig) -> Result<()> {
    if config.sections.is_empty() {
        return Err(anyhow!("sections must list at least one manual section"));
    }
    if config.probe_timeout_ms == 0 {
        return Err(anyhow!("probe_timeout_ms must be positive"));
    }
    if config.utility_timeout_secs == 0 {
        return Err(anyhow!("utility_timeout_secs must be positive"));
    }
    for relation in &config.known_options {
        if relation.token.is_empty() || relation.keyword.is_empty() {
            return Err(anyhow!(
                "known_options entries need a token and a keyword (got {:?})",
                relation.token
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GenConfig::default();
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.utility_timeout(), Duration::from_secs(60));
        assert_eq!(config.env.get("LC_ALL").map(String::as_str), Some("C"));
        assert_eq!(config.sections, vec!["1", "8"]);
        assert_eq!(config.option_table().len(), 2);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(LOCAL_CONFIG_FILE);
        fs::write(
            &path,
            r#"{
                "probe_timeout_ms": 500,
                "known_options": [{"kind": "short", "token": "q", "keyword": "quiet"}]
            }"#,
        )
        .expect("write");
        let config = load_config(dir.path()).expect("load");
        assert_eq!(config.probe_timeout_ms, 500);
        assert_eq!(config.utility_timeout_secs, 60);
        let table = config.option_table();
        assert_eq!(table.get("q").map(|rel| rel.keyword.as_str()), Some("quiet"));
        assert!(table.get("h").is_some());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(LOCAL_CONFIG_FILE);
        fs::write(&path, r#"{"probe_timeout": 5}"#).expect("write");
        assert!(read_config(&path).is_err());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = GenConfig {
            probe_timeout_ms: 0,
            ..GenConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn probe_path_prefers_config_env() {
        let mut config = GenConfig::default();
        config.env.insert("PATH".to_string(), "/opt/bin".to_string());
        assert_eq!(config.probe_path().as_deref(), Some("/opt/bin"));
    }
}
