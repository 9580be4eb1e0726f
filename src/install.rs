//! Copy generated scripts into the source tree.
use crate::fetch::load_index;
use crate::paths::{test_script_name, WorkspacePaths};
use crate::staging::write_text_atomic;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub makefiles: Vec<String>,
    /// Utilities with a script but no recorded source directory.
    pub unplaced: Vec<String>,
}

pub fn makefile_text(utility: &str) -> String {
    format!("# $FreeBSD$\n\nATF_TESTS_SH=\t{utility}_test\n\n.include <bsd.test.mk>\n")
}

/// Install each listed utility's script under `<src_root>/<dir>/tests/`.
pub fn install_scripts(paths: &WorkspacePaths, utilities: &[String]) -> Result<InstallReport> {
    let index = load_index(&paths.groff_index_path())?;
    let mut report = InstallReport::default();
    for utility in utilities {
        let script = paths.test_script_path(utility);
        if !script.is_file() {
            continue;
        }
        let Some(rel_dir) = index.get(utility) else {
            tracing::warn!(utility = %utility, "no source directory recorded, not installing");
            report.unplaced.push(utility.clone());
            continue;
        };
        let tests_dir = paths.src_root().join(rel_dir).join("tests");
        fs::create_dir_all(&tests_dir)
            .with_context(|| format!("create {}", tests_dir.display()))?;
        let dest = tests_dir.join(test_script_name(utility));
        fs::copy(&script, &dest)
            .with_context(|| format!("copy {} to {}", script.display(), dest.display()))?;
        report.installed.push(utility.clone());

        let makefile = tests_dir.join("Makefile");
        if !makefile.exists() {
            write_text_atomic(&makefile, &makefile_text(utility))?;
            report.makefiles.push(utility.clone());
        }
    }
    tracing::info!(
        installed = report.installed.len(),
        makefiles = report.makefiles.len(),
        "scripts installed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenConfig;
    use crate::staging::write_json_atomic;
    use std::collections::BTreeMap;

    #[test]
    fn installs_script_and_writes_makefile_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path().to_path_buf(), &GenConfig::default());
        let index = BTreeMap::from([("ls".to_string(), "bin/ls".to_string())]);
        write_json_atomic(&paths.groff_index_path(), &index).expect("index");
        write_text_atomic(&paths.test_script_path("ls"), "# ls\n").expect("script");
        write_text_atomic(&paths.test_script_path("date"), "# date\n").expect("script");

        let utilities = vec!["ls".to_string(), "date".to_string(), "cat".to_string()];
        let report = install_scripts(&paths, &utilities).expect("install");
        assert_eq!(report.installed, vec!["ls"]);
        assert_eq!(report.makefiles, vec!["ls"]);
        assert_eq!(report.unplaced, vec!["date"]);

        let tests_dir = paths.src_root().join("bin/ls/tests");
        assert_eq!(
            fs::read_to_string(tests_dir.join("ls_test.sh")).expect("read"),
            "# ls\n"
        );
        let makefile = fs::read_to_string(tests_dir.join("Makefile")).expect("makefile");
        assert!(makefile.contains("ATF_TESTS_SH=\tls_test\n"));

        fs::write(tests_dir.join("Makefile"), "custom\n").expect("write");
        let report = install_scripts(&paths, &utilities).expect("reinstall");
        assert!(report.makefiles.is_empty());
        assert_eq!(
            fs::read_to_string(tests_dir.join("Makefile")).expect("read"),
            "custom\n"
        );
    }
}
