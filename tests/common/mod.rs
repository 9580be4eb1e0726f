//! Shared test infrastructure for integration tests.
//!
//! A `Workspace` is a throwaway generator root with its own manual-page
//! cache and a `bin/` directory of fake utilities written as shell scripts.

use atf_gen::config::GenConfig;
use atf_gen::exec::ActiveProbe;
use atf_gen::orchestrate::{Orchestrator, RunOptions, RunSummary};
use atf_gen::paths::WorkspacePaths;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const LICENSE: &str = "#\n# test license\n#\n\n";

pub struct Workspace {
    dir: TempDir,
    scratch: TempDir,
    pub config: GenConfig,
}

/// Output of one orchestrator run.
pub struct RunOutput {
    pub summary: RunSummary,
    pub stdout: String,
}

impl Workspace {
    pub fn create() -> Self {
        let dir = tempfile::tempdir().expect("workspace tempdir");
        let scratch = tempfile::tempdir().expect("scratch tempdir");
        let bin_dir = dir.path().join("bin");
        fs::create_dir_all(&bin_dir).expect("create bin dir");

        let mut config = GenConfig {
            probe_timeout_ms: 1000,
            utility_timeout_secs: 20,
            ..GenConfig::default()
        };
        config.env.insert(
            "PATH".to_string(),
            format!("{}:/bin:/usr/bin", bin_dir.display()),
        );
        Self {
            dir,
            scratch,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> WorkspacePaths {
        WorkspacePaths::new(self.root().to_path_buf(), &self.config)
    }

    /// Install an executable `bin/<name>` whose body is `script`.
    pub fn fake_utility(&self, name: &str, script: &str) {
        let path = self.root().join("bin").join(name);
        fs::write(&path, format!("#!/bin/sh\n{script}")).expect("write fake utility");
        let mut perms = fs::metadata(&path).expect("stat").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
    }

    pub fn manpage(&self, name: &str, section: &str, text: &str) -> PathBuf {
        self.manpage_bytes(name, section, text.as_bytes())
    }

    /// Cached page with raw contents, e.g. legacy single-byte encodings.
    pub fn manpage_bytes(&self, name: &str, section: &str, bytes: &[u8]) -> PathBuf {
        let paths = self.paths();
        fs::create_dir_all(paths.groff_dir()).expect("create groff dir");
        let path = paths.groff_dir().join(format!("{name}.{section}"));
        fs::write(&path, bytes).expect("write manpage");
        path
    }

    pub fn annotate(&self, name: &str, text: &str) {
        let paths = self.paths();
        fs::create_dir_all(paths.annotations_dir()).expect("create annotations dir");
        fs::write(paths.annotations_dir().join(format!("{name}_test.annot")), text)
            .expect("write annotations");
    }

    pub fn script(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.paths().test_script_path(name)).ok()
    }

    pub fn run(&self, options: RunOptions) -> RunOutput {
        self.try_run(options).expect("orchestrator run")
    }

    pub fn try_run(&self, options: RunOptions) -> anyhow::Result<RunOutput> {
        self.try_run_in(self.scratch.path(), options)
    }

    /// Run with `scratch` as the working directory of every invocation.
    pub fn try_run_in(&self, scratch: &Path, options: RunOptions) -> anyhow::Result<RunOutput> {
        let paths = self.paths();
        let orchestrator = Orchestrator::new(
            &self.config,
            &paths,
            scratch,
            LICENSE,
            ActiveProbe::default(),
        );
        let mut stdout = Vec::new();
        let summary = orchestrator.run(options, &mut stdout)?;
        Ok(RunOutput {
            summary,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
        })
    }
}

/// `mdoc` option list with one entry per `(option, description)`.
pub fn option_list(options: &[(&str, &str)]) -> String {
    let mut text = String::from(".Dd January 1, 2024\n.Dt FAKE 1\n.Sh DESCRIPTION\n.Bl -tag -width Ds\n");
    for (option, description) in options {
        text.push_str(&format!(".It Fl {option}\n{description}\n"));
    }
    text.push_str(".El\n");
    text
}
