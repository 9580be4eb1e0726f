//! Drives generation across every cached manual page.
//!
//! Utilities are processed one at a time. Each generation pass runs on its
//! own worker thread so a utility whose options all probe slowly can be
//! abandoned after `utility_timeout` without stalling the rest of the run.
use crate::annotations::Annotations;
use crate::config::GenConfig;
use crate::exec::{ActiveProbe, Executor, ShellSpawnError};
use crate::generate::{generate_script, GeneratedScript, GenerationCancelled, GenerationRequest};
use crate::manpage::OptionTable;
use crate::paths::{manpage_file_pattern, WorkspacePaths};
use crate::staging::{move_file, remove_if_exists, write_json_atomic, write_text_atomic};
use crate::synth::UtilityDescriptor;
use crate::util::{display_path, now_epoch_ms};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Cached manual page of one utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManPage {
    pub utility: UtilityDescriptor,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Batch mode: process at most this many utilities and move the pages
    /// of failed ones to the failed holding area. Skipped utilities do not
    /// count.
    pub batch_limit: Option<usize>,
}

impl RunOptions {
    pub fn is_batch(&self) -> bool {
        self.batch_limit.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UtilityNote {
    pub utility: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedEntry {
    pub utility: String,
    pub script: String,
    pub cases: usize,
    pub probes: usize,
}

/// Outcome of one run, persisted as `summary.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub finished_at_epoch_ms: u128,
    pub batch: bool,
    pub generated: Vec<GeneratedEntry>,
    pub failed: Vec<UtilityNote>,
    pub skipped: Vec<UtilityNote>,
}

impl RunSummary {
    fn skip(&mut self, utility: &str, reason: impl Into<String>) {
        self.skipped.push(UtilityNote {
            utility: utility.to_string(),
            reason: reason.into(),
        });
    }

    fn fail(&mut self, utility: &str, reason: impl Into<String>) {
        self.failed.push(UtilityNote {
            utility: utility.to_string(),
            reason: reason.into(),
        });
    }
}

/// Manual pages named `<utility>.<section>` for the configured sections.
///
/// Directory-listing order, unless `curated` names the utilities to process
/// and their order.
pub fn discover_manpages(
    groff_dir: &Path,
    sections: &[String],
    curated: &[String],
) -> Result<Vec<ManPage>> {
    let pattern = manpage_file_pattern(sections)?;
    let entries = fs::read_dir(groff_dir).with_context(|| {
        format!(
            "open manual page directory {} (refresh the cache first)",
            groff_dir.display()
        )
    })?;
    let mut pages = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read {}", groff_dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(captures) = pattern.captures(file_name) else {
            continue;
        };
        let utility = UtilityDescriptor::new(&captures[1], &captures[2]);
        pages.push(ManPage { utility, path });
    }
    if curated.is_empty() {
        return Ok(pages);
    }

    let mut ordered = Vec::with_capacity(curated.len());
    for name in curated {
        match pages.iter().position(|page| page.utility.name == *name) {
            Some(index) => ordered.push(pages.swap_remove(index)),
            None => tracing::warn!(utility = %name, "no cached manual page, skipping"),
        }
    }
    Ok(ordered)
}

enum WorkerEvent {
    Progress(usize, usize),
    Finished(Result<GeneratedScript>),
}

/// Shared, read-only inputs of a run.
pub struct Orchestrator<'a> {
    config: &'a GenConfig,
    paths: &'a WorkspacePaths,
    scratch_dir: PathBuf,
    table: Arc<OptionTable>,
    license: Arc<str>,
    active: ActiveProbe,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a GenConfig,
        paths: &'a WorkspacePaths,
        scratch_dir: &Path,
        license: &str,
        active: ActiveProbe,
    ) -> Self {
        Self {
            config,
            paths,
            scratch_dir: scratch_dir.to_path_buf(),
            table: Arc::new(config.option_table()),
            license: Arc::from(license),
            active,
        }
    }

    /// Generate scripts for every discovered utility and write the summary.
    ///
    /// Errors on setup failures and when probe shells cannot be started;
    /// per-utility problems are recorded in the returned summary.
    pub fn run(&self, options: RunOptions, out: &mut impl Write) -> Result<RunSummary> {
        let pages = discover_manpages(
            self.paths.groff_dir(),
            &self.config.sections,
            &self.config.utilities,
        )?;
        let tests_dir = self.paths.tests_dir();
        if !tests_dir.is_dir() {
            fs::create_dir_all(tests_dir)
                .with_context(|| format!("create output directory {}", tests_dir.display()))?;
            writeln!(out, "Directory created: {}", tests_dir.display())?;
        }
        tracing::info!(utilities = pages.len(), batch = options.is_batch(), "starting run");

        let mut summary = RunSummary {
            batch: options.is_batch(),
            ..RunSummary::default()
        };
        let probe_path = self.config.probe_path();
        let mut processed = 0;
        for page in &pages {
            if options.batch_limit.is_some_and(|limit| processed >= limit) {
                tracing::info!(processed, "batch limit reached");
                break;
            }
            let name = page.utility.name.as_str();
            if which::which_in(name, probe_path.as_deref(), &self.scratch_dir).is_err() {
                writeln!(out, "Skipping {}: not installed", page.utility.with_section())?;
                summary.skip(name, "utility not found on PATH");
                continue;
            }
            let script_path = self.paths.test_script_path(name);
            if self.config.skip_existing && script_path.exists() {
                writeln!(out, "Skipping {}: test exists", page.utility.with_section())?;
                summary.skip(name, "test script already exists");
                continue;
            }
            processed += 1;
            self.process(page, &script_path, options, &mut summary, out)?;
        }

        summary.finished_at_epoch_ms = now_epoch_ms()?;
        write_json_atomic(&self.paths.summary_path(), &summary)?;
        Ok(summary)
    }

    fn process(
        &self,
        page: &ManPage,
        script_path: &Path,
        options: RunOptions,
        summary: &mut RunSummary,
        out: &mut impl Write,
    ) -> Result<()> {
        let utility = &page.utility;
        let label = format!("Generating test for: {} ...", utility.with_section());
        write!(out, "{label}")?;
        out.flush()?;

        let start = Instant::now();
        let outcome = self.run_worker(page, &label, out);
        let elapsed_ms = start.elapsed().as_millis();
        match outcome {
            Ok(Some(script)) => {
                write_text_atomic(script_path, &script.text)?;
                writeln!(out, " Successful")?;
                tracing::info!(
                    utility = %utility.name,
                    elapsed_ms,
                    cases = script.case_names.len(),
                    "generated"
                );
                summary.generated.push(GeneratedEntry {
                    utility: utility.name.clone(),
                    script: display_path(script_path, Some(self.paths.root())),
                    cases: script.case_names.len(),
                    probes: script.probes,
                });
            }
            Ok(None) => {
                self.discard(page, script_path, options, out)?;
                tracing::warn!(utility = %utility.name, elapsed_ms, "generation timed out");
                summary.fail(&utility.name, "generation timed out");
            }
            Err(err) if err.downcast_ref::<ShellSpawnError>().is_some() => {
                writeln!(out, " Aborted")?;
                tracing::error!(utility = %utility.name, error = %err, "cannot start probe shell");
                return Err(err.context("generation run aborted"));
            }
            Err(err) => {
                self.discard(page, script_path, options, out)?;
                tracing::warn!(
                    utility = %utility.name,
                    elapsed_ms,
                    error = %err,
                    "generation failed"
                );
                summary.fail(&utility.name, format!("{err:#}"));
            }
        }
        Ok(())
    }

    /// `Ok(None)` when the worker ran out of time.
    fn run_worker(
        &self,
        page: &ManPage,
        label: &str,
        out: &mut impl Write,
    ) -> Result<Option<GeneratedScript>> {
        let bytes = fs::read(&page.path).with_context(|| format!("read {}", page.path.display()))?;
        let manpage = String::from_utf8_lossy(&bytes).into_owned();
        let annotations = Annotations::load(self.paths.annotations_dir(), &page.utility.name)?;
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let utility = page.utility.clone();
        let table = Arc::clone(&self.table);
        let license = Arc::clone(&self.license);
        let worker_cancel = Arc::clone(&cancel);
        let mut executor = Executor::new(
            self.scratch_dir.clone(),
            self.config.probe_timeout(),
            self.config.env.clone(),
        )
        .with_active_probe(self.active.clone());
        let handle = thread::Builder::new()
            .name(format!("generate-{}", utility.name))
            .spawn(move || {
                let request = GenerationRequest {
                    utility: &utility,
                    manpage: &manpage,
                    table: &table,
                    annotations: &annotations,
                    license: &license,
                };
                let progress_tx = tx.clone();
                let result =
                    generate_script(&request, &mut executor, &worker_cancel, |done, total| {
                        let _ = progress_tx.send(WorkerEvent::Progress(done, total));
                    });
                let _ = tx.send(WorkerEvent::Finished(result));
            })
            .context("spawn generation worker")?;

        let deadline = Instant::now() + self.config.utility_timeout();
        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(WorkerEvent::Progress(done, total)) => {
                    write!(out, "\r{label} [{done}/{total}]")?;
                    out.flush()?;
                }
                Ok(WorkerEvent::Finished(result)) => break result.map(Some),
                Err(RecvTimeoutError::Timeout) => {
                    cancel.store(true, Ordering::SeqCst);
                    self.active.terminate();
                    break Ok(None);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(anyhow!("generation worker exited without a result"));
                }
            }
        };
        if handle.join().is_err() {
            tracing::error!(utility = %page.utility.name, "generation worker panicked");
        }
        match outcome {
            Err(err) if err.downcast_ref::<GenerationCancelled>().is_some() => Ok(None),
            other => other,
        }
    }

    fn discard(
        &self,
        page: &ManPage,
        script_path: &Path,
        options: RunOptions,
        out: &mut impl Write,
    ) -> Result<()> {
        writeln!(out, " Failed!")?;
        remove_if_exists(script_path)?;
        if options.is_batch() {
            let file_name = page
                .path
                .file_name()
                .ok_or_else(|| anyhow!("manual page path has no file name"))?;
            let dest = self.paths.failed_dir().join(file_name);
            move_file(&page.path, &dest)?;
            tracing::info!(
                utility = %page.utility.name,
                dest = %display_path(&dest, Some(self.paths.root())),
                "moved manual page to failed area"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), ".Dd\n").expect("write page");
    }

    #[test]
    fn discovery_filters_by_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["ls.1", "mount.8", "printf.3", "index.json", "a.b.1"] {
            touch(dir.path(), name);
        }
        fs::create_dir(dir.path().join("sub.1")).expect("mkdir");
        let sections = vec!["1".to_string(), "8".to_string()];
        let mut found: Vec<String> = discover_manpages(dir.path(), &sections, &[])
            .expect("discover")
            .into_iter()
            .map(|page| page.utility.with_section())
            .collect();
        found.sort();
        assert_eq!(found, vec!["a.b(1)", "ls(1)", "mount(8)"]);
    }

    #[test]
    fn curated_list_sets_order_and_drops_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["cat.1", "ls.1", "date.1"] {
            touch(dir.path(), name);
        }
        let sections = vec!["1".to_string()];
        let curated = vec!["ls".to_string(), "nope".to_string(), "cat".to_string()];
        let names: Vec<String> = discover_manpages(dir.path(), &sections, &curated)
            .expect("discover")
            .into_iter()
            .map(|page| page.utility.name)
            .collect();
        assert_eq!(names, vec!["ls", "cat"]);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sections = vec!["1".to_string()];
        let err = discover_manpages(&dir.path().join("groff"), &sections, &[])
            .expect_err("missing dir");
        assert!(format!("{err:#}").contains("refresh the cache"));
    }
}
