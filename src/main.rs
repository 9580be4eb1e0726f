use anyhow::{Context, Result};
use atf_gen::cli::{ask_number, ask_yes_no, RootArgs};
use atf_gen::config::load_config;
use atf_gen::exec::ActiveProbe;
use atf_gen::fetch::refresh_cache;
use atf_gen::install::install_scripts;
use atf_gen::license::{current_year, render_license, resolve_owner};
use atf_gen::orchestrate::{Orchestrator, RunOptions};
use atf_gen::paths::WorkspacePaths;
use clap::Parser;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "ATFGEN_LOG";
const INTERRUPTED_EXIT_CODE: i32 = 130;

fn main() -> Result<()> {
    init_tracing();
    let args = RootArgs::parse();
    let root = std::env::current_dir().context("resolve working directory")?;
    let config = load_config(&root)?;
    let paths = WorkspacePaths::new(root, &config);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();

    if ask_yes_no(&mut input, &mut out, "Refresh the manual page cache?")? {
        let report = refresh_cache(&paths, &config.sections)?;
        println!(
            "Cached {} manual pages ({} utilities already have tests)",
            report.copied.len(),
            report.tested.len()
        );
    }
    let batch_limit = if ask_yes_no(&mut input, &mut out, "Run in batch mode?")? {
        Some(ask_number(&mut input, &mut out, "Number of utilities to process")?)
    } else {
        None
    };

    let scratch = tempfile::Builder::new()
        .prefix("atfgen-")
        .tempdir()
        .context("create scratch directory")?;
    let active = ActiveProbe::default();
    install_interrupt_handler(active.clone(), scratch.path().to_path_buf())?;

    let owner = resolve_owner(args.name.as_deref());
    let license = render_license(&owner, current_year());
    let orchestrator = Orchestrator::new(&config, &paths, scratch.path(), &license, active);
    let summary = orchestrator.run(RunOptions { batch_limit }, &mut out)?;
    println!(
        "Generated {} tests ({} failed, {} skipped); summary in {}",
        summary.generated.len(),
        summary.failed.len(),
        summary.skipped.len(),
        paths.summary_path().display()
    );

    if !summary.generated.is_empty()
        && ask_yes_no(&mut input, &mut out, "Install the generated tests into the source tree?")?
    {
        let utilities: Vec<String> = summary
            .generated
            .iter()
            .map(|entry| entry.utility.clone())
            .collect();
        let report = install_scripts(&paths, &utilities)?;
        println!(
            "Installed {} tests ({} new Makefiles)",
            report.installed.len(),
            report.makefiles.len()
        );
    }

    scratch.close().context("remove scratch directory")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Stop the running probe and drop the scratch directory on Ctrl-C.
fn install_interrupt_handler(active: ActiveProbe, scratch: PathBuf) -> Result<()> {
    ctrlc::set_handler(move || {
        active.terminate();
        let _ = std::fs::remove_dir_all(&scratch);
        eprintln!("\nInterrupted");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
    .context("install interrupt handler")
}
