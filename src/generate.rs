//! One generation pass: manual page in, test script text out.
use crate::annotations::Annotations;
use crate::exec::{Executor, ProbeProcess, ProbeResult};
use crate::manpage::{extract_options, OptionRelation, OptionTable};
use crate::synth::{shared_usage_output, Classification, ScriptBuilder, UtilityDescriptor};
use anyhow::Result;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs a utility invocation and reports what it did.
pub trait Prober {
    fn probe(&mut self, command: &str) -> Result<ProbeResult>;
}

impl<P: ProbeProcess> Prober for Executor<P> {
    fn probe(&mut self, command: &str) -> Result<ProbeResult> {
        self.execute(command)
    }
}

/// The pass stopped because its cancel flag was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationCancelled;

impl fmt::Display for GenerationCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("generation cancelled")
    }
}

impl std::error::Error for GenerationCancelled {}

pub struct GenerationRequest<'a> {
    pub utility: &'a UtilityDescriptor,
    pub manpage: &'a str,
    pub table: &'a OptionTable,
    pub annotations: &'a Annotations,
    pub license: &'a str,
}

#[derive(Debug, Clone)]
pub struct GeneratedScript {
    pub text: String,
    pub case_names: Vec<String>,
    pub probes: usize,
    pub usage_hoisted: bool,
}

struct ProbeRun<'a, R: Prober, F: FnMut(usize, usize)> {
    prober: &'a mut R,
    cancel: &'a AtomicBool,
    progress: F,
    done: usize,
    total: usize,
}

impl<R: Prober, F: FnMut(usize, usize)> ProbeRun<'_, R, F> {
    fn run(&mut self, command: &str) -> Result<ProbeResult> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(GenerationCancelled.into());
        }
        let result = self.prober.probe(command)?;
        self.done += 1;
        (self.progress)(self.done, self.total);
        Ok(result)
    }
}

/// Probe every option of one utility and render its script.
///
/// `progress` receives `(probed, total)` after each probe. Raising `cancel`
/// makes the pass stop before its next probe with [`GenerationCancelled`].
pub fn generate_script<R, F>(
    request: &GenerationRequest<'_>,
    prober: &mut R,
    cancel: &AtomicBool,
    progress: F,
) -> Result<GeneratedScript>
where
    R: Prober,
    F: FnMut(usize, usize),
{
    let utility = request.utility;
    let extracted = extract_options(request.manpage, request.table);
    let known: Vec<&OptionRelation> = extracted
        .known
        .iter()
        .copied()
        .filter(|relation| !request.annotations.excludes(&relation.token))
        .collect();
    let mut seen = BTreeSet::new();
    let candidates: Vec<&str> = extracted
        .candidates
        .iter()
        .map(String::as_str)
        .filter(|option| !request.annotations.excludes(option))
        .filter(|option| seen.insert(*option))
        .collect();
    let with_no_arguments = !request.annotations.skips_no_arguments();

    let total = known.len() + candidates.len() + usize::from(with_no_arguments);
    tracing::debug!(
        utility = %utility.name,
        known = known.len(),
        candidates = candidates.len(),
        skipped = extracted.total() - known.len() - candidates.len(),
        "options extracted"
    );
    let mut run = ProbeRun {
        prober,
        cancel,
        progress,
        done: 0,
        total,
    };
    let mut builder = ScriptBuilder::new(utility.clone(), request.license);

    for relation in &known {
        let result = run.run(&utility.invocation(Some(relation.token.as_str())))?;
        builder.add_known(relation, &result);
    }

    let mut probed = Vec::with_capacity(candidates.len());
    for &option in &candidates {
        let result = run.run(&utility.invocation(Some(option)))?;
        probed.push((option, result));
    }
    builder.set_usage_output(shared_usage_output(probed.iter().map(|(_, result)| result)));

    let mut rejected = 0;
    for (option, result) in &probed {
        if builder.add_probed(option, result) == Classification::Negative {
            rejected += 1;
        }
    }
    tracing::debug!(utility = %utility.name, rejected, "probed options classified");

    if with_no_arguments {
        let result = run.run(&utility.invocation(None))?;
        builder.add_no_arguments(&result);
    }

    Ok(GeneratedScript {
        text: builder.render(),
        case_names: builder.case_names(),
        probes: run.done,
        usage_hoisted: builder.usage_output().is_some(),
    })
}
