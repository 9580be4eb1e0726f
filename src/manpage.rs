//! Option discovery from mdoc manual pages.
//!
//! Option entries in a manual page look like `.It Fl x` followed by free text
//! describing the option. An option is only classified once its description
//! is complete, i.e. when the next marker (or the end of the page) is
//! reached, so classification lags one entry behind the scan.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker introducing an option definition line.
pub const OPTION_MARKER: &str = ".It Fl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    Short,
    Long,
}

/// An option whose successful usage output is already characterized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionRelation {
    pub kind: OptionKind,
    pub token: String,
    /// Substring expected in the option's description in the manual page.
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OptionRelation {
    pub fn short(token: &str, keyword: &str) -> Self {
        Self {
            kind: OptionKind::Short,
            token: token.to_string(),
            keyword: keyword.to_string(),
            description: None,
        }
    }
}

/// Lookup table of known options keyed by token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionTable {
    entries: BTreeMap<String, OptionRelation>,
}

impl OptionTable {
    /// Build the table with the built-in entries plus `extra` (later entries
    /// replace earlier ones with the same token).
    pub fn new(extra: &[OptionRelation]) -> Self {
        let mut entries = BTreeMap::new();
        for relation in builtin_relations().into_iter().chain(extra.iter().cloned()) {
            entries.insert(relation.token.clone(), relation);
        }
        Self { entries }
    }

    pub fn get(&self, token: &str) -> Option<&OptionRelation> {
        self.entries.get(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OptionTable {
    fn default() -> Self {
        Self::new(&[])
    }
}

fn builtin_relations() -> Vec<OptionRelation> {
    vec![
        OptionRelation::short("h", "help"),
        OptionRelation::short("v", "version"),
    ]
}

/// Partition of a manual page's options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedOptions<'a> {
    /// Options matched against the table, in page order.
    pub known: Vec<&'a OptionRelation>,
    /// Options whose behavior has to be probed, in page order.
    pub candidates: Vec<String>,
}

impl ExtractedOptions<'_> {
    pub fn total(&self) -> usize {
        self.known.len() + self.candidates.len()
    }
}

/// The most recently seen option together with the text written after its
/// marker line.
struct PendingOption {
    token: String,
    description: String,
}

/// Scan `text` for option markers and split the options into known and
/// candidate sets.
pub fn extract_options<'a>(text: &str, table: &'a OptionTable) -> ExtractedOptions<'a> {
    let mut extracted = ExtractedOptions::default();
    let mut pending: Option<PendingOption> = None;

    for line in text.lines() {
        let Some(marker_at) = line.find(OPTION_MARKER) else {
            if let Some(pending) = pending.as_mut() {
                pending.description.push_str(line);
                pending.description.push('\n');
            }
            continue;
        };

        let Some(token) = option_token(line, marker_at) else {
            continue;
        };

        if let Some(previous) = pending.take() {
            settle(previous, table, &mut extracted);
        }
        pending = Some(PendingOption {
            token: token.to_string(),
            description: String::new(),
        });
    }

    if let Some(previous) = pending {
        settle(previous, table, &mut extracted);
    }
    extracted
}

/// Token following the marker up to the next space, if any.
fn option_token(line: &str, marker_at: usize) -> Option<&str> {
    let start = marker_at + OPTION_MARKER.len() + 1;
    if start > line.len() {
        // Trailing marker, e.g. tset(1) documents a bare "-".
        return None;
    }
    let rest = line.get(start..)?;
    let token = rest.split(' ').next().unwrap_or_default();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

fn settle<'a>(
    option: PendingOption,
    table: &'a OptionTable,
    extracted: &mut ExtractedOptions<'a>,
) {
    match table.get(&option.token) {
        Some(relation) if option.description.contains(&relation.keyword) => {
            extracted.known.push(relation);
        }
        _ => extracted.candidates.push(option.token),
    }
}
