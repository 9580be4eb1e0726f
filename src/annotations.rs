//! Per-utility annotation files.
//!
//! `<annotations_dir>/<utility>_test.annot` lists options whose output is
//! unstable (`x  flag`) and whether the no-arguments case should be skipped
//! (a line starting with `no_arguments`).
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

const NO_ARGUMENTS_PREFIX: &str = "no_arguments";
const FLAG_WORD: &str = "flag";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    skip_no_arguments: bool,
    options: BTreeSet<String>,
}

impl Annotations {
    pub fn parse(text: &str) -> Self {
        let mut annotations = Self::default();
        for line in text.lines() {
            if line.starts_with(NO_ARGUMENTS_PREFIX) {
                annotations.skip_no_arguments = true;
            } else if line.get(2..2 + FLAG_WORD.len()) == Some(FLAG_WORD) {
                if let Some(token) = line.get(..1) {
                    annotations.options.insert(token.to_string());
                }
            }
        }
        annotations
    }

    /// Load the annotation file for `utility`; a missing file means none.
    pub fn load(annotations_dir: &Path, utility: &str) -> Result<Self> {
        let path = annotations_dir.join(format!("{utility}_test.annot"));
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    pub fn skips_no_arguments(&self) -> bool {
        self.skip_no_arguments
    }

    pub fn excludes(&self, option: &str) -> bool {
        self.options.contains(option)
    }

    pub fn is_empty(&self) -> bool {
        !self.skip_no_arguments && self.options.is_empty()
    }
}
