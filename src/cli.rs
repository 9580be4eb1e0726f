//! Command-line arguments and the interactive prompts.
//!
//! Everything except the copyright owner is asked for on stdin, so the
//! prompt helpers take any reader and writer.
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};

#[derive(Parser, Debug)]
#[command(
    name = "atfgen",
    version,
    about = "Generate atf-sh regression tests for utilities from their manual pages"
)]
pub struct RootArgs {
    /// Copyright owner written into generated license headers
    #[arg(long, value_name = "OWNER")]
    pub name: Option<String>,
}

/// Ask a yes/no question until answered; end of input counts as "no".
pub fn ask_yes_no<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    question: &str,
) -> Result<bool> {
    loop {
        write!(out, "{question} (y/n): ")?;
        out.flush()?;
        let Some(answer) = read_answer(input)? else {
            writeln!(out)?;
            return Ok(false);
        };
        match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(out, "Please answer 'y' or 'n'.")?,
        }
    }
}

/// Ask for a positive count until one is given.
pub fn ask_number<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    question: &str,
) -> Result<usize> {
    loop {
        write!(out, "{question}: ")?;
        out.flush()?;
        let answer = read_answer(input)?
            .ok_or_else(|| anyhow!("input closed while waiting for a number"))?;
        match answer.parse::<usize>() {
            Ok(count) if count > 0 => return Ok(count),
            _ => writeln!(out, "Please enter a positive number.")?,
        }
    }
}

fn read_answer<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let read = input.read_line(&mut line).context("read answer from stdin")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
