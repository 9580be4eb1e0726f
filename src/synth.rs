//! atf-sh test script synthesis from probe results.
//!
//! Every probed option ends up either as its own positive test case (the
//! utility accepted the option) or as one line of the aggregated
//! `invalid_usage` case (the utility answered with a usage message or had
//! to be terminated).
use crate::exec::ProbeResult;
use crate::manpage::OptionRelation;
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Prefix (compared case-insensitively) identifying a usage message.
pub const USAGE_MARKER: &str = "usage:";
/// Shell variable holding a usage message shared by several cases.
pub const USAGE_VARIABLE: &str = "usage_output";
pub const INVALID_USAGE_CASE: &str = "invalid_usage";
pub const NO_ARGUMENTS_CASE: &str = "no_arguments";

/// Usage outputs sampled by the consistency check.
const MAX_USAGE_SAMPLES: usize = 3;

/// Utility under test, e.g. `date(1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtilityDescriptor {
    pub name: String,
    pub section: String,
}

impl UtilityDescriptor {
    pub fn new(name: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            section: section.into(),
        }
    }

    /// `name(section)` as used in test descriptions.
    pub fn with_section(&self) -> String {
        format!("{}({})", self.name, self.section)
    }

    /// Shell invocation of the utility with an optional single option.
    pub fn invocation(&self, option: Option<&str>) -> String {
        let name = shell_words::quote(&self.name);
        match option {
            Some(option) => format!("{name} {}", shell_words::quote(&format!("-{option}"))),
            None => name.into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Exit 0 expected, output checked on stdout.
    Positive,
    /// Non-zero exit expected, output checked on stderr.
    Negative,
}

pub fn is_usage_message(output: &str) -> bool {
    output
        .get(..USAGE_MARKER.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(USAGE_MARKER))
}

/// A usage message or a timeout makes the invocation a failure; the exit
/// status is not consulted otherwise.
pub fn classify(result: &ProbeResult) -> Classification {
    if result.timed_out || is_usage_message(&result.output) {
        Classification::Negative
    } else {
        Classification::Positive
    }
}

/// Usage message worth hoisting into [`USAGE_VARIABLE`].
///
/// Only the first few usage outputs are sampled and each one is compared
/// with its cyclic successor; the first identical pair wins. Duplicates
/// outside the sample are not detected.
pub fn shared_usage_output<'a, I>(results: I) -> Option<String>
where
    I: IntoIterator<Item = &'a ProbeResult>,
{
    let samples: Vec<&str> = results
        .into_iter()
        .map(|result| result.output.as_str())
        .filter(|output| is_usage_message(output))
        .take(MAX_USAGE_SAMPLES)
        .collect();
    if samples.len() < 2 {
        return None;
    }
    (0..samples.len())
        .find(|&j| samples[j] == samples[(j + 1) % samples.len()])
        .map(|j| samples[j].to_string())
}

#[derive(Debug, Clone)]
struct TestCase {
    name: String,
    description: String,
    body: Vec<String>,
}

/// Accumulates test cases for one utility and renders the script.
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    utility: UtilityDescriptor,
    license: String,
    usage_output: Option<String>,
    known: Vec<TestCase>,
    probed: Vec<TestCase>,
    invalid_usage: Vec<String>,
    no_arguments: Option<TestCase>,
    names: BTreeSet<String>,
}

impl ScriptBuilder {
    pub fn new(utility: UtilityDescriptor, license: impl Into<String>) -> Self {
        Self {
            utility,
            license: license.into(),
            usage_output: None,
            known: Vec::new(),
            probed: Vec::new(),
            invalid_usage: Vec::new(),
            no_arguments: None,
            names: BTreeSet::new(),
        }
    }

    pub fn set_usage_output(&mut self, usage: Option<String>) {
        self.usage_output = usage;
    }

    pub fn usage_output(&self) -> Option<&str> {
        self.usage_output.as_deref()
    }

    /// Positive case for an option from the known-option table, unless the
    /// invocation had to be terminated.
    pub fn add_known(&mut self, relation: &OptionRelation, result: &ProbeResult) {
        if result.timed_out {
            let line = self.failure_check(Some(&relation.token), result);
            self.invalid_usage.push(line);
            return;
        }
        let description = relation
            .description
            .clone()
            .unwrap_or_else(|| option_description(&relation.token));
        let case = self.positive_case(&relation.token, description, result);
        if let Some(case) = case {
            self.known.push(case);
        }
    }

    /// Positive case or invalid-usage line for a probed option.
    pub fn add_probed(&mut self, option: &str, result: &ProbeResult) -> Classification {
        let classification = classify(result);
        match classification {
            Classification::Negative => {
                let line = self.failure_check(Some(option), result);
                self.invalid_usage.push(line);
            }
            Classification::Positive => {
                if let Some(case) = self.positive_case(option, option_description(option), result)
                {
                    self.probed.push(case);
                }
            }
        }
        classification
    }

    /// The utility invoked without any arguments.
    pub fn add_no_arguments(&mut self, result: &ProbeResult) -> Classification {
        let utility = self.utility.with_section();
        let classification = classify(result);
        let (description, check) = match classification {
            Classification::Negative if result.timed_out => (
                format!("Verify that {utility} does not complete when no arguments are supplied"),
                self.failure_check(None, result),
            ),
            Classification::Negative => (
                format!(
                    "Verify that {utility} fails and generates a valid usage message when no arguments are supplied"
                ),
                self.failure_check(None, result),
            ),
            Classification::Positive => {
                let description = if result.output.is_empty() {
                    format!(
                        "Verify that {utility} executes successfully and silently when invoked without any arguments"
                    )
                } else {
                    format!(
                        "Verify that {utility} executes successfully and produces a valid output when invoked without any arguments"
                    )
                };
                (description, self.success_check(None, result))
            }
        };
        self.no_arguments = Some(TestCase {
            name: NO_ARGUMENTS_CASE.to_string(),
            description,
            body: vec![check],
        });
        classification
    }

    pub fn has_cases(&self) -> bool {
        !self.case_names().is_empty()
    }

    /// Case names in definition (and registration) order.
    pub fn case_names(&self) -> Vec<String> {
        self.ordered_cases()
            .iter()
            .map(|case| case.name.clone())
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.license);
        if let Some(usage) = &self.usage_output {
            let _ = writeln!(
                out,
                "{USAGE_VARIABLE}={}\n",
                single_quoted(&atf_escape(usage))
            );
        }

        let cases = self.ordered_cases();
        for case in &cases {
            render_case(&mut out, case);
        }

        out.push_str("atf_init_test_cases()\n{\n");
        for case in &cases {
            let _ = writeln!(out, "\tatf_add_test_case {}", case.name);
        }
        out.push_str("}\n");
        out
    }

    fn ordered_cases(&self) -> Vec<TestCase> {
        let mut cases: Vec<TestCase> = Vec::new();
        cases.extend(self.known.iter().cloned());
        cases.extend(self.probed.iter().cloned());
        if !self.invalid_usage.is_empty() {
            cases.push(TestCase {
                name: INVALID_USAGE_CASE.to_string(),
                description:
                    "Verify that an invalid usage with a supported option produces a valid error message"
                        .to_string(),
                body: self.invalid_usage.clone(),
            });
        }
        cases.extend(self.no_arguments.iter().cloned());
        cases
    }

    fn positive_case(
        &mut self,
        option: &str,
        description: String,
        result: &ProbeResult,
    ) -> Option<TestCase> {
        let name = case_name(option);
        if !self.names.insert(name.clone()) {
            tracing::debug!(utility = %self.utility.name, option, "duplicate option skipped");
            return None;
        }
        Some(TestCase {
            name,
            description,
            body: vec![self.success_check(Some(option), result)],
        })
    }

    fn success_check(&self, option: Option<&str>, result: &ProbeResult) -> String {
        if !result.succeeded() {
            tracing::warn!(
                utility = %self.utility.name,
                option = option.unwrap_or(""),
                exit_code = result.exit_code,
                "accepted invocation exited non-zero"
            );
        }
        format!(
            "atf_check -s exit:0 -o {} {}",
            self.output_matcher(&result.output),
            self.utility.invocation(option)
        )
    }

    fn failure_check(&self, option: Option<&str>, result: &ProbeResult) -> String {
        let status = if (1..128).contains(&result.exit_code) {
            format!("exit:{}", result.exit_code)
        } else {
            "not-exit:0".to_string()
        };
        format!(
            "atf_check -s {status} -e {} {}",
            self.output_matcher(&result.output),
            self.utility.invocation(option)
        )
    }

    fn output_matcher(&self, output: &str) -> String {
        if self.usage_output.as_deref() == Some(output) {
            return format!("inline:\"${USAGE_VARIABLE}\"");
        }
        if output.is_empty() {
            return "empty".to_string();
        }
        format!("inline:{}", double_quoted(&atf_escape(output)))
    }
}

fn render_case(out: &mut String, case: &TestCase) {
    let _ = writeln!(out, "atf_test_case {}", case.name);
    let _ = writeln!(
        out,
        "{}_head()\n{{\n\tatf_set \"descr\" {}\n}}\n",
        case.name,
        double_quoted(&case.description)
    );
    let _ = writeln!(out, "{}_body()\n{{", case.name);
    for line in &case.body {
        let _ = writeln!(out, "\t{line}");
    }
    out.push_str("}\n\n");
}

fn option_description(option: &str) -> String {
    format!("Verify the usage of option '{option}'")
}

/// Shell function name for an option's test case.
pub fn case_name(option: &str) -> String {
    let sanitized: String = option
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect();
    format!("{sanitized}_flag")
}

/// Escape sequences interpreted by atf-check's `inline:` matcher.
fn atf_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Double-quoted shell word. A backslash is only special inside double
/// quotes before `$`, `` ` ``, `"` or another backslash, so `\n` escapes
/// meant for atf pass through untouched.
fn double_quoted(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        let escape = match ch {
            '"' | '$' | '`' => true,
            '\\' => matches!(chars.peek(), None | Some('\\' | '"' | '$' | '`')),
            _ => false,
        };
        if escape {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

fn single_quoted(text: &str) -> String {
    format!("'{}'", text.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(output: &str, exit_code: i32) -> ProbeResult {
        ProbeResult {
            output: output.to_string(),
            exit_code,
            timed_out: false,
        }
    }

    fn builder(name: &str) -> ScriptBuilder {
        ScriptBuilder::new(UtilityDescriptor::new(name, "1"), "# license\n\n")
    }

    #[test]
    fn usage_marker_is_case_insensitive() {
        assert!(is_usage_message("usage: foo [-x]\n"));
        assert!(is_usage_message("Usage: foo"));
        assert!(is_usage_message("USAGE:"));
        assert!(!is_usage_message("foo: usage: bar"));
        assert!(!is_usage_message("usage"));
        assert!(!is_usage_message(""));
    }

    #[test]
    fn silent_utility_gets_only_no_arguments_case() {
        let mut script = builder("sample");
        let classification = script.add_no_arguments(&probe("", 0));
        assert_eq!(classification, Classification::Positive);
        assert_eq!(script.case_names(), vec!["no_arguments"]);

        let text = script.render();
        assert!(text.starts_with("# license\n\n"));
        assert!(text.contains("\tatf_check -s exit:0 -o empty sample\n"));
        assert!(text.contains("executes successfully and silently"));
        assert_eq!(text.matches("atf_test_case ").count(), 1);
        assert!(!text.contains(INVALID_USAGE_CASE));
    }

    #[test]
    fn usage_output_yields_invalid_usage_line() {
        let mut script = builder("foo");
        let classification = script.add_probed("x", &probe("usage: foo [-x]\n", 1));
        assert_eq!(classification, Classification::Negative);
        assert_eq!(script.case_names(), vec!["invalid_usage"]);

        let text = script.render();
        assert!(text.contains(
            "invalid_usage_body()\n{\n\tatf_check -s exit:1 -e inline:\"usage: foo [-x]\\n\" foo -x\n}\n"
        ));
    }

    #[test]
    fn accepted_option_yields_positive_case() {
        let mut script = builder("foo");
        let classification = script.add_probed("q", &probe("", 0));
        assert_eq!(classification, Classification::Positive);
        let text = script.render();
        assert!(text.contains("atf_test_case q_flag\n"));
        assert!(text.contains("\tatf_set \"descr\" \"Verify the usage of option 'q'\"\n"));
        assert!(text.contains("\tatf_check -s exit:0 -o empty foo -q\n"));
    }

    #[test]
    fn non_usage_failure_is_still_positive() {
        // The usage prefix decides; the exit status only confirms.
        let mut script = builder("foo");
        let classification = script.add_probed("z", &probe("foo: bad things\n", 2));
        assert_eq!(classification, Classification::Positive);
        assert_eq!(script.case_names(), vec!["z_flag"]);
    }

    #[test]
    fn unusual_exit_codes_use_not_exit() {
        let mut script = builder("foo");
        script.add_probed("p", &probe("usage: foo -p", 143));
        assert!(script.render().contains("atf_check -s not-exit:0 -e"));
    }

    fn timed_out(output: &str) -> ProbeResult {
        ProbeResult {
            output: output.to_string(),
            exit_code: 143,
            timed_out: true,
        }
    }

    #[test]
    fn terminated_invocation_is_a_failure() {
        let mut script = builder("login");
        let classification = script.add_probed("p", &timed_out("Password:"));
        assert_eq!(classification, Classification::Negative);
        script.add_known(&OptionRelation::short("h", "help"), &timed_out(""));
        assert_eq!(script.case_names(), vec!["invalid_usage"]);

        let text = script.render();
        assert!(text.contains("\tatf_check -s not-exit:0 -e inline:\"Password:\" login -p\n"));
        assert!(text.contains("\tatf_check -s not-exit:0 -e empty login -h\n"));
        assert!(!text.contains("-s exit:0"));
    }

    #[test]
    fn terminated_no_arguments_run_is_a_failure() {
        let mut script = builder("login");
        let classification = script.add_no_arguments(&timed_out("login: "));
        assert_eq!(classification, Classification::Negative);
        let text = script.render();
        assert!(text.contains("does not complete when no arguments are supplied"));
        assert!(text.contains("\tatf_check -s not-exit:0 -e inline:\"login: \" login\n"));
    }

    #[test]
    fn known_option_is_always_positive() {
        let mut relation = OptionRelation::short("h", "help");
        let mut script = builder("foo");
        script.add_known(&relation, &probe("usage: foo [-h]\n", 1));
        relation.token = "v".to_string();
        relation.description = Some("Verify that -v prints the version".to_string());
        script.add_known(&relation, &probe("foo 1.0\n", 0));

        assert_eq!(script.case_names(), vec!["h_flag", "v_flag"]);
        let text = script.render();
        assert!(text.contains("\tatf_check -s exit:0 -o inline:\"usage: foo [-h]\\n\" foo -h\n"));
        assert!(text.contains("\tatf_set \"descr\" \"Verify that -v prints the version\"\n"));
    }

    #[test]
    fn identical_usage_messages_are_hoisted_once() {
        let usage = "usage: foo [-ab]\n";
        let results = [probe(usage, 1), probe("ok\n", 0), probe(usage, 1)];
        let shared = shared_usage_output(results.iter());
        assert_eq!(shared.as_deref(), Some(usage));

        let mut script = builder("foo");
        script.set_usage_output(shared);
        script.add_probed("a", &results[0]);
        script.add_probed("c", &results[1]);
        script.add_probed("b", &results[2]);
        script.add_no_arguments(&probe(usage, 1));

        let text = script.render();
        assert_eq!(text.matches("usage_output=").count(), 1);
        assert!(text.contains("usage_output='usage: foo [-ab]\\n'\n\n"));
        assert!(text.contains("\tatf_check -s exit:1 -e inline:\"$usage_output\" foo -a\n"));
        assert!(text.contains("\tatf_check -s exit:1 -e inline:\"$usage_output\" foo -b\n"));
        assert!(text.contains(
            "no_arguments_body()\n{\n\tatf_check -s exit:1 -e inline:\"$usage_output\" foo\n}"
        ));
        assert!(!text.contains("inline:\"usage: foo"));
    }

    #[test]
    fn single_usage_message_is_not_hoisted() {
        let results = [probe("usage: foo\n", 1), probe("", 0)];
        assert_eq!(shared_usage_output(results.iter()), None);
    }

    #[test]
    fn distinct_usage_messages_are_not_hoisted() {
        let results = [probe("usage: a\n", 1), probe("usage: b\n", 1)];
        assert_eq!(shared_usage_output(results.iter()), None);
    }

    #[test]
    fn dedup_samples_only_the_first_usage_outputs() {
        // Known false negative of the cyclic check: a duplicate beyond the
        // sampled outputs goes unnoticed.
        let results = [
            probe("usage: a\n", 1),
            probe("usage: b\n", 1),
            probe("usage: c\n", 1),
            probe("usage: a\n", 1),
        ];
        assert_eq!(shared_usage_output(results.iter()), None);

        // Within the sample every pair is cyclically adjacent.
        let results = [
            probe("usage: a\n", 1),
            probe("usage: b\n", 1),
            probe("usage: a\n", 1),
        ];
        assert_eq!(shared_usage_output(results.iter()).as_deref(), Some("usage: a\n"));
    }

    #[test]
    fn cases_follow_fixed_order() {
        let mut script = builder("foo");
        script.add_no_arguments(&probe("", 0));
        script.add_probed("x", &probe("usage: foo\n", 1));
        script.add_probed("a", &probe("", 0));
        script.add_known(&OptionRelation::short("h", "help"), &probe("help\n", 0));

        let names = script.case_names();
        assert_eq!(names, vec!["h_flag", "a_flag", "invalid_usage", "no_arguments"]);

        let text = script.render();
        let init = text
            .split("atf_init_test_cases()")
            .nth(1)
            .expect("init block");
        assert_eq!(
            init,
            "\n{\n\tatf_add_test_case h_flag\n\tatf_add_test_case a_flag\n\tatf_add_test_case invalid_usage\n\tatf_add_test_case no_arguments\n}\n"
        );
        let positions: Vec<usize> = names
            .iter()
            .map(|name| text.find(&format!("atf_test_case {name}\n")).expect("case"))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn literals_are_escaped_for_the_shell() {
        let mut script = builder("foo");
        script.add_probed("e", &probe("cost: $5 \"quoted\" `tick` back\\slash\n", 0));
        let text = script.render();
        assert!(text.contains(
            "-o inline:\"cost: \\$5 \\\"quoted\\\" \\`tick\\` back\\\\\\slash\\n\" foo -e"
        ));
    }

    #[test]
    fn long_options_get_valid_case_names() {
        assert_eq!(case_name("-libxo"), "_libxo_flag");
        let utility = UtilityDescriptor::new("ls", "1");
        assert_eq!(utility.invocation(Some("-libxo")), "ls --libxo");
        assert_eq!(utility.with_section(), "ls(1)");
    }

    #[test]
    fn repeated_options_define_one_case() {
        let mut script = builder("foo");
        script.add_probed("x", &probe("", 0));
        script.add_probed("x", &probe("", 0));
        assert_eq!(script.case_names(), vec!["x_flag"]);
    }
}
