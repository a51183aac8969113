//! Ordered heuristic matchers over build tool output.
//!
//! Each matcher scans the full combined output and returns the lines (or
//! blocks) it considers failure-relevant. Matchers are ordered most-specific
//! first; extraction preserves that order when joining results.

use std::sync::OnceLock;

use regex_lite::Regex;

/// One entry in the matcher table.
pub struct Matcher {
    /// Short identifier, used in diagnostics and tests.
    pub name: &'static str,
    /// Scan the output and return matched lines/blocks.
    pub run: fn(&str) -> Vec<String>,
}

/// The default, ordered matcher table.
///
/// Order matters: failure markers and explicit error lines outrank the
/// generic "could not / cannot / failed / not found" net.
pub fn default_matchers() -> &'static [Matcher] {
    &[
        Matcher {
            name: "failure-marker",
            run: failure_marker_lines,
        },
        Matcher {
            name: "explicit-error",
            run: explicit_error_lines,
        },
        Matcher {
            name: "what-went-wrong",
            run: what_went_wrong_block,
        },
        Matcher {
            name: "diagnostic",
            run: diagnostic_lines,
        },
    ]
}

fn explicit_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // No leading word boundary: "exception" is usually an identifier
        // suffix (java.lang.NullPointerException:).
        Regex::new(r"(?i)(error|exception):").unwrap_or_else(|e| {
            // Pattern is a compile-time constant; this cannot fail.
            panic!("invalid built-in pattern: {e}")
        })
    })
}

fn diagnostic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(could not|cannot|failed|not found)\b").unwrap_or_else(|e| {
            panic!("invalid built-in pattern: {e}")
        })
    })
}

/// Gradle-style top-level failure markers (`FAILURE: Build failed ...`).
fn failure_marker_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.trim_start().starts_with("FAILURE:"))
        .map(|l| l.trim().to_string())
        .collect()
}

/// Lines carrying an explicit `error:` / `Error:` / `Exception:` marker.
fn explicit_error_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| explicit_error_re().is_match(l))
        .map(|l| l.trim().to_string())
        .collect()
}

/// Gradle's "What went wrong" block, captured up to the next top-level
/// `* ` section marker (usually `* Try:`). The whole block counts as a
/// single match so the cap is not eaten by one stack of context lines.
fn what_went_wrong_block(output: &str) -> Vec<String> {
    let mut block = Vec::new();
    let mut in_block = false;

    for line in output.lines() {
        if line.trim_start().starts_with("* What went wrong") {
            in_block = true;
            continue;
        }
        if in_block {
            if line.trim_start().starts_with("* ") {
                break;
            }
            if !line.trim().is_empty() {
                block.push(line.trim_end().to_string());
            }
        }
    }

    if block.is_empty() {
        Vec::new()
    } else {
        vec![block.join("\n")]
    }
}

/// Generic diagnostic net: "could not / cannot / failed / not found" lines.
fn diagnostic_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| diagnostic_re().is_match(l))
        .map(|l| l.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_marker() {
        let output = "ok\nFAILURE: Build failed with an exception.\nmore\n";
        let hits = failure_marker_lines(output);
        assert_eq!(hits, vec!["FAILURE: Build failed with an exception."]);
    }

    #[test]
    fn test_explicit_error_case_insensitive() {
        let output = "Error: bad thing\nerror: worse thing\nwarning: fine\n";
        let hits = explicit_error_lines(output);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_exception_lines_match() {
        let output = "java.lang.NullPointerException: at Foo.bar\nException: boom\n";
        let hits = explicit_error_lines(output);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_what_went_wrong_stops_at_next_section() {
        let output = "\
* What went wrong:
Execution failed for task ':app:compileReleaseJavaWithJavac'.
> Compilation failed; see the compiler error output for details.

* Try:
> Run with --stacktrace option.
";
        let hits = what_went_wrong_block(output);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].contains("Execution failed"));
        assert!(!hits[0].contains("--stacktrace"));
    }

    #[test]
    fn test_what_went_wrong_absent() {
        assert!(what_went_wrong_block("nothing here\n").is_empty());
    }

    #[test]
    fn test_diagnostic_lines() {
        let output = "\
> Could not resolve com.example:lib:1.0.
Task 'assembleFoo' not found in root project.
All good here.
";
        let hits = diagnostic_lines(output);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_matcher_table_order() {
        let names: Vec<_> = default_matchers().iter().map(|m| m.name).collect();
        assert_eq!(
            names,
            vec![
                "failure-marker",
                "explicit-error",
                "what-went-wrong",
                "diagnostic"
            ]
        );
    }
}
