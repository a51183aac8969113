//! Failure-summary extraction for native build tool output.
//!
//! Gradle and Flutter emit thousands of lines per build; a human operator
//! needs the handful that actually explain a failure. This crate runs an
//! ordered set of heuristic matchers over the combined stdout/stderr of a
//! failed invocation and produces a bounded, de-duplicated summary. The
//! heuristics are best-effort, not authoritative: when nothing matches, the
//! tail of the output is used instead.
//!
//! The matcher list is an ordered table (see [`matchers::default_matchers`])
//! so new tool output formats can be added without touching the extraction
//! control flow.

pub mod matchers;

use serde::{Deserialize, Serialize};

use matchers::default_matchers;

/// Bounds applied to the extracted summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Maximum number of matched lines/blocks kept (default: 10).
    pub max_matches: usize,

    /// Number of trailing non-blank lines used when nothing matches
    /// (default: 20).
    pub fallback_lines: usize,

    /// Maximum length of the final message in characters (default: 1500).
    pub max_message_len: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_matches: 10,
            fallback_lines: 20,
            max_message_len: 1500,
        }
    }
}

/// Run every matcher in order and collect de-duplicated hits.
///
/// Order is preserved, and de-duplication works at line granularity: a line
/// captured inside an earlier multi-line block is not re-emitted when a
/// later matcher returns it on its own.
pub fn collect_matches(output: &str, config: &ExtractConfig) -> Vec<String> {
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut hits = Vec::new();

    for matcher in default_matchers() {
        for hit in (matcher.run)(output) {
            if hits.len() >= config.max_matches {
                return hits;
            }
            let lines: Vec<&str> = hit.lines().map(str::trim).collect();
            if lines.iter().all(|l| seen.contains(*l)) {
                continue;
            }
            for line in &lines {
                seen.insert((*line).to_string());
            }
            hits.push(hit);
        }
    }

    hits
}

/// Extract a bounded failure summary from combined build tool output.
///
/// If any matcher hits, the hits are joined; otherwise the last
/// `fallback_lines` non-blank lines are used. The result is truncated to
/// `max_message_len` characters. The caller is expected to append a pointer
/// to the full persisted log for deep debugging.
pub fn extract_failure_summary(output: &str, config: &ExtractConfig) -> String {
    let hits = collect_matches(output, config);

    let message = if hits.is_empty() {
        tail_lines(output, config.fallback_lines)
    } else {
        hits.join("\n")
    };

    truncate_chars(&message, config.max_message_len)
}

/// Last `n` non-blank lines of `output`, joined with newlines.
pub fn tail_lines(output: &str, n: usize) -> String {
    let mut lines: Vec<&str> = output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    if lines.len() > n {
        lines = lines.split_off(lines.len() - n);
    }
    lines.join("\n")
}

/// Truncate to at most `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
