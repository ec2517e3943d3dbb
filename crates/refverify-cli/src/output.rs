//! Plain-text rendering of results and summaries.

use std::fmt::Write as _;

use owo_colors::OwoColorize;
use refverify_core::{CheckStats, Severity, Status, VerificationResult};

pub struct Printer {
    color: bool,
}

impl Printer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn tag(&self, status: Status) -> String {
        let label = format!("[{}]", status.label().to_uppercase());
        if !self.color {
            return label;
        }
        match status {
            Status::Verified => label.green().to_string(),
            Status::Warning => label.yellow().to_string(),
            Status::Error => label.red().bold().to_string(),
            Status::Unverified => label.magenta().to_string(),
        }
    }

    /// One reference: status line, then one indented line per discrepancy.
    pub fn result(&self, index: usize, total: usize, result: &VerificationResult) -> String {
        let title = if result.title.trim().is_empty() {
            "(untitled)"
        } else {
            result.title.as_str()
        };
        let mut out = format!("{} {}/{} {}", self.tag(result.status), index + 1, total, title);
        if let Some(source) = &result.source {
            let via = format!("via {source}");
            if self.color {
                let _ = write!(out, " ({})", via.dimmed());
            } else {
                let _ = write!(out, " ({via})");
            }
        }
        for d in &result.discrepancies {
            let bullet = match (d.severity, self.color) {
                (Severity::Error, true) => "x".red().to_string(),
                (Severity::Warning, true) => "!".yellow().to_string(),
                (Severity::Error, false) => "x".to_string(),
                (Severity::Warning, false) => "!".to_string(),
            };
            let _ = write!(out, "\n    {bullet} {}", d.message);
        }
        if let Some(url) = &result.canonical_url {
            let _ = write!(out, "\n    {url}");
        }
        out
    }

    pub fn summary(&self, stats: &CheckStats) -> String {
        let counts = [
            (Status::Verified, stats.verified),
            (Status::Warning, stats.warning),
            (Status::Error, stats.error),
            (Status::Unverified, stats.unverified),
        ];
        let parts: Vec<String> = counts
            .iter()
            .map(|(status, n)| format!("{} {n}", self.tag(*status)))
            .collect();
        format!("Checked {} references: {}", stats.completed, parts.join("  "))
    }
}
