//! Clone statistics and their user-facing rendering.

use crate::{
    domain::MessageRange,
    formatting::{escape_html, truncate_one_line},
};

/// Sample errors kept per report.
pub const MAX_SAMPLE_ERRORS: usize = 5;

const SAMPLE_ERROR_CHARS: usize = 200;

/// Terminal statistics of one clone job.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloneReport {
    pub total_examined: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub sample_errors: Vec<String>,
}

impl CloneReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub(crate) fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = true;
        self.abort_reason = Some(reason.into());
    }

    /// Record an item failure, keeping at most `MAX_SAMPLE_ERRORS` samples.
    pub(crate) fn record_failure(&mut self, id: i32, detail: &str) {
        self.failed += 1;
        if self.sample_errors.len() < MAX_SAMPLE_ERRORS {
            let line = format!("message {id}: {detail}");
            self.sample_errors
                .push(truncate_one_line(&line, SAMPLE_ERROR_CHARS));
        }
    }
}

pub fn render_found(total: usize, range: Option<MessageRange>) -> String {
    match range {
        Some(r) => format!(
            "📊 Found {total} messages to clone (IDs {} - {})...",
            r.start().0,
            r.end().0
        ),
        None => format!("📊 Found {total} messages to clone..."),
    }
}

pub fn render_progress(report: &CloneReport) -> String {
    format!(
        "📤 Progress: {}/{} (✅ {} | ❌ {} | ⏭️ {})",
        report.processed(),
        report.total_examined,
        report.succeeded,
        report.failed,
        report.skipped
    )
}

/// Final HTML summary. Titles are plain text and get escaped here.
pub fn render_final(report: &CloneReport, source: &str, destination: &str) -> String {
    if report.aborted {
        let reason = report.abort_reason.as_deref().unwrap_or("Unknown error");
        let mut out = format!(
            "❌ <b>Clone Aborted</b>\n\n{}\n\n<b>Partial Stats:</b>\n\
             • Total found: {}\n• Cloned: {}\n• Failed: {}\n• Skipped: {}",
            escape_html(reason),
            report.total_examined,
            report.succeeded,
            report.failed,
            report.skipped
        );
        push_samples(&mut out, report);
        return out;
    }

    let mut out = format!(
        "✅ <b>Clone Complete!</b>\n\n📤 Source: {}\n📥 Destination: {}\n\n<b>Stats:</b>\n\
         • Total: {}\n• ✅ Cloned: {}\n• ❌ Failed: {}\n• ⏭️ Skipped: {}",
        escape_html(source),
        escape_html(destination),
        report.total_examined,
        report.succeeded,
        report.failed,
        report.skipped
    );
    push_samples(&mut out, report);
    out
}

fn push_samples(out: &mut String, report: &CloneReport) {
    if report.sample_errors.is_empty() {
        return;
    }
    out.push_str("\n\n<b>Errors:</b>");
    for e in &report.sample_errors {
        out.push_str("\n• ");
        out.push_str(&escape_html(e));
    }
}
