//! Plain-text report, used for the completion mail and `shrev report`.

#![allow(missing_docs)]

use std::fmt::Write as _;

use crate::report::summary::Summary;

/// Subject line for the completion message.
#[must_use]
pub fn subject(summary: &Summary) -> String {
    let t = &summary.totals;
    if t.blocked > 0 {
        format!(
            "Share revocation complete: {} removed, {} need manual review",
            t.removed, t.blocked
        )
    } else {
        format!("Share revocation complete: {} removed", t.removed)
    }
}

/// Render the full report body.
#[must_use]
pub fn render_text(summary: &Summary) -> String {
    let mut out = String::new();
    let t = &summary.totals;
    let elapsed = summary.finished_at - summary.started_at;

    let _ = writeln!(out, "SHARE REVOCATION REPORT");
    let _ = writeln!(out, "=======================");
    let _ = writeln!(out, "Started:   {}", summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Finished:  {}", summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(
        out,
        "Duration:  {}m {}s over {} batches",
        elapsed.num_minutes(),
        elapsed.num_seconds() % 60,
        summary.batch_count
    );
    let _ = writeln!(out, "Addresses: {}", summary.targets.join(", "));
    out.push('\n');

    let _ = writeln!(out, "TOTALS");
    let _ = writeln!(out, "  Files processed:      {}", t.processed);
    let _ = writeln!(out, "  Permissions removed:  {}", t.removed);
    let _ = writeln!(out, "  Blocked (manual):     {}", t.blocked);
    let _ = writeln!(out, "  Skipped (no access):  {}", t.skipped);
    let _ = writeln!(out, "  Errors:               {}", t.errors);
    out.push('\n');

    let _ = writeln!(out, "BY ADDRESS");
    for (address, s) in &summary.by_email {
        let _ = writeln!(
            out,
            "  {address}: found {}, removed {}, blocked {}, skipped {}, errors {}",
            s.files_found, s.removed, s.blocked, s.skipped, s.errors
        );
    }

    if !summary.by_type.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "BY FILE TYPE");
        for (category, s) in &summary.by_type {
            let _ = writeln!(
                out,
                "  {category}: {} files, {} removed, {} blocked",
                s.files, s.removed, s.blocked
            );
        }
    }

    if !summary.manual_review.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "MANUAL REVIEW REQUIRED");
        for (address, cases) in &summary.manual_review {
            let _ = writeln!(out, "  {address}:");
            for case in cases {
                let _ = writeln!(out, "    - {} ({}) {}", case.file_name, case.role, case.link);
                if !case.message.is_empty() {
                    let _ = writeln!(out, "      reason: {}", case.message);
                }
            }
        }
    }

    if summary.log_entries_dropped > 0 {
        out.push('\n');
        let _ = writeln!(
            out,
            "NOTE: {} older log entries were dropped to stay within the log size limit.",
            summary.log_entries_dropped
        );
        if summary.manual_review_truncated() {
            let _ = writeln!(
                out,
                "      {} blocked cases counted, {} listed above.",
                summary.totals.blocked,
                summary.blocked_case_count()
            );
        }
    }

    out
}
