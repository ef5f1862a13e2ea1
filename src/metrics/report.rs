use std::fmt::Write as _;

use chrono::{DateTime, Local, Utc};

use super::MetricsSummary;

/// Render a live summary as a sectioned plain-text report.
pub fn render_report(summary: &MetricsSummary, now: DateTime<Utc>) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Metrics Report - {}\n",
        now.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );

    // ── 1. Endpoint performance ─────────────────────────────────
    out.push_str("1. Endpoint Performance\n-------------------\n");
    for (endpoint, stats) in &summary.endpoints {
        let _ = writeln!(out, "\n{endpoint} Endpoint:");
        let _ = writeln!(out, "- Total Requests: {}", stats.total_requests);
        let _ = writeln!(
            out,
            "- Average Response Time: {:.2}ms",
            stats.avg_response_time * 1000.0
        );
        let distribution = stats
            .status_distribution
            .iter()
            .map(|(code, n)| format!("{code}: {n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "- Status Distribution: {{{distribution}}}");
        let _ = writeln!(out, "- Alert Count: {}", stats.alert_count);
        if let Some(last) = stats.last_request_time {
            let _ = writeln!(out, "- Last Request: {}", last.to_rfc3339());
        }
    }

    // ── 2. System metrics ───────────────────────────────────────
    out.push_str("\n2. System Metrics\n--------------\nCurrent State:\n");
    match &summary.system_metrics.current {
        Some(current) => {
            let _ = writeln!(out, "- CPU Usage: {}%", current.cpu_percent);
            let _ = writeln!(out, "- Memory Usage: {:.2} MB", current.memory_usage_mb);
        }
        None => out.push_str("- No system samples recorded yet\n"),
    }
    let trends = &summary.system_metrics.trends;
    if let Some(slope) = trends.memory_change_per_hour {
        let _ = writeln!(out, "- Memory Trend: {slope:.2} MB/hour");
    }
    if let Some(cpu) = trends.cpu_average {
        let _ = writeln!(out, "- Average CPU: {cpu:.2}%");
    }

    // ── 3. Alerts ───────────────────────────────────────────────
    out.push_str("\n3. Alert History\n-------------\n");
    let _ = writeln!(out, "Total Alerts: {}", summary.alerts.total_alerts);
    out.push_str("Recent Alerts:\n");
    for alert in &summary.alerts.recent_alerts {
        let _ = writeln!(out, "- {} - {}", alert.timestamp.to_rfc3339(), alert.message);
    }

    // ── 4. Server ───────────────────────────────────────────────
    out.push_str("\n4. Server Information\n------------------\n");
    let _ = writeln!(out, "- Uptime: {:.2} seconds", summary.general.uptime_seconds);
    let _ = writeln!(out, "- Start Time: {}", summary.general.start_time.to_rfc3339());

    out
}
