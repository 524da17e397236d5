//! Output formatting utilities for the CLI
//!
//! Tables for the history ledger and node status, the end-of-run summary,
//! and the colored pass/fail lines operators read while a run progresses.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use sd_core::types::short_commit;
use sd_core::RunStatus;
use sd_orchestrator::{DeploymentRun, HistoryEntry, StatusReport};

/// Format ledger entries as an ASCII table
///
/// Bypassed (ungated) promotions are marked in their own column so they stand
/// out in audits.
pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No deployments recorded".to_string();
    }

    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "DEPLOY ID")]
        id: String,
        #[tabled(rename = "TIME")]
        time: String,
        #[tabled(rename = "STAGE")]
        stage: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "COMMIT")]
        commit: String,
        #[tabled(rename = "BYPASS")]
        bypass: String,
        #[tabled(rename = "MESSAGE")]
        message: String,
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            id: e.deploy_id.clone(),
            time: e.timestamp.clone(),
            stage: e.stage.to_string(),
            status: e.status.to_string(),
            commit: e
                .commit
                .as_deref()
                .map(|c| short_commit(c).to_string())
                .unwrap_or_else(|| "-".to_string()),
            bypass: if e.bypass { "yes".to_string() } else { String::new() },
            message: truncate(&e.message, 60),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(140))
        .to_string()
}

/// Summary printed when a run ends
pub fn format_run(run: &DeploymentRun) -> String {
    let mut output = String::new();

    output.push_str(&format!("Deployment {}: {}\n", run.id, run.status));
    if let Some(commit) = run.commit() {
        output.push_str(&format!("Commit: {}\n", short_commit(commit)));
    }
    if run.bypass {
        output.push_str("Sentinel gate: BYPASSED\n");
    }
    for node in &run.nodes {
        let moved = match (&node.previous_commit, &node.deployed_commit) {
            (Some(before), Some(after)) => format!("{} -> {}", short_commit(before), short_commit(after)),
            (None, Some(after)) => short_commit(after).to_string(),
            _ => "unchanged".to_string(),
        };
        output.push_str(&format!(
            "  {} ({}): {}{}\n",
            node.node,
            node.role,
            moved,
            if node.rebuilt { ", containers rebuilt" } else { "" }
        ));
    }
    for gate in &run.gates {
        output.push_str(&format!(
            "  [{}] {}: {}\n",
            if gate.passed { "pass" } else { "FAIL" },
            gate.subject,
            gate.message
        ));
    }
    if let Some(secs) = run.duration_secs {
        output.push_str(&format!("Duration: {}\n", format_duration(secs)));
    }

    output
}

/// Format the status report
pub fn format_status(status: &StatusReport) -> String {
    #[derive(Tabled)]
    struct NodeRow {
        #[tabled(rename = "NODE")]
        name: String,
        #[tabled(rename = "ROLE")]
        role: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "VIA")]
        transport: String,
        #[tabled(rename = "MODE")]
        isolation: String,
        #[tabled(rename = "LIVE COMMIT")]
        commit: String,
        #[tabled(rename = "HEALTH")]
        health: String,
    }

    let mut output = String::new();
    output.push_str(&format!(
        "Last successful deploy: {}\n",
        status.last_success.as_deref().map(short_commit).unwrap_or("none")
    ));
    if let Some(last) = &status.last_run {
        output.push_str(&format!(
            "Last run: {} ({} at {})\n",
            last.deploy_id, last.status, last.stage
        ));
    }

    let rows: Vec<NodeRow> = status
        .nodes
        .iter()
        .map(|n| NodeRow {
            name: n.name.clone(),
            role: n.role.to_string(),
            address: n.address.clone(),
            transport: n.transport.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
            isolation: n.isolation.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string()),
            commit: n
                .live_commit
                .as_deref()
                .map(|c| short_commit(c).to_string())
                .or_else(|| n.error.as_deref().map(|e| truncate(e, 40)))
                .unwrap_or_else(|| "-".to_string()),
            health: if n.healthy { "healthy" } else { "unhealthy" }.to_string(),
        })
        .collect();
    output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
    output.push('\n');

    output
}

/// One-line verdict for the terminal status of a run
pub fn print_verdict(run: &DeploymentRun) {
    let message = match (&run.error, run.status) {
        (Some(error), _) => format!("{} ({})", run.status, error.message),
        (None, status) => status.to_string(),
    };
    match run.status {
        RunStatus::Success | RunStatus::DryRun | RunStatus::TestOnly => print_success(&message),
        RunStatus::RolledBack => print_warning(&message),
        _ => print_error(&message),
    }
}

/// Format duration in human-readable form
fn format_duration(secs: f64) -> String {
    let whole = secs.round() as u64;
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if whole < 3600 {
        format!("{}m {}s", whole / 60, whole % 60)
    } else {
        format!("{}h {}m", whole / 3600, (whole % 3600) / 60)
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
