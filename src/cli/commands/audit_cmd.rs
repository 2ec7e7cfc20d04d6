//! `dukpt audit` — display the audit log.
//!
//! Usage:
//!   dukpt audit               # show last 50 entries
//!   dukpt audit --last 20     # show last 20
//!   dukpt audit --since 7d    # entries from last 7 days

use chrono::Utc;

use crate::audit::{SqliteAuditLog, StoredAuditEntry};
use crate::cli::{keystore_dir, output, Cli};
use crate::errors::{DukptError, Result};

/// Execute the `audit` command.
pub fn execute(cli: &Cli, last: usize, since: Option<&str>) -> Result<()> {
    let audit = SqliteAuditLog::open(&keystore_dir(cli)?)?;

    let since_dt = match since {
        Some(s) => Some(parse_duration(s)?),
        None => None,
    };

    let entries = audit.query(last, since_dt)?;

    if entries.is_empty() {
        output::info("No audit entries found.");
        return Ok(());
    }

    print_audit_table(&entries);

    Ok(())
}

/// Parse a human-friendly duration string like "7d", "24h", "30m".
fn parse_duration(input: &str) -> Result<chrono::DateTime<Utc>> {
    let input = input.trim();

    let (num_str, unit) = if let Some(s) = input.strip_suffix('d') {
        (s, 'd')
    } else if let Some(s) = input.strip_suffix('h') {
        (s, 'h')
    } else if let Some(s) = input.strip_suffix('m') {
        (s, 'm')
    } else {
        return Err(DukptError::CommandFailed(format!(
            "invalid duration '{input}' — use format like 7d, 24h, or 30m"
        )));
    };

    let num: i64 = num_str.parse().map_err(|_| {
        DukptError::CommandFailed(format!(
            "invalid duration '{input}' — number part is not valid"
        ))
    })?;

    let duration = match unit {
        'd' => chrono::Duration::days(num),
        'h' => chrono::Duration::hours(num),
        'm' => chrono::Duration::minutes(num),
        _ => unreachable!(),
    };

    Ok(Utc::now() - duration)
}

/// Print audit entries in a formatted table.
fn print_audit_table(entries: &[StoredAuditEntry]) {
    use comfy_table::{ContentArrangement, Table};
    use console::style;

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Time", "Operation", "KSN", "Usage", "Outcome"]);

    for entry in entries {
        let time = entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        let ksn = entry.ksn.as_deref().unwrap_or("-");
        let usage = entry.usage.as_deref().unwrap_or("-");

        table.add_row(vec![
            time,
            entry.operation.clone(),
            ksn.to_string(),
            usage.to_string(),
            colorize_outcome(&entry.outcome),
        ]);
    }

    println!(
        "{}",
        style(format!("{} audit entries:", entries.len())).bold()
    );
    println!("{table}");
}

/// Colorize outcome codes for display.
fn colorize_outcome(outcome: &str) -> String {
    use console::style;

    match outcome {
        "OK" => style(outcome).green().to_string(),
        "SECURITY_VIOLATION" => style(outcome).red().bold().to_string(),
        "REPLAY_DETECTED" | "COUNTER_OVERFLOW" => style(outcome).red().to_string(),
        "HSM_UNAVAILABLE" | "AUDIT_UNAVAILABLE" => style(outcome).yellow().to_string(),
        _ => style(outcome).magenta().to_string(),
    }
}
