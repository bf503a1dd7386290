//! Session history CLI commands: list, show.
//!
//! Reads straight from the session store, so it works whether or not a
//! server is running against the same data directory.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use uuid::Uuid;

use livedesk_core::chat::repository::ChatRepository;
use livedesk_types::chat::{SenderKind, SessionStatus};

use crate::state::AppState;

/// List persisted sessions with visitor, agent, age, and status.
///
/// # Examples
///
/// ```bash
/// livedesk sessions list
/// livedesk sessions list --status waiting --json
/// ```
pub async fn list_sessions(
    state: &AppState,
    status: Option<&str>,
    limit: i64,
    json: bool,
) -> Result<()> {
    let status = status
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let sessions = state.store.list_sessions(status, Some(limit), None).await?;

    if json {
        let snapshots: Vec<_> = sessions.iter().map(|s| s.snapshot()).collect();
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!();
        println!(
            "  {} No sessions found. Start the server with: {}",
            style("i").blue().bold(),
            style("livedesk serve").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Visitor").fg(Color::White),
        Cell::new("Agent").fg(Color::White),
        Cell::new("Created").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
        Cell::new("Entries").fg(Color::White),
        Cell::new("Status").fg(Color::White),
    ]);

    for session in &sessions {
        let agent = session
            .agent
            .as_ref()
            .map(|a| a.display_name.as_str())
            .unwrap_or("-");

        let status_cell = match session.status {
            SessionStatus::Waiting => Cell::new("waiting").fg(Color::Yellow),
            SessionStatus::Active => Cell::new("active").fg(Color::Green),
            SessionStatus::Closed => Cell::new("closed").fg(Color::DarkGrey),
        };

        table.add_row(vec![
            Cell::new(session.id.to_string()).fg(Color::DarkGrey),
            Cell::new(session.visitor.identity.as_str()).fg(Color::Cyan),
            Cell::new(agent).fg(Color::White),
            Cell::new(session.created_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::White),
            Cell::new(format_duration(session.updated_at - session.created_at))
                .fg(Color::DarkGrey),
            Cell::new(session.transcript.len().to_string()).fg(Color::White),
            status_cell,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} session{}",
        style(sessions.len()).bold(),
        if sessions.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

/// Print one session and its transcript.
///
/// # Examples
///
/// ```bash
/// livedesk sessions show <session-id>
/// ```
pub async fn show_session(state: &AppState, id: &str, json: bool) -> Result<()> {
    let session_id: Uuid = id
        .parse()
        .with_context(|| format!("Invalid session ID '{id}'"))?;

    let session = state
        .store
        .get_session(&session_id)
        .await?
        .with_context(|| format!("Session '{session_id}' not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
        return Ok(());
    }

    println!();
    println!(
        "  Session {}  {}",
        style(session.id).cyan().bold(),
        style(session.status).bold()
    );
    println!("  Visitor: {}", session.visitor.identity);
    if let Some(agent) = &session.agent {
        println!("  Agent:   {} ({})", agent.display_name, agent.identity);
    }
    println!(
        "  Created: {}",
        session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(reason) = &session.closed_reason {
        println!("  Ended:   {reason}");
    }
    println!();

    for entry in &session.transcript {
        let label = match entry.sender_kind {
            SenderKind::Visitor => style("visitor").cyan(),
            SenderKind::Agent => style("agent").green(),
            SenderKind::System => style("system").dim(),
        };
        println!(
            "  {} {:>8}  {}",
            style(entry.timestamp.format("%H:%M:%S")).dim(),
            label,
            entry.text
        );
    }
    println!();

    Ok(())
}

/// Format a chrono Duration as a human-readable string.
fn format_duration(duration: chrono::TimeDelta) -> String {
    let total_secs = duration.num_seconds().max(0);
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", total_secs)
    }
}
