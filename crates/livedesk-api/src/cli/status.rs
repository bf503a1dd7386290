//! System status command.

use anyhow::Result;
use console::style;

use livedesk_core::chat::repository::ChatRepository;
use livedesk_types::chat::SessionStatus;

use crate::state::AppState;

/// Display data directory, store backend, and session counts by status.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let mut counts = Vec::new();
    for status in [SessionStatus::Waiting, SessionStatus::Active, SessionStatus::Closed] {
        let n = state.store.list_sessions(Some(status), None, None).await?.len();
        counts.push((status, n));
    }

    if json {
        let sessions: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(status, n)| (status.to_string(), serde_json::json!(n)))
            .collect();
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "store": state.store.backend_name(),
            "waiting_ttl_secs": state.config.waiting_ttl_secs,
            "sessions": sessions,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Livedesk v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("  Data dir:    {}", style(state.data_dir.display()).cyan());
    println!("  Store:       {}", state.store.backend_name());
    let ttl = match state.config.waiting_ttl() {
        Some(ttl) => format!("{}s", ttl.as_secs()),
        None => "disabled".to_string(),
    };
    println!("  Waiting TTL: {ttl}");
    println!();
    for (status, n) in counts {
        println!("  {:<8} {}", status.to_string(), style(n).bold());
    }
    println!();

    Ok(())
}
