//! Data directory layout for Livedesk.
//!
//! The data directory holds `config.toml` and the SQLite session database.

use std::path::{Path, PathBuf};

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `LIVEDESK_DATA_DIR` environment variable
/// 2. `~/.livedesk` under the user's home directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LIVEDESK_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".livedesk");
    }

    // Last resort: current directory
    PathBuf::from(".livedesk")
}

/// Create the data directory if it does not exist yet.
pub async fn ensure_data_dir(data_dir: &Path) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(data_dir).await
}
