//! Application state wiring the store, the coordinator, and configuration.
//!
//! `AppState` is what the CLI needs: the session store and config.
//! `ServerState` adds the running coordinator and the fan-out router for the
//! HTTP and WebSocket handlers.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use livedesk_core::chat::memory::InMemoryChatRepository;
use livedesk_core::coordinator::{spawn_coordinator, CoordinatorHandle, SessionCoordinator};
use livedesk_core::directory::StaticUserDirectory;
use livedesk_core::event::router::EventRouter;
use livedesk_infra::config::load_global_config;
use livedesk_infra::filesystem::{ensure_data_dir, resolve_data_dir};
use livedesk_infra::sqlite::chat::SqliteChatRepository;
use livedesk_infra::sqlite::pool::{database_url, DatabasePool};
use livedesk_infra::sqlite::user::SqliteUserDirectory;
use livedesk_types::config::GlobalConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::{Directory, SessionStore};

/// Shared application state used by CLI commands and the server.
#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub users: Directory,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB.
    ///
    /// With `ephemeral`, nothing is read from or written to disk besides
    /// `config.toml`.
    pub async fn init(ephemeral: bool) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        let config = load_global_config(&data_dir).await;

        let (store, users) = if ephemeral {
            tracing::info!("using in-memory session store");
            (
                SessionStore::Memory(InMemoryChatRepository::new()),
                Directory::Static(StaticUserDirectory::default()),
            )
        } else {
            ensure_data_dir(&data_dir).await?;
            let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
            (
                SessionStore::Sqlite(SqliteChatRepository::new(db_pool.clone())),
                Directory::Sqlite(SqliteUserDirectory::new(db_pool)),
            )
        };

        Ok(Self {
            store,
            users,
            config: Arc::new(config),
            data_dir,
        })
    }
}

/// State shared by the HTTP and WebSocket handlers of a running server.
#[derive(Clone)]
pub struct ServerState {
    pub app: AppState,
    pub coordinator: CoordinatorHandle,
    pub events: Arc<EventRouter>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    /// Recover persisted sessions and start the coordinator task.
    pub async fn start(
        app: AppState,
        cancel: CancellationToken,
    ) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let events = Arc::new(EventRouter::new(app.config.connection_buffer));
        let mut coordinator =
            SessionCoordinator::new(app.store.clone(), app.users.clone(), Arc::clone(&events))
                .with_waiting_ttl(app.config.waiting_ttl());

        let report = coordinator.recover().await?;
        tracing::info!(
            backend = app.store.backend_name(),
            resumed = report.resumed,
            interrupted = report.interrupted,
            "session store ready"
        );

        let (coordinator, join) = spawn_coordinator(
            coordinator,
            app.config.sweep_interval(),
            app.config.command_buffer,
            cancel,
        );

        Ok((
            Self {
                app,
                coordinator,
                events,
                started_at: Utc::now(),
            },
            join,
        ))
    }
}
