pub mod chat;
pub mod config_cmd;
pub mod sessions;

use codecrab_config::AppConfig;
use codecrab_session::{SessionStore, StoreConfig};

/// Open the session store described by `[sessions]`.
pub async fn open_store(
    config: &AppConfig,
) -> Result<SessionStore, Box<dyn std::error::Error>> {
    let store_config = StoreConfig {
        max_sessions: config.sessions.max_sessions,
        max_age: config.sessions.max_age(),
        queue_capacity: config.sessions.queue_capacity,
    };
    Ok(SessionStore::open(config.sessions.resolved_dir(), store_config).await?)
}
