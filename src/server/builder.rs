//! Server builder and `run_server` entry point: loads configuration, wires the
//! [`Manager`], and starts the HTTP listener — the binary's only job (§1: "CLI/launch
//! glue beyond a minimal binary entry point" is explicitly out of scope).

use super::HttpListener;
use crate::config::Config;
use crate::core::manager::Manager;
use crate::storage::{ConfigRepository, DurableTrackerStore, JsonFileConfigStore, NdjsonTrackerStore};
use crate::utils::error::Result;
use crate::utils::log_buffer::LogBuffer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "config/endpoints.json";
const DEFAULT_TRACKER_PATH: &str = "data/requests.ndjson";

/// `JsonFileConfigStore` persists a bare endpoint array, while `config_path` holds the
/// full `{manager, endpoints}` document — the two are different shapes, so the store
/// gets its own sibling file rather than sharing `config_path` (§4.I, §4.J).
fn endpoints_store_path(config_path: &Path) -> PathBuf {
    config_path.with_file_name("endpoints_store.json")
}

/// Load configuration from `config_path`, build the [`Manager`] against a file-backed
/// config store and an ndjson tracker store rooted in `working_dir`, and run the HTTP
/// listener until the process is terminated.
pub async fn run_server_with(config_path: impl AsRef<Path>, log_buffer: Arc<LogBuffer>) -> Result<()> {
    let config_path = config_path.as_ref();
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::from_file(config_path).await?;

    let listen_addr = config.manager.listen_addr.clone();

    let store = JsonFileConfigStore::new(endpoints_store_path(config_path));
    // First boot against this config file: seed the store with the endpoint list just
    // loaded so the first CRUD mutation or `reload_config` does not see an empty file.
    store.seed_if_absent(&config.endpoints).await?;
    let config_repo: Arc<dyn ConfigRepository> = Arc::new(store);
    let tracker_store: Arc<dyn DurableTrackerStore> = Arc::new(NdjsonTrackerStore::new(DEFAULT_TRACKER_PATH));

    let manager = Manager::new(config, Some(config_repo), tracker_store, log_buffer)?;
    manager.start();

    let listener = HttpListener::new(manager.clone(), listen_addr);
    let result = listener.run().await;
    manager.shutdown().await;
    result
}

/// Load configuration from the default working-directory path (§6: "a working
/// directory containing the config store and durable tracker store").
pub async fn run_server(log_buffer: Arc<LogBuffer>) -> Result<()> {
    run_server_with(DEFAULT_CONFIG_PATH, log_buffer).await
}
