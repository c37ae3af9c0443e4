mod audio_data;
mod candidate;
mod config;
mod discovery;
mod error;
mod generator;
mod hash;
mod history_store;
mod net;
mod player;
mod preloader;
mod protocol;
mod queue;
mod random_tracks_source;
mod repetition_checker;
mod resolver;
mod server_interface;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::config::Config;
use crate::history_store::{DegradedHistoryStore, HistoryStore, SqliteHistoryStore};
use crate::server_interface::ServerInterface;

const TICK_INTERVAL: Duration = Duration::from_millis(250);

fn initialize_logging() {
    let mut clog = colog::basic_builder();
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        clog.parse_filters(&rust_log);
    } else {
        clog.filter(None, log::LevelFilter::Warn);
        clog.filter(Some("pmp_server"), log::LevelFilter::Info);
    }
    clog.init();
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

/// Opens the configured database, or falls back to degraded mode when the
/// `[database]` section is absent or opening the store fails (spec §6.4).
/// [`HistoryStore::is_degraded`] lets the rest of the server (see
/// `ServerInterface::health`) tell which mode actually won out.
fn open_history_store(config: &Config) -> Arc<dyn HistoryStore> {
    let Some(db) = &config.database else {
        warn!("main: no [database] section configured, running in degraded mode");
        return Arc::new(DegradedHistoryStore::new());
    };
    let data_dir = match dirs::data_dir() {
        Some(dir) => dir.join("pmp-server"),
        None => {
            warn!("main: could not resolve a data directory, running in degraded mode");
            return Arc::new(DegradedHistoryStore::new());
        }
    };
    if let Err(err) = std::fs::create_dir_all(&data_dir) {
        warn!("main: failed to create data directory {}: {}", data_dir.display(), err);
        return Arc::new(DegradedHistoryStore::new());
    }
    let db_path = data_dir.join(format!("{}.sqlite3", db.hostname));
    match SqliteHistoryStore::open(&db_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!(
                "main: failed to open history database {}: {}, running in degraded mode",
                db_path.display(),
                err
            );
            Arc::new(DegradedHistoryStore::new())
        }
    }
}

fn preload_cache_dir() -> PathBuf {
    std::env::temp_dir().join("PMP-preload-cache")
}

async fn run_control_loop(server: Arc<ServerInterface>) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        server.tick(now_ms, now);
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    initialize_logging();
    install_panic_hook();

    let config_path = Config::default_path().unwrap_or_else(|| PathBuf::from("pmp-server.toml"));
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("main: failed to load config from {}: {}", config_path.display(), err);
            Config::default()
        }
    };
    info!("main: server caption = {:?}", config.server_caption);

    let history = open_history_store(&config);

    let server = Arc::new(ServerInterface::new(
        history,
        config.player.default_volume,
        preload_cache_dir(),
        config.media.scan_directories.clone(),
    ));

    server.startup_cleanup();
    server.run_full_indexation().await;

    let discovery_port = config.network.udp_discovery_port;
    let tcp_port = config.network.tcp_port;
    tokio::spawn(async move {
        if let Err(err) = discovery::run(discovery_port, tcp_port).await {
            error!("main: discovery responder stopped: {}", err);
        }
    });

    tokio::spawn(run_control_loop(server.clone()));

    let fixed_password = config.security.fixed_server_password.clone();
    match net::tcp_server::run(("0.0.0.0", tcp_port), server, fixed_password).await {
        Ok(()) => {
            info!("main: shutting down cleanly");
            std::process::ExitCode::from(0)
        }
        Err(err) => {
            error!("main: failed to bind listening port {}: {}", tcp_port, err);
            std::process::ExitCode::from(1)
        }
    }
}
