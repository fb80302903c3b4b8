//! Client side of a live barcode inspection station: keeps one WebSocket
//! link to the inspection backend, tracks the listening session, and feeds
//! incoming measurements to history and a windowed chart view.

pub mod connection;
pub mod feed;
pub mod history;
pub mod models;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod settings;
mod utils;

pub use connection::{ConnectionState, Connector, MemoryConnector, WsConnector};
pub use runtime::InspectionClient;
pub use session::{InspectionSession, SessionController, SessionError, SessionStage};
pub use settings::{ClientSettings, SettingsStore};

/// Installs the global logger. `RUST_LOG` overrides the default level;
/// `debug` lowers it to `Debug`.
pub fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}
