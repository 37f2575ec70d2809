use tracing::{error, info};

mod app;
mod bridge;
mod color;
mod config;
mod error;
mod frame;
mod logging;
mod state;
mod ui;

use app::App;
use config::AppConfig;

fn main() -> iced::Result {
    // Logging needs the configured filter, so a config error is reported after init
    let (config, config_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    logging::init(&config.log_filter);
    if let Some(e) = config_error {
        error!("{}; falling back to defaults", e);
    }
    info!("Starting cview {} with {:?} backend", env!("CARGO_PKG_VERSION"), config.backend);

    iced::application("cview", App::update, App::view)
        .subscription(App::subscription)
        .theme(App::theme)
        .centered()
        .run_with(move || App::new(config))
}
