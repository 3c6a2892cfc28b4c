use tracing::info;
use tracing_subscriber::EnvFilter;

use super::auth::{PrefixTokenVerifier, TokenVerifier};
use super::config::ServerConfig;

pub(crate) struct AppWiring {
    pub(crate) config: ServerConfig,
    pub(crate) verifier: Box<dyn TokenVerifier>,
}

pub(crate) fn build_app() -> AppWiring {
    init_tracing();
    info!("=== Arena Server Startup ===");

    let config = ServerConfig::from_env();
    info!(
        bind = %config.bind,
        port = config.port,
        tick_hz = config.tick_hz,
        max_catch_up_steps = ?config.max_catch_up_steps,
        reap_empty_rooms = config.reap_empty_rooms,
        seeded = config.seed.is_some(),
        "server_config_loaded"
    );
    let verifier = Box::new(PrefixTokenVerifier::new(config.token_prefix.clone()));

    AppWiring { config, verifier }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}
