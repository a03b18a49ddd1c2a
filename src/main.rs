// Main

mod amf;
mod buffer;
mod dispatch;
mod error;
mod log;
mod rtmp;
mod server;
mod utils;

use std::sync::Arc;

use dispatch::ApplicationRegistry;
use log::{LogConfig, Logger};
use server::{run_server, RtmpServerConfiguration};
use utils::get_env_bool;

/// Main function
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load .env
    let _ = dotenvy::dotenv();

    // Initialize logger

    let logger = Logger::new(LogConfig {
        prefix: "".to_string(),
        error_enabled: get_env_bool("LOG_ERROR", true),
        warning_enabled: get_env_bool("LOG_WARNING", true),
        info_enabled: get_env_bool("LOG_INFO", true),
        debug_enabled: get_env_bool("LOG_DEBUG", false),
        trace_enabled: get_env_bool("LOG_TRACE", get_env_bool("LOG_DEBUG", false)),
    });

    // Print version

    const VERSION: &str = env!("CARGO_PKG_VERSION");

    logger.log_info(&format!("RTMP Engine ({VERSION})"));

    // Load configuration

    let server_config = match RtmpServerConfiguration::load_from_env(&logger) {
        Ok(c) => Arc::new(c),
        Err(_) => {
            std::process::exit(1);
        }
    };

    // Applications are registered dynamically as connections reference them by name;
    // an unnamed application gets the open, unauthenticated default.
    let applications = Arc::new(ApplicationRegistry::new());

    // Run server

    run_server(logger, server_config, applications).await;

    Ok(())
}
