#![cfg(not(tarpaulin_include))]

use std::env;

use vizboard::app;

/// Main entry point for the web application
///
/// Reads the listen address and data directory from the environment
/// (`VIZBOARD_ADDR`, `VIZBOARD_DATA_DIR`) and starts the server. The
/// encryption key comes from `VIZBOARD_SECRET`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let addr = env::var("VIZBOARD_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let data_dir = env::var("VIZBOARD_DATA_DIR").unwrap_or_else(|_| "database".to_string());

    app::run(&addr, &data_dir).await
}
