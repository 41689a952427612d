mod api;
mod app;
mod budget;
mod config;
mod content;
mod cookies;
mod device;
mod ebd;
mod error;
mod fetch;
mod limit;
mod pages;
mod palette;
mod string;
mod transcode;
mod workers;

use tracing::error;

#[tokio::main]
async fn main() {
    app::enable_tracing();
    palette::initialize();

    let state = match app::AppState::new() {
        Ok(state) => state,
        Err(err) => {
            error!("Failed to initialize: {err}");
            std::process::exit(1);
        }
    };

    match app::run(state).await {
        // run() only returns cleanly after a termination signal
        Ok(()) => std::process::exit(2),
        Err(err) => {
            error!("Fatal server error: {err}");
            std::process::exit(1);
        }
    }
}
