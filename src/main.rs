use std::sync::Arc;
use tokio::sync::Notify;

use site_server::config::{AppState, Config};
use site_server::{logger, server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::load()?;
    logger::init(&cfg)?;

    // Size the runtime from `server.workers`, CPU cores otherwise
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;
    let state = Arc::new(AppState::new(&cfg).await?);
    let listener = server::create_reusable_listener(addr)?;

    logger::log_server_start(&addr, &cfg, state.frontend.is_some());

    let shutdown = Arc::new(Notify::new());
    server::start_signal_handler(Arc::clone(&shutdown));

    // Use LocalSet for spawn_local support
    let local = tokio::task::LocalSet::new();
    local
        .run_until(server::start_server_loop(listener, state, shutdown))
        .await?;

    logger::log_info("Server stopped");
    Ok(())
}
