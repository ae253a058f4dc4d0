mod config;
mod console;
mod error;
mod ids;
mod network;
mod registry;
mod room;
mod router;
mod security;
mod state;
mod storage;
mod user;
mod verification;

use crate::network::Network;
use crate::state::ServerState;
use std::env;
use std::path::Path;
use std::process::ExitCode;
use tokio::runtime::Builder;
use tokio::sync::watch;
use tracing::{error, info};

fn main() -> ExitCode {
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let config_path =
        env::var("QUILL_CONFIG").unwrap_or_else(|_| "./config/config.ini".to_string());
    let config_path = Path::new(&config_path);
    if !config_path.exists() {
        if let Err(load_error) = config::write_default_config(config_path) {
            error!(%load_error, "could not materialize the default configuration");
            return ExitCode::FAILURE;
        }
        error!(
            path = %config_path.display(),
            "no configuration found; a default was written, edit it and restart"
        );
        return ExitCode::FAILURE;
    }
    let config = match config::load_configuration(config_path) {
        Ok(config) => config,
        Err(load_error) => {
            error!(%load_error, path = %config_path.display(), "configuration rejected");
            return ExitCode::FAILURE;
        }
    };

    let acceptor = match network::tls::build_acceptor(&config.tls) {
        Ok(acceptor) => acceptor,
        Err(tls_error) => {
            error!(%tls_error, "tls setup failed");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(runtime_error) => {
            error!(%runtime_error, "runtime construction failed");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let store = storage::connect(&config.mysql);
        let state = ServerState::new(config, store);
        let host = state.config.host.clone();
        let port = state.config.port;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        console::spawn(shutdown_tx.clone());
        spawn_signal_handler(shutdown_tx);

        let mut network = Network::new();
        network.set_tls(acceptor);
        info!(%host, port, "quill starting");
        if let Err(serve_error) = network.run(state, &host, port, shutdown_rx).await {
            error!(%serve_error, "listener failed");
            return ExitCode::FAILURE;
        }
        info!("quill stopped");
        ExitCode::SUCCESS
    })
}

fn spawn_signal_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        let interrupt = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(terminate) => terminate,
                    Err(signal_error) => {
                        error!(%signal_error, "signal handler setup failed");
                        return;
                    }
                };
            tokio::select! {
                _ = interrupt => info!("interrupt received"),
                _ = terminate.recv() => info!("terminate received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = interrupt.await;
            info!("interrupt received");
        }
        let _ = shutdown.send(true);
    });
}
