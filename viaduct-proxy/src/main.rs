//! viaduct — protocol-translating reverse proxy.
//!
//! Discovers its config through `VIADUCT_CONFIG_FILE` (prints the
//! default document and exits when unset), then runs until a signal
//! arrives. Once a minute the config file is re-read for the log
//! level and the lua script list; everything else needs a restart.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Registry, reload};

use viaduct_proxy::config::{CONFIG_ENV, Config};
use viaduct_proxy::service::Service;
use viaduct_proxy::{admin, luashell};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::new(match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARN" => "warn",
        "ERROR" => "error",
        _ => "info",
    })
}

fn init_tracing(level: &str) -> FilterHandle {
    let (filter, handle) = reload::Layer::new(level_filter(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    handle
}

/// Re-read the config file once a minute; apply the log level and the
/// lua script list, keep everything old on error.
async fn reload_loop(service: Arc<Service>, handle: FilterHandle, path: PathBuf) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = service.wait_stopped() => break,
            _ = ticker.tick() => {}
        }
        match Config::load(&path) {
            Err(e) => error!("[main] reload config error: {e}"),
            Ok(config) => {
                warn!("[main] reload config ok");
                if handle.reload(level_filter(&config.log_level)).is_err() {
                    error!("[main] log level reload failed");
                }
                service.swap_scripts(luashell::load(&config.lua_shell_file));
                warn!("[main] reload lua shell ok");
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let (path, config) = match Config::from_env() {
        Ok(Some(found)) => found,
        Ok(None) => {
            println!("{CONFIG_ENV} not set, here is the default config:\n{}", Config::default_json());
            println!("Save it to a file, point {CONFIG_ENV} at it and run again.");
            return;
        }
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(1);
        }
    };

    let handle = init_tracing(&config.log_level);

    let scripts = luashell::load(&config.lua_shell_file);

    let service = match Service::from_config(config) {
        Ok(service) => service,
        Err(e) => {
            error!("[main] service init failed: {e}");
            std::process::exit(1);
        }
    };
    service.swap_scripts(scripts);

    tokio::spawn(reload_loop(service.clone(), handle, path));

    {
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(service).await {
                error!("[main] admin endpoint failed: {e}");
            }
        });
    }

    info!("[main] service is starting");
    if let Err(e) = service.start().await {
        error!("[main] service start failed: {e}");
        std::process::exit(1);
    }

    tokio::select! {
        _ = service.wait_stopped() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("[main] signal listener failed: {e}");
            }
            info!("[main] signal received, stopping service");
            service.stop();
        }
    }
    service.shutdown().await;
}
