use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use stagehand::script::{DataStore, ScriptLoader, ScriptRegistry};
use stagehand::Config;

#[tokio::main]
async fn main() {
    // Load configuration
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = match Config::load_with_env(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = stagehand::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        stagehand::logging::init_console_only(&config.logging.level);
    }

    info!("STAGEHAND - scriptable automation host runtime");

    let store = match DataStore::open(&config.runtime.data_file) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to open script data store: {e}");
            std::process::exit(1);
        }
    };

    let mut registry = ScriptRegistry::new(&config.limits, store);
    let mut loader = ScriptLoader::new(&config.runtime.scripts_dir);
    if let Err(e) = loader.ensure_scripts_dir() {
        error!("failed to create scripts directory: {e}");
        std::process::exit(1);
    }

    sync_and_enable(&mut loader, &mut registry);
    info!(
        scripts = registry.len(),
        dir = %loader.scripts_dir().display(),
        "initial script sync complete"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(config.runtime.tick_interval_ms));
    let mut housekeeping = tokio::time::interval(Duration::from_secs(60));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = registry.tick_all_scripts();
                for name in &summary.faulted {
                    warn!(script = %name, "script tripped the circuit breaker this tick");
                }

                // Hand queued task requests to the host's executor. Stub host:
                // log them so script behavior is observable.
                for task in registry.tasks().drain() {
                    info!(
                        script = %task.script,
                        task = %task.name,
                        kind = %task.kind,
                        priority = task.priority,
                        "task requested"
                    );
                }
            }
            _ = housekeeping.tick() => {
                let evicted = registry.errors().clear_old_errors();
                if evicted > 0 {
                    info!(evicted, "evicted stale error records");
                }
                sync_and_enable(&mut loader, &mut registry);
            }
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    registry.unload_all();
}

/// Sync the scripts directory and enable anything newly added or reloaded.
fn sync_and_enable(loader: &mut ScriptLoader, registry: &mut ScriptRegistry) {
    let summary = loader.sync(registry);

    for (path, message) in &summary.errors {
        warn!(path = %path, "script sync: {message}");
    }

    for name in summary.added.iter().chain(summary.updated.iter()) {
        if let Err(e) = registry.enable_script(name) {
            warn!(script = %name, "failed to enable: {e}");
        }
    }

    if summary.has_changes() {
        info!(
            added = summary.added.len(),
            updated = summary.updated.len(),
            removed = summary.removed.len(),
            "script sync applied changes"
        );
    }
}
