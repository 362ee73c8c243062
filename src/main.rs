//! keylink demo host
//!
//! Runs the configured widgets against a simulated product, prints their
//! state changes and offers a REPL to poke at keys.

use anyhow::{Context, Result};
use clap::Parser;
use keylink::catalog::{load_default_catalog, KeyCatalog};
use keylink::cli::{self, Reply, Repl};
use keylink::config::{AppConfig, ConfigWatcher, LoggingConfig, WidgetConfig};
use keylink::console::{self, Console};
use keylink::host::WidgetHost;
use keylink::key::domain;
use keylink::paths::AppPaths;
use keylink::simulation::spawn_telemetry;
use keylink::store::KeyedStore;
use keylink::transport::{DomainRouter, MemoryTransport, PreferenceTransport, Transport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// keylink - reactive key bindings against a simulated drone
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the detected app directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Do not start the interactive prompt
    #[arg(long)]
    no_repl: bool,

    /// Print the key catalogue and exit
    #[arg(long)]
    list_keys: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let catalog = load_default_catalog()?;
    if args.list_keys {
        print!("{}", console::format_catalog(&catalog));
        return Ok(());
    }

    let paths = AppPaths::detect();
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => {
            paths.ensure_directories()?;
            paths.config.clone()
        }
    };

    let config = AppConfig::load(&config_path).await?;
    let _log_guard = init_logging(&args, &config.logging, &paths.logs_dir)?;

    info!("Starting keylink v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", config_path.display());

    let (config_watcher, config) = ConfigWatcher::new(&config_path).await?;
    info!("Configuration loaded with hot-reload enabled");

    run_app(args, paths, catalog, config, config_watcher).await?;

    info!("keylink shutdown complete");
    Ok(())
}

async fn run_app(
    args: Args,
    paths: AppPaths,
    catalog: KeyCatalog,
    config: AppConfig,
    mut config_watcher: ConfigWatcher,
) -> Result<()> {
    let simulator = Arc::new(MemoryTransport::new("simulator"));
    let sim = &config.simulator;
    simulator.seed_from_catalog(&catalog, sim.cameras.max(sim.batteries));
    for (spec, value) in &sim.seed {
        let key = catalog
            .resolve(spec)
            .with_context(|| format!("simulator.seed entry '{}'", spec))?;
        simulator.seed(key, value.clone());
    }
    if !sim.connected_on_start {
        simulator.disconnect();
    }

    let preferences = if config.preferences.enabled {
        let path = config
            .preferences
            .path
            .clone()
            .unwrap_or_else(|| paths.preferences_db());
        Some(Arc::new(PreferenceTransport::open(&path)?))
    } else {
        None
    };

    let transport: Arc<dyn Transport> = match &preferences {
        Some(prefs) => Arc::new(
            DomainRouter::new(simulator.clone()).route(domain::PREFERENCES, prefs.clone()),
        ),
        None => simulator.clone(),
    };

    let store = KeyedStore::spawn(transport, config.store.to_options());
    let console = Console::new();
    let mut host = WidgetHost::new(store.clone());
    apply_widgets(&mut host, &console, &config.widgets);

    let telemetry = (sim.telemetry_interval_ms > 0).then(|| {
        spawn_telemetry(
            simulator.clone(),
            Duration::from_millis(sim.telemetry_interval_ms),
            sim.cameras,
            sim.batteries,
        )
    });

    let mut repl = if args.no_repl {
        None
    } else {
        console::print_notice("type 'help' for commands");
        Some(cli::spawn_reader("keylink> "))
    };

    let mut current = config;
    loop {
        tokio::select! {
            line = next_line(&mut repl) => {
                let Some(line) = line else {
                    debug!("Input closed");
                    break;
                };
                let command = match cli::parse_command(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        console::print_error(&format!("{:#}", e));
                        continue;
                    }
                };
                let repl_ctx = Repl {
                    store: &store,
                    simulator: &simulator,
                    catalog: &catalog,
                    host: &host,
                };
                match repl_ctx.execute(command).await {
                    Ok(Reply::Text(text)) => println!("{}", text),
                    Ok(Reply::Quit) => break,
                    Err(e) => console::print_error(&format!("{:#}", e)),
                }
            }

            Some(new_config) = config_watcher.next_config() => {
                info!("Configuration file changed, applying widgets");
                if new_config.store != current.store || new_config.simulator != current.simulator {
                    console::print_notice("store/simulator changes take effect after a restart");
                }
                apply_widgets(&mut host, &console, &new_config.widgets);
                current = new_config;
            }

            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    info!("Shutting down...");
    if let Some(task) = telemetry {
        task.abort();
    }
    host.shutdown();
    console.shutdown();
    if let Ok(stats) = store.stats().await {
        info!(%stats, "Final store statistics");
    }
    store.shutdown();
    if let Some(prefs) = preferences {
        if let Err(e) = prefs.flush().await {
            warn!("Failed to flush preferences: {:#}", e);
        }
    }

    Ok(())
}

fn apply_widgets(host: &mut WidgetHost, console: &Console, widgets: &[WidgetConfig]) {
    let diff = host.apply(widgets);
    for name in &diff.removed {
        console.unwatch(name);
    }
    for name in &diff.added {
        if let Some(widget) = host.get(name) {
            console.watch(name, widget.state_lines());
        }
    }
}

async fn next_line(repl: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match repl {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn init_logging(args: &Args, logging: &LoggingConfig, logs_dir: &Path) -> Result<Option<WorkerGuard>> {
    let level = args.log_level.as_deref().unwrap_or(&logging.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let mut layers = Vec::new();
    if args.log_json || logging.json {
        layers.push(tracing_subscriber::fmt::layer().json().with_target(false).boxed());
    } else {
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .boxed(),
        );
    }

    let guard = if logging.file {
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("Failed to create logs directory {}", logs_dir.display()))?;
        let appender = tracing_appender::rolling::daily(logs_dir, "keylink.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}
