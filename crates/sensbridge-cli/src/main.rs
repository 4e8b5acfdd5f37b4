//! `sensbridge-cli` – sensbridge Command Line Interface
//!
//! This binary runs a bridge against a simulated hardware session. It:
//!
//! 1. Loads the boot config (`SENSBRIDGE_BOOT_CONFIG` or
//!    `~/.sensbridge/boot_config.json`), writing an editable default on the
//!    first run.
//! 2. Registers the default converters and inbound subscribers the boot
//!    config enables and starts the scheduler thread.
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/emit`, `/record`, `/buffer`, `/dump`, `/send`, `/files`, `/help`, …).
//! 4. Intercepts **Ctrl-C** to stop the driver and exit safely.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use sensbridge_hal::SimSession;
use sensbridge_runtime::{BootConfig, Bridge, DEFAULT_CONVERTERS, DefaultSource, RuntimeConfig};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); SENSBRIDGE_LOG_FORMAT=json switches
    // to JSON lines. The CLI's user-facing output still uses println!.
    let _telemetry = sensbridge_runtime::init_tracing("sensbridge");

    print_banner();

    // ── Boot config ───────────────────────────────────────────────────────
    let boot = load_boot_config();
    let mut runtime = RuntimeConfig::from_boot(&boot, &config::default_container_dir());
    sensbridge_runtime::apply_env_overrides(&mut runtime);

    // ── Bridge ────────────────────────────────────────────────────────────
    let session = sim_session();
    let bridge = match Bridge::from_config(&runtime, Arc::new(session.clone())) {
        Ok(bridge) => bridge,
        Err(e) => {
            println!("{}: {}", "Startup error".red(), e);
            std::process::exit(1);
        }
    };
    let registered = bridge.register_default_converters(&boot);
    let inbound = bridge.register_default_subscribers(&boot);
    println!(
        "  {} converter(s) and {} inbound subscriber(s) registered, containers in {}",
        registered.len().to_string().bold(),
        inbound.len().to_string().bold(),
        runtime.container_dir.display().to_string().bold()
    );
    if let Err(e) = bridge.start() {
        println!("{}: {}", "Startup error".red(), e);
        std::process::exit(1);
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    let driver = Arc::clone(bridge.driver());

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – initiating graceful shutdown …".yellow().bold());
        driver.stop();
        println!("{}", "  ✓ Driver stopped.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&bridge, &session, shutdown);
    bridge.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup helpers
// ─────────────────────────────────────────────────────────────────────────────

fn load_boot_config() -> BootConfig {
    let path = config::boot_config_path();
    match config::load_from(&path) {
        Ok(Some(boot)) => {
            println!("  Boot config loaded from {}", path.display().to_string().bold());
            boot
        }
        Ok(None) => {
            match config::save_default_to(&path) {
                Ok(()) => println!(
                    "  {} Default boot config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving boot config".red(), e),
            }
            BootConfig::from_value(config::default_document())
        }
        Err(e) => {
            println!("{}: {}", "Boot config error".red(), e);
            println!("  Using default configuration.");
            BootConfig::default()
        }
    }
}

/// A session holding every key the default converters read.
fn sim_session() -> SimSession {
    let mut builder = SimSession::builder();
    for converter in DEFAULT_CONVERTERS {
        match converter.source {
            DefaultSource::Value { key, .. } if key.starts_with("RobotConfig/") => {
                builder = builder.with_value(key, "sim");
            }
            DefaultSource::Event { key, .. } => builder = builder.with_value(key, 0.0),
            _ => {
                for key in converter.keys() {
                    builder = builder.with_value(key, 0.5);
                }
            }
        }
    }
    builder.build()
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"                       __        _     __        "#.bold().cyan());
    println!("{}", r#"   ________  ____  ___/ /_  _____(_)___/ /___ ____ "#.bold().cyan());
    println!("{}", r#"  / ___/ _ \/ __ \/ ___/ __ \/ ___/ / __  / __ `/ _ \"#.bold().cyan());
    println!("{}", r#" (__  )  __/ / / (__  ) /_/ / /  / / /_/ / /_/ /  __/"#.bold().cyan());
    println!("{}", r#"/____/\___/_/ /_/____/_.___/_/  /_/\__,_/\__, /\___/ "#.bold().cyan());
    println!("{}", r#"                                        /____/       "#.bold().cyan());
    println!();
    println!("  {} {}",
        "sensbridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Sensor scheduling, recording and buffer dumps");
    println!();
}
