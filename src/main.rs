//! steamctl - command-line front end for the sequence engine.

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use steamctl::cli::{Cli, Commands};
use steamctl::signals::{self, ShutdownSignal};
use steamctl::worker::{RunRequest, spawn_run_worker};
use steamctl::{DeviceRegistry, Engine, MemoryDriver, Sequence, Settings, check_sequence};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the `-v` level when set.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.log_level());
    debug!("CLI arguments parsed: {:?}", cli);

    let code = match dispatch(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::Run { sequence, json } => run_sequence(cli, sequence, *json),
        Commands::Validate { sequence } => validate(cli, sequence),
        Commands::Devices => list_devices(cli),
        Commands::StopAll => stop_all(cli),
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load_from_file(&cli.settings)
        .with_context(|| format!("Failed to load settings from {:?}", cli.settings))?;
    cli.apply_overrides(&mut settings);
    Ok(settings)
}

/// Connect to the daemon, or build an in-memory engine for `--dry-run`.
fn build_engine(cli: &Cli, settings: &Settings) -> Result<Engine> {
    if cli.dry_run {
        info!("[DRY RUN] Not connecting to {}; writes are only logged", settings.daemon);
        let registry = DeviceRegistry::load(settings)?;
        return Ok(Engine::with_driver(
            registry,
            Box::new(MemoryDriver::logging()),
            settings.polarity,
        )?);
    }
    Engine::connect(settings)
        .with_context(|| format!("Failed to start engine on {}", settings.daemon))
}

/// File name shown in status lines (`c1.yaml` rather than the full path)
fn task_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn install_signals() -> ShutdownSignal {
    match signals::init_signal_handlers() {
        Ok(signal) => {
            debug!("Signal handlers initialized");
            signal
        }
        Err(e) => {
            // Cleanup still runs through Engine::shutdown and Drop
            warn!("Failed to initialize signal handlers: {}", e);
            ShutdownSignal::new()
        }
    }
}

fn run_sequence(cli: &Cli, path: &Path, json: bool) -> Result<i32> {
    let label = task_label(path);
    let settings = load_settings(cli)?;

    // A bad task file never reaches the hardware
    let sequence = match Sequence::load_from_file(path) {
        Ok(sequence) => sequence,
        Err(e) => {
            error!("Failed to load task file {:?}: {}", path, e);
            println!("Error executing {}: {}", label, e);
            return Ok(1);
        }
    };
    info!(
        "Loaded {}: {} step(s), {}s of delays",
        label,
        sequence.len(),
        sequence.total_delay_seconds()
    );

    let shutdown_signal = install_signals();
    let engine = Arc::new(build_engine(cli, &settings)?);

    let (request_tx, request_rx) = mpsc::channel();
    let (response_tx, response_rx) = mpsc::channel();
    let worker = spawn_run_worker(Arc::clone(&engine), request_rx, response_tx);

    let sent = request_tx.send(RunRequest {
        id: 1,
        label: label.clone(),
        sequence,
        cancel: shutdown_signal.token(),
    });
    drop(request_tx);
    let response = match sent {
        Ok(()) => response_rx.recv().ok(),
        Err(_) => None,
    };
    if worker.join().is_err() {
        error!("Run worker panicked");
    }

    // Always retire the engine, whatever the run did
    if let Err(e) = engine.shutdown() {
        error!("Cleanup failed: {}", e);
    }

    let Some(response) = response else {
        println!("Error executing {}: run worker stopped unexpectedly", label);
        return Ok(1);
    };

    match (&response.result, json) {
        (Ok(report), true) => {
            let text = serde_json::to_string_pretty(report)
                .context("Failed to serialize run report")?;
            println!("{}", text);
        }
        _ => println!("{}", response.summary()),
    }

    if shutdown_signal.received().is_some() {
        return Ok(shutdown_signal.exit_code());
    }
    match response.result {
        Ok(report) if report.is_success() => Ok(0),
        _ => Ok(1),
    }
}

fn validate(cli: &Cli, path: &Path) -> Result<i32> {
    let settings = load_settings(cli)?;
    let registry = DeviceRegistry::load(&settings)?;
    let sequence = Sequence::load_from_file(path)
        .with_context(|| format!("Failed to load task file {:?}", path))?;

    let problems = check_sequence(&sequence, &registry);
    if problems.is_empty() {
        info!("Task file validation successful");
        println!(
            "✓ {} is valid: {} step(s), {}s of delays",
            task_label(path),
            sequence.len(),
            sequence.total_delay_seconds()
        );
        return Ok(0);
    }

    for (index, problem) in &problems {
        eprintln!("✗ step {}: {}", index + 1, problem);
    }
    eprintln!("{} step(s) would be skipped", problems.len());
    Ok(1)
}

fn list_devices(cli: &Cli) -> Result<i32> {
    let settings = load_settings(cli)?;
    let registry = DeviceRegistry::load(&settings)?;
    for device in registry.devices() {
        println!("{:<16} channel {}", device.display_name, device.channel);
    }
    Ok(0)
}

fn stop_all(cli: &Cli) -> Result<i32> {
    let settings = load_settings(cli)?;
    // Startup already drives every channel to zero; shutdown repeats it
    let engine = build_engine(cli, &settings)?;
    engine.shutdown().context("Failed to stop all devices")?;
    println!("✓ All devices stopped");
    Ok(0)
}
