//! Latency probe daemon entry point.
//!
//! Wires a trigger line, the cooperative scheduler and a simulated
//! sender/root pair together, drives the line from a pulse generator or
//! SIGUSR1, and streams every collected probe as a JSON line.

mod diagnostics;
mod signals;
mod trigger;

use anyhow::{Context, Result};
use clap::Parser;
use probe_common::{LinkConfig, ProbeConfig};
use probe_runtime::{probe_task, ProbeInterrupt, ProbeSample, Scheduler, SimulatedNetwork};
use probe_stack::{NetworkClock, TriggerLine};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::diagnostics::{millis, RunSummary};
use crate::signals::SignalHandler;
use crate::trigger::PulseGenerator;

/// GPIO input carrying the external trigger.
const TRIGGER_PIN: u8 = 2;

/// Latency probe daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "llatency-probe",
    about = "Mesh latency probe - timestamps trigger edges and ships them to the network root",
    version,
    long_about = None
)]
struct Args {
    /// Path to a probe configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of trigger pulses to generate (overrides config file).
    #[arg(long, short = 'n')]
    pulses: Option<u32>,

    /// Time between generated pulses, e.g. `250ms` (overrides config file).
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Fail every N-th accepted send on the simulated link.
    #[arg(long, value_name = "N")]
    lossy_every: Option<u32>,

    /// Start the sender unsynchronized; every trigger is suppressed.
    #[arg(long)]
    unsynchronized: bool,

    /// Write collected probes to this file as JSON lines.
    #[arg(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting latency probe daemon");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        port = config.probe.port,
        destination = %config.probe.destination,
        pulses = config.trigger.pulses,
        interval_ms = config.trigger.interval.as_millis(),
        link = ?config.stack.link,
        "Configuration loaded"
    );

    let output = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => None,
    };

    let summary = run_daemon(&config, output)?;
    println!("{}", summary.to_json().context("Failed to render summary")?);
    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "probe_daemon={},probe_runtime={},probe_stack={},probe_common={}",
        level, level, level, level
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `LLATENCY_CONFIG_PATH` environment variable
/// 3. `/etc/llatency/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<ProbeConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return ProbeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    if let Ok(env_path) = std::env::var("LLATENCY_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from LLATENCY_CONFIG_PATH");
            return ProbeConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from LLATENCY_CONFIG_PATH={:?}", env_path)
            });
        }
        warn!(
            path = %env_path,
            "LLATENCY_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from("/etc/llatency/config.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return ProbeConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {:?}", system_path));
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return ProbeConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {:?}", local_path));
    }

    info!("No config file found, using built-in defaults");
    Ok(ProbeConfig::default())
}

/// Apply command-line overrides on top of the loaded file.
fn apply_overrides(config: &mut ProbeConfig, args: &Args) {
    if let Some(pulses) = args.pulses {
        config.trigger.pulses = pulses;
    }
    if let Some(interval) = args.interval {
        config.trigger.interval = interval;
    }
    if let Some(fail_every) = args.lossy_every {
        config.stack.link = LinkConfig::Lossy { fail_every };
    }
    if args.unsynchronized {
        config.stack.synchronized = false;
    }
}

/// Main daemon run loop.
fn run_daemon(config: &ProbeConfig, mut output: Option<BufWriter<File>>) -> Result<RunSummary> {
    let started = Instant::now();
    let clock = Arc::new(NetworkClock::live(
        config.stack.timer_hz,
        config.stack.slot_duration,
        started,
    ));
    let mut net = SimulatedNetwork::new(config, clock).context("Failed to build network")?;
    let mut scheduler: Scheduler<SimulatedNetwork> =
        Scheduler::new(&config.scheduler, &config.metrics);

    let line = Arc::new(TriggerLine::new(TRIGGER_PIN));
    let interrupt = ProbeInterrupt::new(
        scheduler.handle(),
        probe_task::<SimulatedNetwork>,
        config.probe.priority,
    );
    let _interrupt = interrupt
        .install(&line)
        .context("Failed to arm trigger line")?;

    let signal_handler = {
        let line = Arc::clone(&line);
        SignalHandler::new(move || {
            line.pulse();
        })
        .context("Failed to set up signal handlers")?
    };

    let mut generator = if config.trigger.pulses > 0 {
        Some(
            PulseGenerator::spawn(Arc::clone(&line), config.trigger.pulses, config.trigger.interval)
                .context("Failed to start pulse generator")?,
        )
    } else {
        info!("No pulses configured, waiting for SIGUSR1 triggers");
        None
    };

    let running = AtomicBool::new(true);
    let mut write_error: Option<std::io::Error> = None;

    scheduler.run(&mut net, &running, |scheduler, net| {
        if signal_handler.shutdown_requested() {
            info!("Shutdown signal received, stopping scheduler");
            running.store(false, Ordering::Release);
            return false;
        }

        let collected = net.propagate();
        if collected > 0 {
            if let Some(writer) = output.as_mut() {
                if let Err(error) = write_samples(writer, &net.drain_samples()) {
                    warn!(%error, "Failed to write probe samples");
                    write_error = Some(error);
                    running.store(false, Ordering::Release);
                    return false;
                }
            } else {
                for sample in net.drain_samples() {
                    debug!(
                        sequence = sample.sequence,
                        latency_us = sample.latency_ns / 1_000,
                        slots = sample.slots,
                        "probe collected"
                    );
                }
            }
        }

        let drained = scheduler.stats().pending == 0 && net.sender.stack.udp().in_flight() == 0;
        if drained && generator.as_ref().is_some_and(PulseGenerator::is_finished) {
            info!("Pulse train complete and network drained");
            running.store(false, Ordering::Release);
        }
        collected > 0
    });

    if let Some(error) = write_error {
        return Err(error).context("Failed to write probe samples");
    }
    if let Some(writer) = output.as_mut() {
        writer.flush().context("Failed to flush probe samples")?;
    }

    info!("Shutting down...");
    let pulses = generator.as_ref().map_or(0, PulseGenerator::emitted);
    if let Some(generator) = generator.as_mut() {
        generator.stop();
    }
    line.disable_interrupt();
    line.detach();
    // Anything the last pulses left on air.
    scheduler.run_until_idle(&mut net);
    net.propagate();
    if let Err(e) = net.shutdown() {
        warn!("Probe shutdown failed: {}", e);
    }
    signal_handler.request_shutdown();

    let summary = RunSummary {
        uptime_ms: millis(started.elapsed()),
        pulses,
        signal_triggers: signal_handler.state().triggers(),
        trigger_line: line.stats(),
        scheduler: scheduler.stats(),
        dispatch: scheduler.dispatch_latency().snapshot(),
        dropped_frames: net.dropped_frames(),
        network: net.report(),
    };
    info!(
        sent = summary.network.sender.sent,
        collected = summary.network.collector.received,
        lost = summary.network.collector.lost,
        missing = summary.missing(),
        dropped_triggers = summary.scheduler.dropped_full,
        signals = signal_handler.state().signal_count(),
        uptime_ms = summary.uptime_ms,
        "Daemon shutdown complete"
    );

    Ok(summary)
}

/// Append samples as JSON lines.
fn write_samples(writer: &mut impl Write, samples: &[ProbeSample]) -> std::io::Result<()> {
    for sample in samples {
        serde_json::to_writer(&mut *writer, sample)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}
