//! Line Monitor CLI
//!
//! Pulse telemetry ingest, run/stop detection and work/idle reporting.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use line_monitor::{
    config::{Config, SettingsPatch},
    core::{DayWindow, SECONDS_PER_DAY},
    report::{clock_label, MAX_REPORT_DAYS},
    stats::{IngestStats, STATS_FILE},
    telemetry::unix_now,
    MaintenanceWorker, MemoryStore, Monitor, PacketInput, SqliteStore, TelemetryStore, VERSION,
};

#[cfg(feature = "server")]
use line_monitor::server::{self, ServerConfig};

#[derive(Parser)]
#[command(name = "line-monitor")]
#[command(version = VERSION)]
#[command(about = "Production line pulse monitor", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and maintenance worker
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// SQLite database path (overrides the config file)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Feed a JSONL packet file through an in-memory monitor
    Replay {
        /// File with one packet per line: {"lineId", "pulses", "duration", "ts"}
        file: PathBuf,

        /// Seconds of packet time between maintenance cycles
        #[arg(long, default_value = "15")]
        every: u64,
    },

    /// Print the daily work/idle report
    Report {
        /// SQLite database path (overrides the config file)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Number of days (defaults to report_days from the config)
        #[arg(long)]
        days: Option<u32>,

        /// Output format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Show configuration, last logged line states and statistics
    Status {
        /// SQLite database path (overrides the config file)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show configuration
    Config,

    /// Update detection settings in the config file
    Set {
        /// Smoothing window in seconds
        #[arg(long)]
        window_sec: Option<f64>,

        /// Start threshold in pulses per minute
        #[arg(long)]
        v_start: Option<f64>,

        /// Stop threshold in pulses per minute
        #[arg(long)]
        v_stop: Option<f64>,

        /// Seconds above the start threshold before RUNNING
        #[arg(long)]
        delay_start: Option<f64>,

        /// Seconds below the stop threshold before STOPPED
        #[arg(long)]
        delay_stop: Option<f64>,

        /// Seconds of silence before a line is forced to STOPPED
        #[arg(long)]
        offline_timeout: Option<f64>,

        /// Shortest segment counted in reports, in seconds
        #[arg(long)]
        min_segment_sec: Option<f64>,

        /// Chart window in hours (24 or 48)
        #[arg(long)]
        graph_hours: Option<u32>,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::config_path);

    let result = match cli.command {
        Commands::Serve { port, db } => cmd_serve(&config_path, port, db),
        Commands::Replay { file, every } => cmd_replay(&config_path, &file, every),
        Commands::Report { db, days, format } => cmd_report(&config_path, db, days, &format),
        Commands::Status { db } => cmd_status(&config_path, db),
        Commands::Config => cmd_config(&config_path),
        Commands::Set {
            window_sec,
            v_start,
            v_stop,
            delay_start,
            delay_stop,
            offline_timeout,
            min_segment_sec,
            graph_hours,
        } => {
            let number = |v: Option<f64>| v.map(|n| serde_json::json!(n));
            let patch = SettingsPatch {
                window_secs: number(window_sec),
                v_start: number(v_start),
                v_stop: number(v_stop),
                delay_start: number(delay_start),
                delay_stop: number(delay_stop),
                offline_timeout: number(offline_timeout),
                min_segment_secs: number(min_segment_sec),
                graph_hours: graph_hours.map(|h| serde_json::json!(h)),
                ..Default::default()
            };
            cmd_set(&config_path, &patch)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load_from(path).with_context(|| format!("could not load config from {path:?}"))
}

#[cfg(feature = "server")]
fn cmd_serve(config_path: &Path, port: Option<u16>, db: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Line Monitor v{VERSION}");
    println!();

    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(db) = db {
        config.database_path = db;
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("  Config: {config_path:?}");
    println!("  Database: {:?}", config.database_path);
    println!("  Lines: {}", config.enabled_line_ids().len());
    println!(
        "  Window: {}s, V_START: {}, V_STOP: {}",
        config.detection.window_secs, config.detection.v_start, config.detection.v_stop
    );
    println!(
        "  Maintenance every {}s",
        config.maintenance_interval.as_secs()
    );

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("could not open database {:?}", config.database_path))?;
    let stats = Arc::new(IngestStats::with_persistence(
        config.data_path.join(STATS_FILE),
    ));

    let port = config.port;
    let period = config.maintenance_interval.max(Duration::from_secs(1));
    let monitor = Arc::new(
        Monitor::new(config, Arc::new(store))
            .with_config_path(config_path.to_path_buf())
            .with_stats(stats.clone()),
    );

    let worker = MaintenanceWorker::spawn(monitor.clone(), period)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let (addr, shutdown_tx) =
        runtime.block_on(server::run(ServerConfig::new(port), monitor.clone()))?;

    println!();
    println!("Listening on http://{addr}");
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    println!();
    println!("Stopping...");
    let _ = shutdown_tx.send(());
    worker.stop();
    runtime.shutdown_timeout(Duration::from_secs(5));

    // Persist whatever closed since the last cycle
    monitor.run_maintenance(unix_now());

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_config_path: &Path, _port: Option<u16>, _db: Option<PathBuf>) -> anyhow::Result<()> {
    anyhow::bail!("serve requires the server feature")
}

fn cmd_replay(config_path: &Path, file: &Path, every: u64) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let content =
        std::fs::read_to_string(file).with_context(|| format!("could not read {file:?}"))?;

    let monitor = Monitor::new(config, Arc::new(MemoryStore::new()));
    let every = every.max(1) as i64;

    let mut first_ts: Option<i64> = None;
    let mut last_ts: Option<i64> = None;
    let mut next_maintenance: Option<i64> = None;
    let mut skipped = 0usize;

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let input = serde_json::from_str::<serde_json::Value>(line)
            .map_err(|e| e.to_string())
            .and_then(|v| PacketInput::from_json(&v).map_err(|e| e.to_string()));
        let input = match input {
            Ok(input) => input,
            Err(e) => {
                eprintln!("Warning: line {}: {e}", index + 1);
                skipped += 1;
                continue;
            }
        };

        // Packets without a timestamp inherit the previous one
        let fallback = last_ts.unwrap_or_else(unix_now);
        let outcome = match monitor.handle_packet_at(&input, fallback) {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("Warning: line {}: {e}", index + 1);
                skipped += 1;
                continue;
            }
        };
        let ts = outcome.timestamp;
        first_ts.get_or_insert(ts);
        last_ts = Some(last_ts.map_or(ts, |t| t.max(ts)));

        if outcome.state_changed {
            println!(
                "[{}] {}: {}",
                clock_label(ts),
                input.line_id.trim(),
                outcome.state
            );
        }

        let due = *next_maintenance.get_or_insert(ts + every);
        if ts >= due {
            let report = monitor.run_maintenance(ts);
            for line_id in &report.forced_offline {
                println!("[{}] {}: stopped (no data)", clock_label(ts), line_id);
            }
            next_maintenance = Some(ts + every);
        }
    }

    let (Some(first), Some(last)) = (first_ts, last_ts) else {
        println!("No packets replayed.");
        return Ok(());
    };
    monitor.run_maintenance(last);

    // Only the most recent days are tabulated for long captures
    let span = (DayWindow::containing(last).start - DayWindow::containing(first).start)
        / SECONDS_PER_DAY
        + 1;
    let days = u32::try_from(span).unwrap_or(MAX_REPORT_DAYS).min(MAX_REPORT_DAYS);
    println!();
    println!("{}", monitor.stats().summary());
    if skipped > 0 {
        println!("Skipped lines: {skipped}");
    }

    for line_id in monitor.engine().line_ids() {
        let daily = monitor.daily_work_idle(&line_id, days, last)?;
        println!();
        println!("{line_id}");
        println!("  {:<12} {:>8} {:>8}", "Date", "Work, h", "Idle, h");
        for ((label, work), idle) in daily.labels.iter().zip(&daily.work).zip(&daily.idle) {
            println!("  {label:<12} {work:>8.1} {idle:>8.1}");
        }
        let summary = daily.summary();
        println!(
            "  {:<12} {:>8.1} {:>8.1}  ({:.1}% idle)",
            "Total", summary.work_hours, summary.idle_hours, summary.idle_pct
        );
    }
    Ok(())
}

fn open_existing_store(config: &Config, db: Option<PathBuf>) -> anyhow::Result<Option<SqliteStore>> {
    let path = db.unwrap_or_else(|| config.database_path.clone());
    if !path.exists() {
        println!("No database found at {path:?}");
        println!("Run 'line-monitor serve' to start collecting data.");
        return Ok(None);
    }
    let store =
        SqliteStore::open(&path).with_context(|| format!("could not open database {path:?}"))?;
    Ok(Some(store))
}

fn cmd_report(
    config_path: &Path,
    db: Option<PathBuf>,
    days: Option<u32>,
    format: &str,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let Some(store) = open_existing_store(&config, db)? else {
        return Ok(());
    };
    let days = days.unwrap_or(config.report_days).max(1);

    let monitor = Monitor::new(config, Arc::new(store));
    let report = monitor.daily_report(days, unix_now())?;

    if format == "jsonl" {
        for line in &report.lines {
            println!("{}", serde_json::to_string(line)?);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn cmd_status(config_path: &Path, db: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    println!("Line Monitor Status");
    println!("===================");
    println!();

    println!("Configuration:");
    println!("  Window: {}s", config.detection.window_secs);
    println!(
        "  Thresholds: V_START {} / V_STOP {}",
        config.detection.v_start, config.detection.v_stop
    );
    println!(
        "  Delays: start {}s / stop {}s",
        config.detection.delay_start_secs, config.detection.delay_stop_secs
    );
    println!("  Offline timeout: {}s", config.detection.offline_timeout_secs);
    println!();

    if let Some(store) = open_existing_store(&config, db)? {
        println!("Last logged state:");
        for line in config.lines.iter().filter(|l| l.enabled) {
            let last = store.last_status_before(&line.id, i64::MAX)?;
            let state = match last {
                Some(event) => format!("{} since {}", event.state, clock_label(event.timestamp)),
                None => "no events".to_string(),
            };
            println!("  {:<20} {state}", config.display_name(&line.id));
        }
        println!();
    }

    let stats_path = config.data_path.join(STATS_FILE);
    if stats_path.exists() {
        let stats = IngestStats::with_persistence(stats_path).snapshot();
        println!("Cumulative Statistics:");
        println!("  Packets accepted: {}", stats.packets);
        println!("  Packets rejected: {}", stats.rejected);
        println!("  State transitions: {}", stats.transitions);
        println!("  Minutes flushed: {}", stats.minutes_flushed);
        println!("  Offline stops: {}", stats.offline_stops);
        println!("  Store failures: {}", stats.store_failures);
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {config_path:?}");
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_set(config_path: &Path, patch: &SettingsPatch) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    let before = config.clone();
    config.apply_patch(patch);

    if config == before {
        println!("Nothing changed.");
        return Ok(());
    }
    config
        .save_to(config_path)
        .with_context(|| format!("could not save config to {config_path:?}"))?;

    println!("Settings saved to {config_path:?}");
    println!("{}", serde_json::to_string_pretty(&config.detection)?);
    println!("graph_hours: {}", config.graph_hours);
    Ok(())
}

/// Set up Ctrl+C handler.
#[cfg(feature = "server")]
fn ctrlc_handler(running: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}
