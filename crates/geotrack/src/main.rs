//! `geotrack` - CLI for the location telemetry tracker
//!
//! This binary runs the capture scheduler in the foreground and inspects the
//! local tracker store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::Parser;

use geotrack::cli::{Cli, Command, ConfigCommand, HistoryCommand, OutputFormat, RunCommand};
use geotrack::config::{MapProvider, SyncBackend};
use geotrack::sync::{SqliteStore, StoredSample};
use geotrack::{
    init_logging, Config, CycleOutcome, Phase, SessionId, SessionIdentity, TelemetrySample,
    Tracker, TrackerStatus, Visibility,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Run(cmd) => handle_run(config, &cmd).await,
        Command::Once(cmd) => handle_once(&config, cmd.json).await,
        Command::Session => {
            println!("{}", resolve_session(&config));
            Ok(())
        }
        Command::Status(cmd) => handle_status(&config, cmd.json).await,
        Command::History(cmd) => handle_history(&config, &cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn resolve_session(config: &Config) -> SessionId {
    SessionIdentity::from_dir(config.session_storage_dir()).resolve()
}

async fn handle_run(mut config: Config, cmd: &RunCommand) -> Result<()> {
    if let Some(secs) = cmd.interval {
        config.tracker.update_interval_secs = secs;
        config.validate()?;
    }

    let tracker = Tracker::from_config(&config)?;
    let provider = config.display.map_provider;
    println!("Session:  {}", tracker.session_id());
    println!(
        "Interval: {}s (Ctrl-C to stop)",
        config.tracker.update_interval_secs
    );

    let mut updates = tracker.status().subscribe();
    let mut visibility = VisibilitySignals::new().context("failed to install signal handlers")?;
    let handle = tracker.start();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                print_status(&updates.borrow_and_update(), provider);
            }
            Some(change) = visibility.recv() => {
                handle.set_visibility(change).await?;
            }
        }
    }

    println!("Stopping...");
    handle.shutdown().await;
    Ok(())
}

fn print_status(status: &TrackerStatus, provider: MapProvider) {
    let stamp = chrono::Local::now().format("%H:%M:%S");
    match status.phase {
        Phase::Success => {
            if let Some(sample) = &status.sample {
                println!(
                    "[{stamp}] {} | {:.6}, {:.6} ±{:.0}m | IP {} | synced {}",
                    status.message,
                    sample.latitude(),
                    sample.longitude(),
                    sample.accuracy(),
                    sample.public_ip(),
                    status.sync_count,
                );
                println!("           {}", sample.map_url(provider));
            }
        }
        Phase::Loading | Phase::Error => println!("[{stamp}] {}", status.message),
    }
}

async fn handle_once(config: &Config, json: bool) -> Result<()> {
    let tracker = Tracker::from_config(config)?;

    match tracker.capture_once().await {
        CycleOutcome::Captured { sample, sync } => {
            if json {
                let value = serde_json::json!({
                    "sessionId": tracker.session_id(),
                    "synced": sync.is_success(),
                    "sample": sample,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_sample(&sample, config.display.map_provider);
                println!("Session:   {}", tracker.session_id());
                println!(
                    "Synced:    {}",
                    if sync.is_success() { "yes" } else { "no" }
                );
            }
            Ok(())
        }
        CycleOutcome::Failed(e) => bail!("{}", e.user_message()),
    }
}

fn print_sample(sample: &TelemetrySample, provider: MapProvider) {
    let device = sample.device_info();
    println!("Latitude:  {:.6}", sample.latitude());
    println!("Longitude: {:.6}", sample.longitude());
    println!("Accuracy:  {:.1} m", sample.accuracy());
    println!("Time:      {}", sample.timestamp_iso());
    println!("IP:        {}", sample.public_ip());
    println!("Device:    {} on {} ({})", device.browser, device.os, device.platform);
    println!("Screen:    {}", device.screen);
    println!("Map:       {}", sample.map_url(provider));
}

async fn handle_status(config: &Config, json: bool) -> Result<()> {
    let session = resolve_session(config);
    let store = match config.sync.backend {
        SyncBackend::Sqlite => Some(SqliteStore::open(config.database_path())?),
        SyncBackend::Http => None,
    };
    let (stats, trackers) = match &store {
        Some(store) => (Some(store.stats().await?), store.trackers().await?),
        None => (None, Vec::new()),
    };

    if json {
        let status = serde_json::json!({
            "sessionId": session,
            "backend": backend_name(config.sync.backend),
            "databasePath": store.as_ref().map(SqliteStore::path),
            "endpoint": config.sync.endpoint,
            "stats": stats,
            "trackers": trackers,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("geotrack status");
    println!("---------------");
    println!("Session:       {session}");
    println!("Backend:       {}", backend_name(config.sync.backend));
    match (&store, &stats) {
        (Some(store), Some(stats)) => {
            println!("Database:      {}", store.path().display());
            println!("Trackers:      {}", stats.trackers);
            println!("Samples:       {}", stats.samples);
            if let Some(oldest) = stats.oldest_sample {
                println!("Oldest sample: {}", oldest.to_rfc3339());
            }
            if let Some(newest) = stats.newest_sample {
                println!("Newest sample: {}", newest.to_rfc3339());
            }
            println!("Database size: {} KiB", stats.db_size_bytes / 1024);
            for tracker in &trackers {
                let marker = if tracker.session_id == session { "*" } else { " " };
                println!(
                    "  {marker} {} created {} ({} samples, last {})",
                    tracker.session_id,
                    tracker.created_at.to_rfc3339(),
                    tracker.sample_count,
                    tracker
                        .last_sample_at
                        .map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
                );
            }
        }
        _ => {
            println!(
                "Endpoint:      {}",
                config.sync.endpoint.as_deref().unwrap_or("(none)")
            );
        }
    }
    Ok(())
}

fn backend_name(backend: SyncBackend) -> &'static str {
    match backend {
        SyncBackend::Sqlite => "sqlite",
        SyncBackend::Http => "http",
    }
}

async fn handle_history(config: &Config, cmd: &HistoryCommand) -> Result<()> {
    if config.sync.backend != SyncBackend::Sqlite {
        bail!("history is only available with the sqlite backend");
    }

    let store = SqliteStore::open(config.database_path())?;
    let session = if cmd.current {
        Some(resolve_session(config))
    } else {
        cmd.session.clone().map(SessionId::new)
    };
    let samples = store.samples(session, cmd.limit).await?;

    match cmd.format {
        OutputFormat::Json => {
            let rows: Vec<_> = samples
                .iter()
                .map(|stored| {
                    serde_json::json!({
                        "id": stored.id,
                        "sessionId": stored.session_id,
                        "sample": stored.sample,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => print_history_table(&samples),
        OutputFormat::Plain => {
            for stored in &samples {
                let sample = &stored.sample;
                println!(
                    "{} {} {:.6},{:.6} ±{:.0}m {}",
                    sample.timestamp_iso(),
                    stored.session_id,
                    sample.latitude(),
                    sample.longitude(),
                    sample.accuracy(),
                    sample.public_ip()
                );
            }
        }
    }

    if samples.is_empty() && cmd.format != OutputFormat::Json {
        println!("No samples recorded.");
    }
    Ok(())
}

fn print_history_table(samples: &[StoredSample]) {
    if samples.is_empty() {
        return;
    }
    println!(
        "{:<6} {:<26} {:<24} {:>11} {:>11} {:>8}  {}",
        "ID", "SESSION", "TIME", "LATITUDE", "LONGITUDE", "ACC (m)", "IP"
    );
    for stored in samples {
        let sample = &stored.sample;
        println!(
            "{:<6} {:<26} {:<24} {:>11.6} {:>11.6} {:>8.1}  {}",
            stored.id,
            stored.session_id,
            sample.timestamp_iso(),
            sample.latitude(),
            sample.longitude(),
            sample.accuracy(),
            sample.public_ip()
        );
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Tracker]");
                println!("  Update interval:    {}s", config.tracker.update_interval_secs);
                println!();
                println!("[Position]");
                println!("  Source:             {:?}", config.position.source);
                println!("  Accuracy mode:      {:?}", config.position.accuracy_mode);
                println!("  Timeout:            {}s", config.position.timeout_secs);
                println!();
                println!("[Network]");
                println!("  IP lookup:          {}", config.network.ip_lookup_url);
                println!();
                println!("[Sync]");
                println!("  Backend:            {}", backend_name(config.sync.backend));
                println!("  Database path:      {}", config.database_path().display());
                if let Some(endpoint) = &config.sync.endpoint {
                    println!("  Endpoint:           {endpoint}");
                }
                println!();
                println!("[Session]");
                match config.session_storage_dir() {
                    Some(dir) => println!("  Storage dir:        {}", dir.display()),
                    None => println!("  Storage dir:        (in memory)"),
                }
                println!();
                println!("[Display]");
                println!("  Map provider:       {:?}", config.display.map_provider);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            if !path.exists() {
                bail!("configuration file not found: {}", path.display());
            }
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

/// Host visibility reported through `SIGUSR1` (hidden) and `SIGUSR2` (visible).
#[cfg(unix)]
struct VisibilitySignals {
    hidden: tokio::signal::unix::Signal,
    visible: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl VisibilitySignals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            hidden: signal(SignalKind::user_defined1())?,
            visible: signal(SignalKind::user_defined2())?,
        })
    }

    async fn recv(&mut self) -> Option<Visibility> {
        tokio::select! {
            received = self.hidden.recv() => received.map(|()| Visibility::Hidden),
            received = self.visible.recv() => received.map(|()| Visibility::Visible),
        }
    }
}

#[cfg(not(unix))]
struct VisibilitySignals;

#[cfg(not(unix))]
impl VisibilitySignals {
    #[allow(clippy::unnecessary_wraps)]
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<Visibility> {
        std::future::pending().await
    }
}
