//! Waitline - crowd-sourced wait times from geofenced check-ins
//!
//! Module structure:
//! - `domain/` - Location aggregates, visits, intel, normalization
//! - `io/` - Collaborators (store, positioning, geocoder, briefing, journal)
//! - `services/` - Merge engine, stats, geofence, cache, engine
//! - `infra/` - Infrastructure (Config, Metrics, logging)

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use waitline::domain::types::{local_day_hour, Coordinate, LocationId};
use waitline::error::PositioningError;
use waitline::infra::{logging, Config, Metrics};
use waitline::io::{
    create_notice_channel, create_position_feed, GeminiClient, MemoryStore, NominatimClient, Notice,
    PositionFeed, PositionFix,
};
use waitline::services::stats::{format_duration, format_hour_label, DAYS_PER_WEEK, HOURS_PER_DAY};
use waitline::services::{Command, Engine, Phase};

/// Waitline - geofenced check-in timer and wait statistics
#[derive(Parser, Debug)]
#[command(name = "waitline", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    #[command(subcommand)]
    command: Cli,
}

#[derive(Subcommand, Debug)]
enum Cli {
    /// Run the engine on JSON lines from stdin (fixes, errors and commands)
    Serve,
    /// Print day/hour wait statistics for a location
    Stats { location_id: String },
    /// Replay a recorded trace against a location
    Replay {
        trace: String,
        #[arg(long)]
        target: String,
        /// Confirm every arrival prompt as soon as it appears
        #[arg(long)]
        auto_confirm: bool,
    },
    /// Look up a place by free text
    Search { query: String },
    /// Fetch and store a briefing for a location
    Brief { location_id: String },
    /// Rename a location
    Rename { location_id: String, name: String },
}

/// Device input as recorded in traces and accepted on stdin
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeviceInput {
    Fix { lat: f64, lon: f64 },
    Error { error: PositioningError },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputLine {
    Device(DeviceInput),
    Command(Command),
}

#[derive(Debug, Deserialize)]
struct TraceStep {
    t_ms: u64,
    #[serde(flatten)]
    input: InputLine,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    logging::init(config.log_json());

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "waitline starting");
    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        store_file = %config.store_file(),
        max_visits = %config.max_visits(),
        geocoder_enabled = %config.geocoder_enabled(),
        briefing_enabled = %config.briefing_enabled(),
        journal_file = %config.journal_file(),
        "config_loaded"
    );

    let store_path = config.store_file().to_string();
    let store = Arc::new(MemoryStore::load(Path::new(&store_path))?);
    let metrics = Arc::new(Metrics::new());

    match args.command {
        Cli::Serve => serve(config, store.clone(), metrics).await?,
        Cli::Stats { location_id } => print_stats(config, store.clone(), metrics, LocationId::new(location_id))?,
        Cli::Replay { trace, target, auto_confirm } => {
            replay(config, store.clone(), metrics, &trace, LocationId::new(target), auto_confirm).await?
        }
        Cli::Search { query } => {
            let geocoder = Arc::new(NominatimClient::new(&config)?);
            let (notices, _notice_rx) = create_notice_channel(16, metrics.clone());
            let (positioning, _feed, _rx) = create_position_feed(1);
            let engine = Engine::new(config, positioning, store.clone(), notices, metrics).with_geocoder(geocoder);
            match engine.search_location(&query).await? {
                Some(place) => {
                    let target = engine.target_for_place(&place);
                    println!("{}\t{}\t{}", target.id, place.coords, place.display_name);
                }
                None => println!("no results for {query:?}"),
            }
        }
        Cli::Brief { location_id } => {
            let briefing = Arc::new(GeminiClient::new(&config)?);
            let (notices, _notice_rx) = create_notice_channel(16, metrics.clone());
            let (positioning, _feed, _rx) = create_position_feed(1);
            let mut engine =
                Engine::new(config, positioning, store.clone(), notices, metrics).with_briefing(briefing);
            engine.refresh_from_store();
            let id = LocationId::new(location_id);
            let target = engine.target_for(&id).ok_or_else(|| anyhow!("location {id} has no coordinate"))?;
            let intel = engine.fetch_intel(&id, &target.name, target.coords).await?;
            println!("{}", intel.text);
            for source in &intel.sources {
                println!("- {} <{}>", source.title, source.uri);
            }
        }
        Cli::Rename { location_id, name } => {
            let (notices, _notice_rx) = create_notice_channel(16, metrics.clone());
            let (positioning, _feed, _rx) = create_position_feed(1);
            let mut engine = Engine::new(config, positioning, store.clone(), notices, metrics);
            let aggregate = engine.rename_location(&LocationId::new(location_id), &name).await?;
            println!("{}\t{}", aggregate.id, aggregate.name);
        }
    }

    store.persist(Path::new(&store_path))?;
    info!("waitline shutdown complete");
    Ok(())
}

fn print_stats(config: Config, store: Arc<MemoryStore>, metrics: Arc<Metrics>, id: LocationId) -> anyhow::Result<()> {
    let (notices, _notice_rx) = create_notice_channel(16, metrics.clone());
    let (positioning, _feed, _rx) = create_position_feed(1);
    let mut engine = Engine::new(config, positioning, store, notices, metrics);
    engine.refresh_from_store();

    let aggregate = engine.get_aggregate(&id).ok_or_else(|| anyhow!("unknown location {id}"))?;
    let stats = engine.get_stats(&id).ok_or_else(|| anyhow!("unknown location {id}"))?;

    println!("{} ({})", aggregate.name, aggregate.id);
    println!(
        "check-ins: {}  average wait: {}  recent samples: {}",
        aggregate.total_check_ins,
        format_duration(aggregate.avg_wait_seconds),
        stats.sample_count()
    );

    const DAY_NAMES: [&str; DAYS_PER_WEEK] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    for (day, name) in DAY_NAMES.iter().enumerate() {
        let Some(day_avg) = stats.weekly_averages[day] else {
            continue;
        };
        println!("{name}  avg {}", format_duration(day_avg));
        for hour in 0..HOURS_PER_DAY {
            if let Some(avg) = stats.hourly(day, hour) {
                println!("  {}  {}  ({} visits)", format_hour_label(hour), format_duration(avg), stats.counts[day][hour]);
            }
        }
    }

    let (day, hour) = local_day_hour(&chrono::Utc::now());
    let current = stats.current_hour_stats(day as usize, hour as usize);
    match current.seconds {
        Some(seconds) if current.has_data => println!("now: typically {}", format_duration(seconds)),
        _ => println!("now: no data for this hour"),
    }
    Ok(())
}

async fn push_device_input(feed: &PositionFeed, input: DeviceInput) -> anyhow::Result<bool> {
    Ok(match input {
        DeviceInput::Fix { lat, lon } => {
            let coords = Coordinate::new(lat, lon).ok_or_else(|| anyhow!("invalid fix {lat},{lon}"))?;
            feed.push_fix(PositionFix::at(coords)).await
        }
        DeviceInput::Error { error } => feed.push_error(error).await,
    })
}

/// Feed a trace through the engine on a virtual clock
async fn replay(
    config: Config,
    store: Arc<MemoryStore>,
    metrics: Arc<Metrics>,
    trace_path: &str,
    target_id: LocationId,
    auto_confirm: bool,
) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(trace_path).with_context(|| format!("Failed to read trace {trace_path}"))?;
    let steps = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<TraceStep>(line).with_context(|| format!("{trace_path}:{}: bad trace step", i + 1))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (notices, mut notice_rx) = create_notice_channel(1024, metrics.clone());
    let (positioning, feed, mut position_rx) = create_position_feed(16);
    let mut engine = Engine::new(config, positioning, store, notices, metrics.clone());
    engine.refresh_from_store();

    let base = Instant::now();
    let target = engine.target_for(&target_id);
    engine.start_check_in(target, base)?;

    for step in steps {
        let now = base + Duration::from_millis(step.t_ms);
        engine.tick(now);
        let outcome = match step.input {
            InputLine::Device(input) => {
                if push_device_input(&feed, input).await? {
                    if let Some(update) = position_rx.recv().await {
                        engine.handle_position(update, now);
                    }
                }
                Ok(())
            }
            InputLine::Command(Command::RetryPositioning) => {
                engine.restart_positioning();
                Ok(())
            }
            InputLine::Command(Command::ConfirmArrival) => engine.confirm_arrival(now).await.map(|_| ()),
            InputLine::Command(Command::DenyArrival) => engine.deny_arrival(now),
            InputLine::Command(Command::FinishCheckIn { save }) => engine.finish_check_in(save, now).await.map(|_| ()),
            InputLine::Command(other) => {
                warn!(command = ?other, "replay_command_ignored");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            warn!(t_ms = step.t_ms, error = %e, "replay_step_failed");
        }

        if auto_confirm && engine.phase(now) == Phase::PendingConfirmation {
            if let Err(e) = engine.confirm_arrival(now).await {
                warn!(t_ms = step.t_ms, error = %e, "replay_confirm_failed");
            }
        }

        while let Ok(notice) = notice_rx.try_recv() {
            println!("{}", serde_json::to_string(&notice)?);
        }
    }

    metrics.report(engine.geofence().has_session()).log();
    Ok(())
}

/// Run the engine loop; stdin carries fixes, errors and commands as JSON lines
async fn serve(config: Config, store: Arc<MemoryStore>, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (notices, mut notice_rx) = create_notice_channel(1024, metrics.clone());
    let (positioning, feed, position_rx) = create_position_feed(64);
    let (command_tx, command_rx) = mpsc::channel::<Command>(64);

    let mut engine = Engine::new(config.clone(), positioning, store, notices, metrics);
    if config.geocoder_enabled() {
        engine = engine.with_geocoder(Arc::new(NominatimClient::new(&config)?));
    }
    if config.briefing_enabled() {
        engine = engine.with_briefing(Arc::new(GeminiClient::new(&config)?));
    }

    // Notices go to stdout, one JSON object per line
    let printer = tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            print_notice(&notice);
        }
    });

    // Stdin reader: ends (and closes the command channel) at EOF
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<InputLine>(&line) {
                Ok(InputLine::Device(input)) => {
                    if let Err(e) = push_device_input(&feed, input).await {
                        warn!(error = %e, "device_input_rejected");
                    }
                }
                Ok(InputLine::Command(command)) => {
                    if command_tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "input_line_unparsed"),
            }
        }
        info!("stdin_closed");
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    engine.run(position_rx, command_rx, shutdown_rx).await;

    // Dropping the engine closes the notice channel so the printer drains and exits
    drop(engine);
    if let Err(e) = printer.await {
        warn!(error = %e, "notice_printer_failed");
    }
    Ok(())
}

fn print_notice(notice: &Notice) {
    match serde_json::to_string(notice) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!(error = %e, "notice_serialize_failed"),
    }
}
