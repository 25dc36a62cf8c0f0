//! card-scanner - Live camera card-number scanner
//!
//! Samples the camera on a fixed cadence, recognizes the number band with an
//! OCR engine and reports the first confident 16-digit match, masked.

mod app;
mod capture;
mod config;
mod ocr;
mod overlay;
mod scan;
mod shared;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::CardScannerApp;
use crate::capture::{MediaDevices, Readiness, VideoSink};
use crate::config::ScannerConfig;
use crate::ocr::assets::AssetCache;
use crate::ocr::{HttpProbe, TesseractFactory, WorkerTier};
use crate::shared::{ConsoleCommand, OperatorAction};

/// How long a timed run waits for the camera to start playing
const CAMERA_START_TIMEOUT: Duration = Duration::from_secs(10);

/// card-scanner - live camera card-number scanner
#[derive(Parser, Debug)]
#[command(name = "card-scanner")]
#[command(about = "Scan a card number from a live camera feed")]
struct Args {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging for this crate
    #[arg(short, long)]
    verbose: bool,

    /// List the OCR fallback tiers and exit
    #[arg(long)]
    list_tiers: bool,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,

    /// Scan for this many seconds without the console, then exit
    #[arg(long)]
    scan_seconds: Option<u64>,

    /// Write the overlay raster to this PNG whenever a card is detected
    #[arg(long)]
    overlay_out: Option<PathBuf>,

    /// Synthetic camera frame size
    #[arg(long, default_value = "1280x720", value_parser = parse_frame_size)]
    frame_size: (u32, u32),
}

fn parse_frame_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let width: u32 = w.trim().parse().map_err(|_| format!("invalid width '{w}'"))?;
    let height: u32 = h.trim().parse().map_err(|_| format!("invalid height '{h}'"))?;
    if width == 0 || height == 0 {
        return Err("frame size must be non-zero".to_string());
    }
    Ok((width, height))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout stays free for the console
    let default_filter = if args.verbose {
        "card_scanner=debug"
    } else {
        "card_scanner=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match args.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    if args.write_default_config {
        config::save_config(&ScannerConfig::default(), &config_path)?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let config = config::load_or_default(&config_path)?;
    info!("Using configuration from {}", config_path.display());

    let cache = match &config.engine.asset_cache_dir {
        Some(dir) => AssetCache::new(dir.clone())?,
        None => AssetCache::in_user_cache()?,
    };
    info!("OCR asset cache at {}", cache.root().display());
    let factory = Arc::new(TesseractFactory::new(
        config.engine.tesseract_binary.clone(),
        Arc::new(cache),
    ));
    let probe = Arc::new(HttpProbe::new(config.engine.probe_timeout())?);
    let (devices, sink) = camera_backend(args.frame_size)?;

    let app = CardScannerApp::new(config, devices, sink, factory, probe)?;

    if args.list_tiers {
        print!("{}", describe_tiers(app.scanner().engine().tiers()));
        return Ok(());
    }

    info!("card-scanner starting...");
    app.start_engine();
    match app.dispatch(OperatorAction::StartCamera).await {
        Ok(message) => info!("{message}"),
        Err(e) => warn!("{e:#}"),
    }

    match args.scan_seconds {
        Some(seconds) => run_timed(&app, Duration::from_secs(seconds), args.overlay_out.as_deref()).await?,
        None => run_console(&app, args.overlay_out.as_deref()).await?,
    }

    if let Some(card) = app.scanner().detected() {
        println!("Detected card: {} ({:.0}%)", card.masked(), card.confidence);
    }

    app.shutdown();
    info!("card-scanner shutdown complete");

    Ok(())
}

#[cfg(feature = "backend-mock")]
fn camera_backend((width, height): (u32, u32)) -> Result<(Arc<dyn MediaDevices>, Arc<dyn VideoSink>)> {
    info!("Using synthetic camera ({width}x{height})");
    let camera = Arc::new(capture::mock::SyntheticCamera::new(width, height));
    Ok((camera.clone(), camera))
}

#[cfg(not(feature = "backend-mock"))]
fn camera_backend(_frame_size: (u32, u32)) -> Result<(Arc<dyn MediaDevices>, Arc<dyn VideoSink>)> {
    anyhow::bail!("No camera backend compiled in; enable the backend-mock feature")
}

/// Fallback tiers as printed by `--list-tiers`
fn describe_tiers(tiers: &[WorkerTier]) -> String {
    let mut out = String::from("OCR fallback tiers:\n");
    for (index, tier) in tiers.iter().enumerate() {
        if tier.is_bundled() {
            out.push_str(&format!("  [{index}] {} - bundled engine data\n", tier.name));
            continue;
        }
        out.push_str(&format!(
            "  [{index}] {} - worker: {}, core: {}, lang data: {}\n",
            tier.name,
            tier.worker_asset_path.as_deref().unwrap_or("(default)"),
            tier.core_asset_path.as_deref().unwrap_or("(default)"),
            tier.lang_data_path.as_deref().unwrap_or("(default)"),
        ));
    }
    out
}

/// Save an overlay raster as PNG
fn save_overlay(canvas: &RgbaImage, path: &Path) -> Result<()> {
    canvas
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write overlay to {}", path.display()))
}

/// Write the latest overlay if an output path was given
fn export_overlay(app: &CardScannerApp, overlay_out: Option<&Path>) {
    let (Some(path), Some(canvas)) = (overlay_out, app.scanner().overlay_canvas()) else {
        return;
    };
    match save_overlay(&canvas, path) {
        Ok(()) => info!("overlay written to {}", path.display()),
        Err(e) => warn!("{e:#}"),
    }
}

/// Print the current operator problem when it differs from the last one shown
fn report_problem(app: &CardScannerApp, last: &mut Option<String>) {
    let problem = app.status().problem().map(str::to_string);
    if problem != *last {
        if let Some(message) = &problem {
            println!("Problem: {message}");
        }
        *last = problem;
    }
}

/// Scan for a fixed time, stopping early on a detection or Ctrl+C
async fn run_timed(app: &CardScannerApp, duration: Duration, overlay_out: Option<&Path>) -> Result<()> {
    let mut readiness = app.scanner().capture().subscribe();
    tokio::time::timeout(
        CAMERA_START_TIMEOUT,
        readiness.wait_for(|r| *r == Readiness::Playing),
    )
    .await
    .context("Camera did not start playing")?
    .context("Camera session closed")?;

    println!("{}", app.dispatch(OperatorAction::ToggleScan).await?);

    let mut detections = app.scanner().subscribe();
    tokio::select! {
        _ = tokio::time::sleep(duration) => info!("scan time elapsed"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = detections.wait_for(|card| card.is_some()) => export_overlay(app, overlay_out),
    }

    app.scanner().stop_scan();
    Ok(())
}

/// Interactive operator console on stdin
async fn run_console(app: &CardScannerApp, overlay_out: Option<&Path>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut detections = app.scanner().subscribe();
    let mut engine_status = app.scanner().engine().subscribe();
    let mut engine_ready = false;
    let mut last_problem = None;
    println!("{}", ConsoleCommand::HELP);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = detections.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(number) = app.scanner().display_number() {
                    println!("Detected: {number}");
                    export_overlay(app, overlay_out);
                }
            }
            changed = engine_status.changed() => {
                if changed.is_err() {
                    break;
                }
                let ready = engine_status.borrow().ready;
                if ready && !engine_ready {
                    println!("OCR engine ready");
                }
                engine_ready = ready;
                report_problem(app, &mut last_problem);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(ConsoleCommand::Help) => println!("{}", ConsoleCommand::HELP),
                    Ok(ConsoleCommand::Status) => println!("{}", app.status()),
                    Ok(ConsoleCommand::Action(action)) => {
                        match app.dispatch(action).await {
                            Ok(message) => println!("{message}"),
                            Err(e) => println!("Error: {e:#}"),
                        }
                        report_problem(app, &mut last_problem);
                    }
                    Err(e) => println!("{e}. {}", ConsoleCommand::HELP),
                }
            }
        }
    }

    Ok(())
}
