//! canvas-cast agent
//!
//! Records a page's canvas surface as WebM video, whole or in timed chunks,
//! and mirrors the single recording flag in a two-state indicator icon.

mod capture;
mod config;
mod coordinator;
mod data;
mod logging;
mod naming;
mod storage;
mod ui;
mod vision;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use capture::{CaptureController, EncoderPipeline, FfmpegPipeline, StaticLocator};
use config::Config;
use coordinator::{create_engine_channels, CoordinatorEngine, EngineCommand};
use storage::SegmentStore;
use ui::RecordingIndicator;

/// Main entry point, runs the status indicator on the main thread
fn main() -> Result<()> {
    let _log_guard = logging::init_logging()?;

    info!("canvas-cast agent starting...");
    if let Ok(log_dir) = logging::get_log_dir() {
        info!("Logging to {:?}", log_dir);
    }

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded from {:?}", config.config_path());
    info!(
        "Capturing {} into {:?}",
        config.page.address, config.storage.output_directory
    );

    // Create tokio runtime for async operations
    let runtime = tokio::runtime::Runtime::new()?;

    // Engine channels, the command relay and the segment relay
    let (cmd_tx, cmd_rx, status_tx, status_rx) = create_engine_channels();
    let (control_tx, control_rx) = mpsc::channel(8);
    let (capture_tx, capture_rx) = mpsc::unbounded_channel();

    let store = SegmentStore::new(config.storage.output_directory.clone());

    let pipeline: Box<dyn EncoderPipeline> = match &config.recording.encoder {
        Some(binary) => Box::new(FfmpegPipeline::with_binary(binary.clone())),
        None => Box::new(FfmpegPipeline::new()),
    };

    let controller = CaptureController::new(
        config.page.address.clone(),
        Box::new(StaticLocator::with_pattern(config.pattern_spec())),
        pipeline,
        config.capture_settings(),
        control_rx,
        capture_tx,
    );

    let mut engine = CoordinatorEngine::new(
        cmd_rx,
        status_tx,
        control_tx,
        capture_rx,
        store,
        config.storage.counter_scope,
    );

    // Wrap runtime in Arc for sharing with signal handlers
    let runtime = Arc::new(runtime);

    // The capture controller runs as a task; the engine gets its own thread
    runtime.spawn(controller.run());

    let engine_runtime = runtime.clone();
    let engine_handle = std::thread::spawn(move || {
        engine_runtime.block_on(async move {
            engine.run().await;
        });
    });

    // Set up Ctrl+C handler that sends shutdown command
    let ctrl_c_tx = cmd_tx.clone();
    let ctrl_c_runtime = runtime.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let tx = ctrl_c_tx.clone();
        ctrl_c_runtime.spawn(async move {
            let _ = tx.send(EngineCommand::Shutdown).await;
        });
    })?;

    // SIGUSR1 stands in for the toolbar click on a headless agent
    #[cfg(unix)]
    {
        let toggle_tx = cmd_tx.clone();
        runtime.spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let mut stream = match signal(SignalKind::user_defined1()) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to install SIGUSR1 handler: {}", e);
                    return;
                }
            };

            while stream.recv().await.is_some() {
                info!("SIGUSR1 received, toggling recording");
                if toggle_tx.send(EngineCommand::Toggle).await.is_err() {
                    break;
                }
            }
        });
    }

    // Optionally kick off the first session straight away
    if config.recording.autostart {
        info!("Autostart enabled, toggling recording on");
        let autostart_tx = cmd_tx.clone();
        runtime.spawn(async move {
            let _ = autostart_tx.send(EngineCommand::Toggle).await;
        });
    }

    // Run the indicator on the main thread. Its loop ends when the engine
    // drops the status channel, so a clean engine exit unwinds main too.
    match RecordingIndicator::new(status_rx) {
        Ok(indicator) => {
            info!("Status indicator running on main thread");
            indicator.run();
            info!("Status channel closed, shutting down...");
        }
        Err(e) => {
            error!("Failed to create status indicator: {}", e);
            info!("Running without an indicator; send SIGUSR1 to toggle, Ctrl+C to exit");
        }
    }

    // Wait for engine thread to finish (Ctrl+C handler sends shutdown)
    let _ = engine_handle.join();

    info!("Shutdown complete");
    Ok(())
}

fn print_help() {
    println!("canvas-cast agent - page canvas recording");
    println!();
    println!("USAGE:");
    println!("    canvas-cast [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help    Print this help message");
    println!();
    println!("SIGNALS:");
    println!("    SIGUSR1       Toggle recording on/off");
    println!("    SIGINT        Shut down, flushing any live session");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG               Set log level (e.g., debug, info, warn)");
    println!("    CANVAS_CAST_LOG_PATH   Override the log directory");
    println!();
    println!("For more information, visit: https://github.com/canvas-cast/canvas-cast");
}
