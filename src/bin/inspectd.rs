//! inspectd - analyse a video source and write a defect report
//!
//! This daemon:
//! 1. Loads the engine configuration and both models
//! 2. Opens the frame source (synthetic, image folder, video file or stream)
//! 3. Pumps frames through the bounded queue into the inference worker
//! 4. Collects annotated frames and results for the session
//! 5. Writes `<name>_defect_report.json` plus screenshots on end of stream or Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use powerline_inspect::render::DEFAULT_LABEL_SCALE;
use powerline_inspect::report::{
    finish_session, report_name_for, DEFAULT_JPEG_QUALITY, DEFAULT_REPORT_CUTOFF,
};
use powerline_inspect::{
    run_producer, AnnotationRenderer, CascadeEngine, ConfigWatcher, EngineConfig,
    InferenceWorker, JsonReportWriter, ModelRegistry, ReportSink, SourceConfig, VideoSource,
};

#[path = "../ui.rs"]
mod ui;

/// Upper bound on waiting for queued frames after the source ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frame source: stub://name, image file or folder, video file, or stream URL.
    #[arg(long, env = "INSPECT_SOURCE", default_value = "stub://synthetic")]
    source: String,
    /// Engine configuration file (flat JSON). Edits are applied while running.
    #[arg(long, env = "INSPECT_CONFIG", default_value = "config.json")]
    config: PathBuf,
    /// Seconds between checks of the config file for edits (0 = never).
    #[arg(long, default_value_t = 2)]
    config_poll_secs: u64,
    /// Directory for the report and screenshots.
    #[arg(long, default_value = "reports")]
    report_dir: PathBuf,
    /// Report base name (defaults to the source file name).
    #[arg(long)]
    report_name: Option<String>,
    /// Minimum defect confidence for a report row. Independent of the engine thresholds.
    #[arg(long, default_value_t = DEFAULT_REPORT_CUTOFF)]
    report_cutoff: f32,
    /// JPEG quality of report screenshots (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u8,
    /// Label font pixel size multiplier on annotated frames.
    #[arg(long, default_value_t = DEFAULT_LABEL_SCALE)]
    label_scale: u32,
    /// Producer cadence in frames per second (0 = as fast as the source decodes).
    #[arg(long, default_value_t = 30)]
    target_fps: u32,
    /// Stop after this many source frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.report_cutoff) {
        return Err(anyhow!("--report-cutoff must be within [0, 1]"));
    }
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let config = EngineConfig::load(&args.config)?;
    log::info!(
        "detector={}, classifier={}, device={}",
        config.detector_ckpt,
        config.classifier_ckpt,
        config.device
    );
    // Session metrics and the progress counter both count defect frames at
    // the threshold the session started with.
    let defect_cutoff = config.defect_threshold;
    let engine = {
        let _stage = ui.stage("Load models");
        Arc::new(CascadeEngine::new(config, ModelRegistry::with_defaults())?)
    };
    let worker = InferenceWorker::new(engine.clone())
        .with_renderer(AnnotationRenderer::new().with_label_scale(args.label_scale));

    let mut source = {
        let _stage = ui.stage("Open source");
        VideoSource::open(SourceConfig {
            location: args.source.clone(),
            target_fps: args.target_fps,
            max_frames: args.max_frames,
            ..SourceConfig::default()
        })?
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let name = args
        .report_name
        .clone()
        .unwrap_or_else(|| report_name_for(&args.source));
    let mut writer = JsonReportWriter::new(&args.report_dir, &name)
        .with_report_cutoff(args.report_cutoff)
        .with_jpeg_quality(args.jpeg_quality);
    let results = worker.subscribe_results();
    let collector_ui = ui.clone();
    let collector = thread::Builder::new()
        .name("report-collector".to_string())
        .spawn(move || {
            let mut counter = collector_ui.frames("Analyse frames");
            for frame in results {
                counter.record(frame.result.has_defect_at(defect_cutoff));
                writer.accept(frame.image, frame.result);
            }
            writer
        })
        .context("failed to spawn report collector")?;

    let (reload_shutdown, reload_signal) = bounded::<()>(0);
    let reloader = if args.config_poll_secs > 0 {
        Some(spawn_config_reloader(
            ConfigWatcher::new(&args.config),
            Duration::from_secs(args.config_poll_secs),
            engine,
            reload_signal,
        )?)
    } else {
        None
    };

    worker.start()?;
    let produced = run_producer(&mut source, &worker, &stop);
    if !stop.load(Ordering::SeqCst) && !worker.wait_idle(DRAIN_TIMEOUT) {
        log::warn!("worker did not drain within {:?}", DRAIN_TIMEOUT);
    }
    drop(reload_shutdown);
    if let Some(reloader) = reloader {
        if reloader.join().is_err() {
            log::error!("config reloader panicked");
        }
    }
    worker.stop();
    let queue = worker.queue_stats();
    drop(worker);

    let mut writer = collector
        .join()
        .map_err(|_| anyhow!("report collector panicked"))?;
    let metrics = writer.session().metrics(defect_cutoff);
    let outcome = {
        let _stage = ui.stage("Write report");
        finish_session(&mut writer, &metrics, produced)
    };
    if let Some(path) = writer.written() {
        println!("report written to {}", path.display());
    }

    let produced = outcome?;
    log::info!(
        "session: {} frames read, {} queued, {} dropped at queue",
        produced.frames_read,
        queue.accepted,
        queue.dropped
    );
    Ok(())
}

/// Apply config file edits to the running engine until `shutdown` closes.
fn spawn_config_reloader(
    mut watcher: ConfigWatcher,
    interval: Duration,
    engine: Arc<CascadeEngine>,
    shutdown: Receiver<()>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("config-reloader".to_string())
        .spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = shutdown.recv_timeout(interval) {
                match watcher.poll() {
                    Ok(Some(config)) => match engine.reload(config) {
                        Ok(()) => log::info!("applied {}", watcher.path().display()),
                        Err(e) => log::warn!("kept current models: {}", e),
                    },
                    Ok(None) => {}
                    Err(e) => log::warn!("ignoring {}: {:#}", watcher.path().display(), e),
                }
            }
        })
        .context("failed to spawn config reloader")
}
