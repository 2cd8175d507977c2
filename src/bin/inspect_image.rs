//! inspect_image - run the cascade on one image and save the annotated result

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use powerline_inspect::render::DEFAULT_LABEL_SCALE;
use powerline_inspect::{AnnotationRenderer, CascadeEngine, EngineConfig, ModelRegistry};

#[allow(dead_code)]
#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to analyse.
    #[arg(long)]
    img: PathBuf,
    /// Engine configuration file (flat JSON).
    #[arg(long, env = "INSPECT_CONFIG", default_value = "config.json")]
    config: PathBuf,
    /// Where to write the annotated image.
    #[arg(long, default_value = "result_vis.jpg")]
    output: PathBuf,
    /// Skip the confidence heatmap overlay.
    #[arg(long)]
    no_heatmap: bool,
    /// Label font pixel size multiplier.
    #[arg(long, default_value_t = DEFAULT_LABEL_SCALE)]
    label_scale: u32,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let config = EngineConfig::load(&args.config)?;
    let engine = {
        let _stage = ui.stage("Load models");
        CascadeEngine::new(config, ModelRegistry::with_defaults())?
    };
    let image = {
        let _stage = ui.stage("Decode image");
        image::open(&args.img)
            .with_context(|| format!("failed to open image {}", args.img.display()))?
            .to_rgb8()
    };
    let detections = {
        let _stage = ui.stage("Run cascade");
        engine.infer(&image)?
    };

    println!("detections: {}", detections.len());
    for detection in &detections {
        println!("{}", serde_json::to_string(detection)?);
    }

    {
        let _stage = ui.stage("Write annotated image");
        let annotated = AnnotationRenderer::new()
            .with_label_scale(args.label_scale)
            .draw(&image, &detections, !args.no_heatmap);
        annotated
            .save(&args.output)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
    }
    println!("annotated image written to {}", args.output.display());
    Ok(())
}
