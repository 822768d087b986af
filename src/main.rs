//! plate-sentry - Stamped plate inspection batch tool
//!
//! Walks a tree of press-line capture directories, locates plate regions in
//! each image, triages plate bodies for motion blur, decodes the two-line
//! stamped ID and writes the routed images plus a summary CSV.

mod batch;
mod config;
mod decode;
mod detection;
mod error;
mod inspect;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::batch::BatchDriver;
use crate::detection::onnx::{OnnxBlurClassifier, OnnxDetector};
use crate::inspect::Inspector;
use crate::report::{OutcomeWriter, UnrecognizedIdWriter};

/// Class count of the region detection model.
const REGION_CLASSES: u32 = 5;
/// Class count of the character glyph model.
const GLYPH_CLASSES: u32 = 23;

/// plate-sentry - Stamped plate inspection
#[derive(Parser, Debug)]
#[command(name = "plate-sentry")]
#[command(about = "Blur triage and ID decoding for stamped plate captures")]
struct Args {
    /// Input root containing one directory per press line
    input: PathBuf,

    /// Output root for routed images
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Summary CSV path (defaults to <output>/summary.csv)
    #[arg(long)]
    summary_csv: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, default_value = "plate-sentry.toml")]
    config: PathBuf,

    /// Enable per-region debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let config = config::load_or_create(&args.config)?;

    info!("plate-sentry starting");
    let begin = Instant::now();

    let region = OnnxDetector::new(
        &config.models.region_model,
        config.models.detector_input_size,
        REGION_CLASSES,
        config.models.use_gpu,
    )
    .context("failed to load the region detection model")?;
    let characters = OnnxDetector::new(
        &config.models.character_model,
        config.models.detector_input_size,
        GLYPH_CLASSES,
        config.models.use_gpu,
    )
    .context("failed to load the character glyph model")?;
    let blur = OnnxBlurClassifier::new(
        &config.models.blur_model,
        config.models.classifier_input_size,
        config.models.use_gpu,
    )
    .context("failed to load the blur classification model")?;
    info!("models loaded in {:?}", begin.elapsed());

    let summary_csv = args
        .summary_csv
        .unwrap_or_else(|| args.output.join("summary.csv"));
    let writer = OutcomeWriter::new(&args.output, &summary_csv)?;
    let unrecognized = UnrecognizedIdWriter::new(&args.output.join("unrecognizedId"))?;

    let skip_pattern = config.batch.skip_pattern.clone();
    let inspector = Inspector::new(
        Box::new(region),
        Box::new(characters),
        Box::new(blur),
        config,
        unrecognized,
    )?;

    let begin = Instant::now();
    let summary = BatchDriver::new(inspector, writer, skip_pattern).run(&args.input)?;
    info!(
        "batch finished in {:?}: {} processed ({} sharp, {} blurry, {} empty), {} skipped, {} failed",
        begin.elapsed(),
        summary.processed,
        summary.not_blurry,
        summary.blurry,
        summary.empty,
        summary.skipped,
        summary.failed
    );

    Ok(())
}
