//! sigclean: command-line signature cleanup.
//!
//! Runs the signature pipeline on an image file, optionally applies a
//! perspective correction and a crop, and writes the result as a
//! transparent PNG named the same way the browser download is. Useful
//! for:
//!
//! - Batch-free local cleanup of a single scanned or photographed signature
//! - Tuning threshold, contrast, and darkness against real photos
//! - Measuring per-stage durations with `--report` or `--json`
//! - Inspecting each intermediate image with `--save-stages`
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin sigclean -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (e.g. `RUST_LOG=sigclean_pipeline=debug`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use sigclean_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use sigclean_pipeline::pipeline::{Advance, Stage};
use sigclean_pipeline::{
    CropRect, DEFAULT_GRID, PerspectiveQuad, Pipeline, Point, ProcessingOptions, Session, Size,
    Upload,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Turn a photographed signature into a transparent PNG.
#[derive(Parser)]
#[command(name = "sigclean", version)]
struct Cli {
    /// Path to the input image (JPEG, PNG; HEIC is recognised but cannot be decoded).
    image_path: PathBuf,

    /// Brightness cutoff (0-255); brighter pixels become transparent.
    #[arg(long, default_value_t = ProcessingOptions::DEFAULT_THRESHOLD)]
    threshold: u8,

    /// Scale applied to ink colour after contrast (0.0-1.0, lower is darker).
    #[arg(long, default_value_t = ProcessingOptions::DEFAULT_DARKNESS_FACTOR)]
    darkness: f32,

    /// Contrast multiplier around mid-gray.
    #[arg(long, default_value_t = ProcessingOptions::DEFAULT_CONTRAST)]
    contrast: f32,

    /// Keep isolated specks.
    #[arg(long)]
    no_noise_reduction: bool,

    /// Keep hard alpha edges.
    #[arg(long)]
    no_edge_smoothing: bool,

    /// Use the threshold as given instead of lowering it by 15%.
    #[arg(long)]
    no_aggressive: bool,

    /// Full processing options as a JSON string.
    ///
    /// When provided, all other processing flags are ignored. The JSON
    /// must be a valid `ProcessingOptions` serialization; missing fields
    /// take their defaults.
    #[arg(long)]
    options_json: Option<String>,

    /// Perspective corners in source pixels, TL TR BR BL:
    /// `x0,y0,x1,y1,x2,y2,x3,y3`.
    #[arg(long, value_parser = parse_quad)]
    quad: Option<PerspectiveQuad>,

    /// Warp grid resolution used with `--quad`.
    #[arg(
        long,
        default_value_t = DEFAULT_GRID,
        value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..)
    )]
    grid: u32,

    /// Crop rectangle in pixels of the (corrected) image: `x,y,width,height`.
    #[arg(long, value_parser = parse_crop, conflicts_with = "auto_crop")]
    crop: Option<CropRect>,

    /// Crop to the detected ink bounds.
    #[arg(long)]
    auto_crop: bool,

    /// Rotate clockwise by this many degrees before cropping. Without
    /// `--crop` or `--auto-crop` the crop window is the whole image.
    #[arg(long, allow_hyphen_values = true)]
    rotate: Option<i32>,

    /// Directory the PNG is written to.
    #[arg(long, short, default_value = ".")]
    output: PathBuf,

    /// Print the per-stage diagnostics report.
    #[arg(long)]
    report: bool,

    /// Output diagnostics as JSON instead of the human-readable report.
    #[arg(long)]
    json: bool,

    /// Also write every intermediate stage image as `<index>-<stage>.png`
    /// into this directory.
    #[arg(long)]
    save_stages: Option<PathBuf>,

    /// Number of diagnostic runs for averaging (with `--report` or `--json`).
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    runs: usize,
}

/// Build [`ProcessingOptions`] from CLI arguments.
///
/// If `--options-json` is provided, the JSON is parsed directly and all
/// individual processing flags are ignored.
fn options_from_cli(cli: &Cli) -> Result<ProcessingOptions, String> {
    let options = if let Some(ref json) = cli.options_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --options-json: {e}"))?
    } else {
        ProcessingOptions {
            threshold: cli.threshold,
            darkness_factor: cli.darkness,
            contrast: cli.contrast,
            noise_reduction: !cli.no_noise_reduction,
            edge_smoothing: !cli.no_edge_smoothing,
            aggressive_mode: !cli.no_aggressive,
        }
    };
    options.validate().map_err(|e| e.to_string())?;
    Ok(options)
}

fn parse_numbers<const N: usize>(s: &str) -> Result<[f64; N], String> {
    let values = s
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid number {part:?}: {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let found = values.len();
    values
        .try_into()
        .map_err(|_| format!("expected {N} comma-separated numbers, got {found}"))
}

fn parse_quad(s: &str) -> Result<PerspectiveQuad, String> {
    let [x0, y0, x1, y1, x2, y2, x3, y3] = parse_numbers::<8>(s)?;
    Ok(PerspectiveQuad {
        corners: [
            Point::new(x0, y0),
            Point::new(x1, y1),
            Point::new(x2, y2),
            Point::new(x3, y3),
        ],
    })
}

fn parse_crop(s: &str) -> Result<CropRect, String> {
    let [x, y, width, height] = parse_numbers::<4>(s)?;
    if width <= 0.0 || height <= 0.0 {
        return Err("crop width and height must be positive".into());
    }
    Ok(CropRect::new(x, y, width, height))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let options = match options_from_cli(&cli) {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes)",
        cli.image_path.display(),
        image_bytes.len(),
    );
    debug!(?options, "processing options");

    let file_name = cli
        .image_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let mut session = Session::new();
    let loaded = session.load(&Upload::new(&image_bytes, file_name), &options, |p| {
        eprintln!("[{}/4] {} ({}%)", p.step().number(), p.step(), p.percent);
    });
    if let Err(e) = loaded {
        match session.error() {
            Some(message) if !e.is_validation() => eprintln!("{message} ({e})"),
            _ => eprintln!("Rejected: {e}"),
        }
        return ExitCode::FAILURE;
    }

    if cli.report || cli.json {
        match run_diagnostics(&image_bytes, &options, cli.runs, cli.json) {
            Ok(all) if all.len() > 1 => print_multi_run_summary(&all),
            Ok(_) => {}
            Err(msg) => {
                eprintln!("{msg}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Some(ref dir) = cli.save_stages {
        match save_stages(&image_bytes, &options, dir) {
            Ok(paths) => eprintln!("Saved {} stage images to {}", paths.len(), dir.display()),
            Err(msg) => {
                eprintln!("{msg}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(msg) = apply_edits(&mut session, &cli) {
        eprintln!("{msg}");
        return ExitCode::FAILURE;
    }

    match write_output(&session, &cli.output) {
        Ok(path) => {
            eprintln!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// Apply `--quad`, then `--rotate` with `--crop` / `--auto-crop`, in
/// that order.
fn apply_edits(session: &mut Session, cli: &Cli) -> Result<(), String> {
    if let Some(quad) = cli.quad {
        session
            .apply_perspective(&quad, cli.grid)
            .map_err(|e| format!("Perspective correction failed: {e}"))?;
        info!(grid = cli.grid, "applied perspective correction");
    }

    // The CLI works at native resolution: display units are pixels.
    let native = session
        .current()
        .map(|image| Size::new(f64::from(image.width()), f64::from(image.height())))
        .ok_or("No processed image")?;

    let rect = if cli.auto_crop {
        session.suggest_crop(native)
    } else {
        cli.crop
    };
    let rect = match (rect, cli.rotate) {
        (None, Some(_)) => Some(CropRect::full(native)),
        (rect, _) => rect,
    };
    if let Some(rect) = rect {
        let degrees = cli.rotate.unwrap_or(0);
        session
            .apply_rotated_crop(&rect, degrees, native)
            .map_err(|e| format!("Crop failed: {e}"))?;
        info!(?rect, degrees, "applied crop");
    }
    Ok(())
}

fn write_output(session: &Session, dir: &Path) -> Result<PathBuf, String> {
    let exported = sigclean_export::export_session(session, unix_millis())
        .map_err(|e| format!("Export failed: {e}"))?;
    let path = dir.join(&exported.filename);
    std::fs::write(&path, &exported.bytes)
        .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    Ok(path)
}

/// Run the pipeline stage by stage and encode each stage's image.
///
/// Returns `(file name, PNG bytes)` pairs in stage order. The undecoded
/// source and disabled optional stages produce no file.
fn stage_pngs(
    image_bytes: &[u8],
    options: &ProcessingOptions,
) -> Result<Vec<(String, Vec<u8>)>, String> {
    let mut stage: Stage = Pipeline::new(image_bytes.to_vec(), options.clone()).into();
    let mut files = Vec::new();
    loop {
        if let Some(image) = stage.output().image() {
            let png = sigclean_export::encode_png(image)
                .map_err(|e| format!("Error encoding {} stage: {e}", stage.name()))?;
            files.push((format!("{}-{}.png", stage.index(), stage.name()), png));
        }
        match stage.advance().map_err(|e| format!("Pipeline error: {e}"))? {
            Advance::Next(next) => stage = next,
            Advance::Complete(_) => return Ok(files),
        }
    }
}

fn save_stages(
    image_bytes: &[u8],
    options: &ProcessingOptions,
    dir: &Path,
) -> Result<Vec<PathBuf>, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Error creating {}: {e}", dir.display()))?;
    stage_pngs(image_bytes, options)?
        .into_iter()
        .map(|(name, png)| {
            let path = dir.join(name);
            std::fs::write(&path, png)
                .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
            debug!(path = %path.display(), "saved stage image");
            Ok(path)
        })
        .collect()
}

fn run_diagnostics(
    image_bytes: &[u8],
    options: &ProcessingOptions,
    runs: usize,
    json: bool,
) -> Result<Vec<PipelineDiagnostics>, String> {
    let mut all_diagnostics = Vec::with_capacity(runs);
    for run in 0..runs {
        if runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, runs);
        }
        let (_, diagnostics) = sigclean_pipeline::diagnostics::process_with_diagnostics(
            image_bytes,
            options,
            &StdClock,
        )
        .map_err(|e| format!("Pipeline error: {e}"))?;

        if json {
            let json = serde_json::to_string_pretty(&diagnostics)
                .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
            println!("{json}");
        } else {
            println!("{}", diagnostics.report());
        }
        all_diagnostics.push(diagnostics);
    }
    Ok(all_diagnostics)
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len().max(1) as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Decode", |d| Some(d.decode.duration)),
        ("Background Removal", |d| Some(d.background_removal.duration)),
        ("Tone", |d| Some(d.tone.duration)),
        ("Despeckle", |d| d.despeckle.as_ref().map(|s| s.duration)),
        ("Feather", |d| d.feather.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
