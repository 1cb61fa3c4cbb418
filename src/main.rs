//! Topaz Automation
//!
//! Batch-drives Topaz Gigapixel and Topaz Photo AI through their desktop UI,
//! detecting when each step has finished by reading the screen.

mod automation;
mod capture;
mod config;
mod detection;
mod error;
mod logging;
mod ocr;
mod paths;
mod template;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use automation::{DesktopInput, Discovery, PhotoAiBatch, RunHistory};
use capture::{
    DesktopWindows, Region, RegionCapturer, RegionSpec, ScreenCapturer, WindowLocator,
};
use config::AppConfig;
use detection::{Detector, SystemClock};
use ocr::TextRecognizer;
use template::{TemplateFinder, TemplateMatcher, TemplateStore};

#[derive(Parser, Debug)]
#[command(name = "topaz-automation", version, about = "Batch automation for Topaz Gigapixel and Photo AI")]
struct Cli {
    /// Config file (defaults to config.json next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Save every polled frame to the debug directory
    #[arg(long, global = true)]
    debug: bool,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Fail a wait that no backend can verify instead of sleeping through it
    #[arg(long, global = true)]
    no_time_fallback: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upscale images with Topaz Gigapixel, one at a time
    Upscale {
        /// Process every image in this directory
        #[arg(long, conflicts_with = "single", required_unless_present = "single")]
        input_dir: Option<PathBuf>,

        /// Process one file
        #[arg(long)]
        single: Option<PathBuf>,

        /// Seconds to wait before watching the preview
        #[arg(long)]
        wait_time: Option<f64>,

        /// Maximum seconds to wait for a save
        #[arg(long)]
        save_wait_time: Option<f64>,

        /// Save each image here as <name>_upscaled.<ext> and wait for the file
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Apply Autopilot to a whole directory with Topaz Photo AI
    Photoai {
        #[arg(long)]
        input_dir: PathBuf,
    },

    /// OCR a screen region and look for a word
    FindText {
        /// x,y,w,h in screen pixels
        #[arg(long, value_parser = parse_region)]
        region: Region,
        #[arg(long)]
        target: String,
    },

    /// Look for a stored template on screen
    MatchTemplate {
        #[arg(long)]
        name: String,
        /// x,y,w,h in screen pixels (whole screen if omitted)
        #[arg(long, value_parser = parse_region)]
        region: Option<Region>,
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Capture a screen region as a new template
    CaptureTemplate {
        #[arg(long)]
        name: String,
        #[arg(long, value_parser = parse_region)]
        region: Region,
    },

    /// List visible top-level windows
    ListWindows,

    /// Show recent run histories
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn parse_region(s: &str) -> Result<Region, String> {
    Region::parse(s).ok_or_else(|| format!("expected x,y,w,h, got '{}'", s))
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).round() as u64
}

/// Applies command-line overrides on top of the loaded config.
fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if cli.debug {
        config.detection.debug = true;
    }
    if cli.no_time_fallback {
        config.detection.time_fallback = false;
    }
    if cli.verbose {
        config.log_level = "debug".to_string();
    }
    if let Command::Upscale {
        wait_time,
        save_wait_time,
        output_dir,
        ..
    } = &cli.command
    {
        if let Some(dir) = output_dir {
            config.gigapixel.output_dir = Some(dir.clone());
        }
        if let Some(secs) = wait_time {
            config.gigapixel.processing_wait_ms = secs_to_ms(*secs);
        }
        if let Some(secs) = save_wait_time {
            config.gigapixel.save_timing.timeout_ms = secs_to_ms(*secs);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    paths::ensure_directories().context("Failed to create output directories")?;

    let config_path = cli.config.clone().unwrap_or_else(paths::get_config_path);
    let (mut config, config_load) = config::load_config_from(&config_path);
    apply_overrides(&mut config, &cli);

    let log_path = logging::init(&paths::get_logs_dir(), &config.log_level)?;
    logging::install_panic_hook();
    tracing::info!("Topaz Automation {} starting", env!("CARGO_PKG_VERSION"));
    config_load.log(&config_path);
    tracing::info!("Config: {}", config_path.display());
    tracing::info!("Log file: {}", log_path.display());

    let config = config::init_config(config);

    let capturer = ScreenCapturer::new();
    let windows = DesktopWindows::new();
    let clock = SystemClock;
    let matcher = TemplateMatcher::new(config.detection.scales.clone());
    tracing::debug!("Template scales: {:?}", matcher.scales());
    let templates = Arc::new(TemplateFinder::new(
        TemplateStore::new(config.detection.resolved_template_dir()),
        matcher,
    ));
    let recognizer = TextRecognizer::from_config(config, templates);
    for (name, available) in recognizer.engine_status() {
        if available {
            tracing::info!("OCR backend '{}' available", name);
        } else {
            tracing::warn!("OCR backend '{}' unavailable", name);
        }
    }
    if config.detection.debug {
        tracing::info!(
            "Debug frames go to {}",
            config.detection.resolved_debug_dir().display()
        );
    }
    let detector = Detector::new(
        &capturer,
        &windows,
        &recognizer,
        &clock,
        config.detection.clone(),
    );

    match &cli.command {
        Command::Upscale {
            input_dir, single, ..
        } => run_upscale(config, &detector, input_dir.as_deref(), single.as_deref()),
        Command::Photoai { input_dir } => run_photoai(config, &detector, input_dir),
        Command::FindText { region, target } => find_text(&detector, &recognizer, *region, target),
        Command::MatchTemplate {
            name,
            region,
            threshold,
        } => match_template(config, &detector, &capturer, name, *region, *threshold),
        Command::CaptureTemplate { name, region } => capture_template(&detector, &capturer, name, *region),
        Command::ListWindows => {
            list_windows(&windows);
            Ok(())
        }
        Command::History { limit } => {
            show_history(*limit);
            Ok(())
        }
    }
}

fn require_window(windows: &dyn WindowLocator, title: &str) -> Result<()> {
    if windows.find_window(title).is_none() {
        bail!("No window titled '{}' found. Start the application first.", title);
    }
    Ok(())
}

/// Starts a run history with earlier outputs found next to the inputs
/// recorded as skipped.
fn start_history(mode: &str, input_dir: Option<&Path>, skipped: &[PathBuf]) -> RunHistory {
    let mut history = RunHistory::start(mode, input_dir);
    for path in skipped {
        history.add_skipped(path, "previous output");
    }
    history
}

fn run_upscale(
    config: &AppConfig,
    detector: &Detector<'_>,
    input_dir: Option<&Path>,
    single: Option<&Path>,
) -> Result<()> {
    let Discovery { images, skipped } = match (input_dir, single) {
        (_, Some(file)) => {
            if !file.is_file() {
                bail!("File not found: {}", file.display());
            }
            Discovery {
                images: vec![file.to_path_buf()],
                skipped: Vec::new(),
            }
        }
        (Some(dir), None) => automation::discover_images(dir, &config.gigapixel.processed_suffixes)?,
        (None, None) => bail!("Either --input-dir or --single is required"),
    };
    if images.is_empty() {
        tracing::warn!("No images to process");
        return Ok(());
    }
    require_window(detector.windows(), &config.gigapixel.window_title)?;
    if let Some(dir) = &config.gigapixel.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        tracing::info!("Saving upscaled images to {}", dir.display());
    }

    let mut history = start_history(
        "upscale",
        input_dir.or_else(|| single.and_then(Path::parent)),
        &skipped,
    );
    let input = DesktopInput::new();
    let results = automation::run_batch(
        detector,
        &input,
        &config.gigapixel,
        config.title_timing,
        &images,
        &mut history,
    );
    history.finalize(&paths::get_run_history_dir())?;

    println!(
        "Upscaled {}/{} images ({} failed)",
        results.success, results.total, results.failed
    );
    Ok(())
}

fn run_photoai(config: &AppConfig, detector: &Detector<'_>, input_dir: &Path) -> Result<()> {
    let Discovery { images, skipped } =
        automation::discover_images(input_dir, &config.photoai.processed_suffixes)?;
    if images.is_empty() {
        tracing::warn!("No images to process");
        return Ok(());
    }
    require_window(detector.windows(), &config.photoai.window_title)?;

    let mut history = start_history("photoai", Some(input_dir), &skipped);
    let input = DesktopInput::new();
    let mut batch = PhotoAiBatch::new(detector, &input, &config.photoai, input_dir, images);
    let exported = batch.run()?;
    let results = batch.record(&mut history);
    history.finalize(&paths::get_run_history_dir())?;

    if !exported {
        bail!("Photo AI batch stopped: {}", batch.state);
    }
    println!(
        "Photo AI confirmed {}/{} images ({} not confirmed)",
        results.success, results.total, results.failed
    );
    Ok(())
}

fn find_text(
    detector: &Detector<'_>,
    recognizer: &TextRecognizer,
    region: Region,
    target: &str,
) -> Result<()> {
    let frame = detector
        .grab(&RegionSpec::Absolute(region), "find_text")
        .with_context(|| format!("Failed to capture {}", region))?;
    let result = recognizer.find_text(&frame, target);
    match result.method {
        Some(method) if result.found => println!("Found '{}' via {}", target, method),
        _ => println!("'{}' not found", target),
    }
    println!("Recognized: {}", result.text);
    Ok(())
}

fn match_template(
    config: &AppConfig,
    detector: &Detector<'_>,
    capturer: &dyn RegionCapturer,
    name: &str,
    region: Option<Region>,
    threshold: Option<f32>,
) -> Result<()> {
    if !detector.templates().has(name) {
        bail!(
            "No template '{}' in {}",
            name,
            detector.templates().store().dir().display()
        );
    }
    let area = region
        .or_else(|| capturer.screen_bounds())
        .context("Could not determine the screen bounds")?;
    let frame = capturer.capture(&area)?;
    let threshold = threshold.unwrap_or_else(|| {
        config
            .detection
            .threshold_for(name, config.detection.default_threshold)
    });

    let result = detector.templates().match_named(&frame, name, threshold);
    if let (true, Some((cx, cy))) = (result.found, result.center()) {
        println!(
            "Found '{}' at ({}, {}), confidence {:.3}, scale {:?}",
            name,
            area.x + cx as i32,
            area.y + cy as i32,
            result.confidence,
            result.scale
        );
    } else {
        println!(
            "'{}' not found (best confidence {:.3}, threshold {:.2})",
            name, result.confidence, threshold
        );
    }
    Ok(())
}

fn capture_template(
    detector: &Detector<'_>,
    capturer: &dyn RegionCapturer,
    name: &str,
    region: Region,
) -> Result<()> {
    let frame = capturer.capture(&region)?;
    let path = detector.templates().store().save(name, &frame)?;
    println!("Saved template '{}' ({}x{}) to {}", name, frame.width(), frame.height(), path.display());
    Ok(())
}

fn list_windows(windows: &dyn WindowLocator) {
    for window in windows.list_windows() {
        println!("{:>10}  {}  {}", window.handle.0, window.rect, window.title);
    }
    if let Some(title) = windows.active_window_title() {
        println!("Active: {}", title);
    }
}

fn show_history(limit: usize) {
    let runs = automation::recent(&paths::get_run_history_dir(), limit);
    if runs.is_empty() {
        println!("No run history yet");
        return;
    }
    for run in runs {
        println!(
            "{}  {:<8} {}/{} ok, {} failed, {} skipped, {:.0}s  {}",
            run.run_id,
            run.mode,
            run.summary.success,
            run.summary.total,
            run.summary.failed,
            run.summary.skipped,
            run.duration_seconds.unwrap_or_default(),
            run.input_directory.as_deref().unwrap_or("-")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upscale_flags_override_waits() {
        let cli = Cli::parse_from([
            "topaz-automation",
            "--no-time-fallback",
            "upscale",
            "--input-dir",
            "C:/photos",
            "--wait-time",
            "2.5",
            "--save-wait-time",
            "600",
        ]);
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli);

        assert!(!config.detection.time_fallback);
        assert!(!config.detection.debug);
        assert_eq!(config.gigapixel.processing_wait_ms, 2_500);
        assert_eq!(config.gigapixel.save_timing.timeout_ms, 600_000);
    }

    #[test]
    fn test_output_dir_flag_sets_gigapixel_output() {
        let cli = Cli::parse_from([
            "topaz-automation",
            "upscale",
            "--single",
            "photo.png",
            "--output-dir",
            "out",
        ]);
        let mut config = AppConfig::default();
        assert_eq!(config.gigapixel.output_dir, None);
        apply_overrides(&mut config, &cli);
        assert_eq!(config.gigapixel.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_history_starts_with_previous_outputs_skipped() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "a_upscaled.png", "b-gigapixel.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let found = automation::discover_images(
            dir.path(),
            &AppConfig::default().gigapixel.processed_suffixes,
        )
        .unwrap();

        let history = start_history("upscale", Some(dir.path()), &found.skipped);
        let names: Vec<&str> = history
            .processed_images
            .iter()
            .map(|r| r.image_name.as_str())
            .collect();
        assert_eq!(names, vec!["a_upscaled.png", "b-gigapixel.jpg"]);
        assert!(history.processed_images.iter().all(|r| r.skipped && !r.success));
        assert_eq!(
            history.processed_images[0].error.as_deref(),
            Some("previous output")
        );
    }

    #[test]
    fn test_upscale_needs_a_source() {
        assert!(Cli::try_parse_from(["topaz-automation", "upscale"]).is_err());
        assert!(Cli::try_parse_from([
            "topaz-automation",
            "upscale",
            "--input-dir",
            "a",
            "--single",
            "b.png"
        ])
        .is_err());
    }

    #[test]
    fn test_region_argument() {
        let cli = Cli::parse_from([
            "topaz-automation",
            "find-text",
            "--region",
            "140,130,720,150",
            "--target",
            "Done",
            "--debug",
        ]);
        assert!(cli.debug);
        match cli.command {
            Command::FindText { region, target } => {
                assert_eq!(region, Region::new(140, 130, 720, 150));
                assert_eq!(target, "Done");
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["topaz-automation", "find-text", "--region", "1,2", "--target", "x"]).is_err());
    }
}
