use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use av_motionfield::{
    Direction, ExtractionOptions, FrameSink, SamplingMode, extract_motion_fields, parse_gop_size,
    read_inspector_dump,
    sink::{ImageSink, MetricKind, MetricsLog, RawSink},
};
use clap::{ArgAction, Parser};
use console::{Term, style};
use log::{LevelFilter, info};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "av-motionfield", version)]
#[command(about = "Keyframe-anchored motion fields from an AV1 inspector dump")]
struct Cli {
    /// JSON dump written by the AV1 bitstream inspector
    input: PathBuf,

    /// GOP size the sequence was encoded with
    #[arg(short, long)]
    gop: Option<String>,

    /// The source was encoded in reverse order
    #[arg(long)]
    forward: bool,

    /// How reference fields are sampled: nearest or bilinear
    #[arg(long)]
    sampling: Option<SamplingMode>,

    /// Output width in pixels, defaults to the coded grid width
    #[arg(long)]
    width: Option<usize>,

    /// Output height in pixels, defaults to the coded grid height
    #[arg(long)]
    height: Option<usize>,

    /// Metric to log per frame (total_variation, mean_magnitude,
    /// max_magnitude). May be repeated
    #[arg(short, long = "metric")]
    metrics: Vec<String>,

    /// Directory to write renderings, dumps and logs to
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip PNG renderings
    #[arg(long)]
    no_render: bool,

    /// Skip NPY dumps
    #[arg(long)]
    no_raw: bool,

    /// JSON file with default settings. Command line values take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File to write the extraction results in
    #[arg(long)]
    results: Option<PathBuf>,

    /// Increase log verbosity
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// GOP sizes may be written as numbers or strings.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum GopValue {
    Number(u64),
    Text(String),
}

#[derive(Deserialize, Debug, Default)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    gop_size: Option<GopValue>,
    forward: Option<bool>,
    sampling: Option<SamplingMode>,
    width: Option<usize>,
    height: Option<usize>,
    metrics: Option<Vec<String>>,
    output: Option<PathBuf>,
    render: Option<bool>,
    raw: Option<bool>,
}

impl FileConfig {
    fn read(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Could not open config {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Could not parse config {}", path.display()))
    }
}

/// Settings after merging the command line over the config file.
struct Settings {
    options: ExtractionOptions,
    metrics: Vec<MetricKind>,
    output: PathBuf,
    render: bool,
    raw: bool,
}

fn merge(cli: &Cli, file: FileConfig) -> anyhow::Result<Settings> {
    let gop = match (&cli.gop, file.gop_size) {
        (Some(gop), _) => gop.clone(),
        (None, Some(GopValue::Number(n))) => n.to_string(),
        (None, Some(GopValue::Text(s))) => s,
        (None, None) => bail!("no GOP size given, use --gop or gop_size in the config"),
    };
    let gop_size = parse_gop_size(&gop)?;

    let extent = match (cli.width.or(file.width), cli.height.or(file.height)) {
        (Some(width), Some(height)) => Some((width, height)),
        (None, None) => None,
        _ => bail!("width and height must be given together"),
    };

    let names = if cli.metrics.is_empty() {
        file.metrics.unwrap_or_default()
    } else {
        cli.metrics.clone()
    };
    let metrics = names
        .iter()
        .map(|name| name.parse::<MetricKind>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Settings {
        options: ExtractionOptions {
            gop_size,
            direction: if cli.forward || file.forward.unwrap_or(false) {
                Direction::Forward
            } else {
                Direction::Backward
            },
            sampling: cli.sampling.or(file.sampling).unwrap_or_default(),
            extent,
        },
        metrics,
        output: cli
            .output
            .clone()
            .or(file.output)
            .unwrap_or_else(|| PathBuf::from("output")),
        render: !cli.no_render && file.render.unwrap_or(true),
        raw: !cli.no_raw && file.raw.unwrap_or(true),
    })
}

fn init_logger(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                record.level(),
                record.target(),
                message
            ));
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .context("Could not install logger")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose)?;

    let file_config = match &cli.config {
        Some(path) => FileConfig::read(path)?,
        None => FileConfig::default(),
    };
    let settings = merge(&cli, file_config)?;

    let frames = read_inspector_dump(&cli.input)?;
    info!("read {} records from {}", frames.len(), cli.input.display());

    fs::create_dir_all(&settings.output)
        .with_context(|| format!("Could not create {}", settings.output.display()))?;
    let mut images = if settings.render {
        Some(ImageSink::new(&settings.output)?)
    } else {
        None
    };
    let mut raw = if settings.raw {
        Some(RawSink::new(&settings.output)?)
    } else {
        None
    };
    let mut metrics_log = if settings.metrics.is_empty() {
        None
    } else {
        Some(MetricsLog::create(
            settings.output.join("metrics.csv"),
            settings.metrics.clone(),
        )?)
    };
    let mut sinks: Vec<&mut dyn FrameSink> = Vec::new();
    if let Some(sink) = images.as_mut() {
        sinks.push(sink);
    }
    if let Some(sink) = raw.as_mut() {
        sinks.push(sink);
    }
    if let Some(sink) = metrics_log.as_mut() {
        sinks.push(sink);
    }

    let term = Term::stderr();
    let total = frames.len().saturating_sub(2);
    let progress = |emitted: usize, keyframes: usize| {
        let _ = term.clear_line();
        let _ = term.write_str(&format!(
            "frame {}/{}, {} keyframes",
            emitted, total, keyframes
        ));
    };
    let results = extract_motion_fields(frames, settings.options, &mut sinks, Some(&progress))?;
    let _ = term.clear_line();

    eprintln!(
        "{} {} frames, {} keyframes, {:.2} fps, written to {}",
        style("done").green().bold(),
        results.frame_count,
        results.keyframes.len(),
        results.speed,
        settings.output.display()
    );

    if let Some(path) = &cli.results {
        let output = serde_json::to_string_pretty(&results)
            .context("Could not convert results into json")?;
        fs::write(path, output).with_context(|| format!("Could not write {}", path.display()))?;
    }

    Ok(())
}
