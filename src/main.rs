mod config;
mod cue;
mod error;
mod ffmpeg;
mod layout;
mod parser;
mod recovery;
mod render;
mod scheduler;
mod timeline;

use crate::config::{Quality, RenderConfig};
use crate::cue::Cue;
use crate::layout::{FixedAdvance, LayoutEngine, TextMeasure};
use crate::parser::Parser;
use crate::recovery::RecoveryAssembler;
use crate::render::font::FontFace;
use crate::render::frames::FrameBackend;
use crate::scheduler::{RenderOp, Schedule, Scheduler};

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser as ClapParser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SILENT_VIDEO_FILENAME: &str = "video_silent.mp4";
const FINAL_VIDEO_FILENAME: &str = "final_video_with_audio.mp4";

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => (),
        Err(err) => {
            eprintln!("An error occurred: {}", err);
            for cause in err.chain().skip(1) {
                eprintln!("    {}", cause);
            }
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[derive(ClapParser)]
#[command(about = "Render speaker-tagged SRT subtitles into a scrolling caption video")]
struct Cli {
    #[arg(short, long, global = true, help = "Log debug output.")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the caption video and, given an audio track, mux it in.
    Render(RenderArgs),
    /// Print the render schedule without rendering anything.
    Plan(PlanArgs),
}

#[derive(Args)]
struct SourceArgs {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "The subtitles to read from. If not supplied, they will be read from standard input.",
        default_value = "-"
    )]
    subtitles: String,
    #[arg(short, long, value_name = "FILE", help = "TOML file with render settings.")]
    config: Option<PathBuf>,
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "TTF/OTF font used for measuring and drawing text."
    )]
    font: Option<PathBuf>,
    #[arg(short, long, value_enum, help = "Resolution and frame rate preset.")]
    quality: Option<Quality>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Audio track. Its length sets the video length, and it is muxed into the final video."
    )]
    audio: Option<PathBuf>,
    #[arg(
        long,
        value_name = "SECONDS",
        help = "Video length to pad to. Overrides probing the audio track."
    )]
    audio_duration: Option<f64>,
    #[arg(
        short,
        long,
        value_name = "DIR",
        help = "Directory for the rendered videos and temporary segments.",
        default_value = "output"
    )]
    output_dir: PathBuf,
}

#[derive(Args)]
struct PlanArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, value_name = "SECONDS", help = "Video length to pad to.")]
    audio_duration: f64,
    #[arg(long, help = "Print the schedule as JSON.")]
    json: bool,
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Render(args) => render_video(args),
        Command::Plan(args) => print_plan(args),
    }
}

fn load_config(source: &SourceArgs) -> Result<RenderConfig> {
    let mut config = match &source.config {
        Some(path) => RenderConfig::load(path)
            .context(format!("Failed to load config file: '{}'", path.display()))?,
        None => RenderConfig::default(),
    };
    if let Some(quality) = source.quality {
        config.quality = quality;
    }
    if let Some(font) = &source.font {
        config.font_path = Some(font.clone());
    }
    config.validate()?;
    Ok(config)
}

fn read_cues(source: &SourceArgs) -> Result<Vec<Cue>> {
    let data = if source.subtitles == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(&source.subtitles)
            .context(format!("Failed to open subtitle file: '{}'", source.subtitles))?
    };

    if data.trim().is_empty() {
        return Err(anyhow!("You appear to have supplied an empty file."));
    }

    let cues = Parser::new().parse(&data);
    if cues.is_empty() {
        warn!("No usable cues in '{}'; the video will be blank", source.subtitles);
    }
    Ok(cues)
}

fn build_schedule<M: TextMeasure>(
    config: &RenderConfig,
    measure: M,
    cues: &[Cue],
    audio_duration: f64,
) -> Result<Schedule> {
    let layout = LayoutEngine::new().context("Failed to build tokenizer")?;
    let scheduler = Scheduler::new(
        layout,
        measure,
        config.block_style(),
        config.pacing(),
        config.max_visible_height(),
        config.top_margin,
        config.block_spacing,
    );
    Ok(scheduler.schedule(cues, audio_duration))
}

fn load_font(config: &RenderConfig) -> Result<FontFace> {
    let path = config
        .font_path
        .as_ref()
        .ok_or_else(|| anyhow!("No font given; pass --font or set font_path in the config file."))?;
    Ok(FontFace::load(path)?)
}

/// Starts from an empty segment directory, so recovery can never pick up
/// segments of an earlier pass.
fn fresh_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)
            .context(format!("Failed to clear '{}'", dir.display()))?;
    }
    std::fs::create_dir_all(dir).context(format!("Failed to create '{}'", dir.display()))?;
    Ok(())
}

fn render_video(args: RenderArgs) -> Result<()> {
    let config = load_config(&args.source)?;
    let cues = read_cues(&args.source)?;

    let ffmpeg = ffmpeg::require_tool("ffmpeg")?;
    let audio_duration = match (args.audio_duration, &args.audio) {
        (Some(seconds), _) if seconds >= 0.0 => seconds,
        (Some(seconds), _) => return Err(anyhow!("Invalid audio duration: {}", seconds)),
        (None, Some(audio)) => {
            let ffprobe = ffmpeg::require_tool("ffprobe")?;
            ffmpeg::probe_duration(&ffprobe, audio)
                .context(format!("Failed to probe audio file: '{}'", audio.display()))?
        }
        (None, None) => return Err(anyhow!("Either --audio or --audio-duration is required.")),
    };
    info!("Audio duration: {:.2} seconds", audio_duration);

    let font = load_font(&config)?;
    let schedule = build_schedule(&config, &font, &cues, audio_duration)?;

    let temp_dir = args.output_dir.join("temp");
    let segment_dir = temp_dir.join("segments");
    fresh_dir(&segment_dir)?;
    let silent = args.output_dir.join(SILENT_VIDEO_FILENAME);

    let concat = ffmpeg::FfmpegConcat::new(ffmpeg.clone());
    let mut backend =
        FrameBackend::new(&config, &font, ffmpeg.clone(), &concat, &segment_dir, &silent)?;
    let recovery = RecoveryAssembler::new(&concat);
    let outcome = render::render_pass(&schedule, &mut backend, &recovery, &segment_dir, &silent)
        .context("Failed to render video")?;
    if outcome.recovered {
        warn!(
            "Only part of the video could be rendered; kept what was recovered in {}",
            outcome.path.display()
        );
    }

    if let Some(audio) = &args.audio {
        let final_video = args.output_dir.join(FINAL_VIDEO_FILENAME);
        if !ffmpeg::mux(&ffmpeg, &outcome.path, audio, &final_video)? {
            warn!("Keeping the silent video at {}", outcome.path.display());
        }
    }

    if !config.keep_segments && !outcome.recovered {
        std::fs::remove_dir_all(&temp_dir)
            .context(format!("Failed to remove '{}'", temp_dir.display()))?;
    }
    Ok(())
}

fn print_plan(args: PlanArgs) -> Result<()> {
    if args.audio_duration < 0.0 {
        return Err(anyhow!("Invalid audio duration: {}", args.audio_duration));
    }
    let config = load_config(&args.source)?;
    let cues = read_cues(&args.source)?;

    let schedule = match &config.font_path {
        Some(_) => {
            let font = load_font(&config)?;
            build_schedule(&config, &font, &cues, args.audio_duration)?
        }
        None => {
            info!("No font given; measuring text with a fixed advance");
            build_schedule(&config, FixedAdvance::default(), &cues, args.audio_duration)?
        }
    };

    if args.json {
        let json = serde_json::to_string_pretty(&schedule).context("Failed to encode schedule")?;
        println!("{}", json);
    } else {
        print_schedule(&schedule);
    }
    Ok(())
}

fn print_schedule(schedule: &Schedule) {
    let mut at = 0.0;
    for op in &schedule.ops {
        let what = match op {
            RenderOp::Shift { blocks, offset, .. } => {
                format!("shift   {} blocks up {:.1}px", blocks.len(), offset)
            }
            RenderOp::Reveal { block, .. } => {
                let first = block.lines.first().map(String::as_str).unwrap_or("");
                format!(
                    "reveal  #{} {} {} line(s) at y={:.1}: {}",
                    block.id,
                    block.label,
                    block.lines.len(),
                    block.top,
                    first
                )
            }
            RenderOp::Hold { .. } => "hold".to_string(),
            RenderOp::Evict { block } => format!("evict   #{}", block),
        };
        println!("{:>9.3}s {:>7.3}s  {}", at, op.duration(), what);
        at += op.duration();
    }
    println!(
        "narrated {:.3}s, pad {:.3}s, total {:.3}s",
        schedule.narrated_total,
        schedule.final_pad,
        schedule.total_duration()
    );
}
