use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use lyric_sync_core::{
    audio, backgrounds, lyrics, render, AppConfig, AudioClip, BackgroundAsset, CanvasRenderer,
    CommandGenerator, EncoderService, ExportDriver, ExportRequest, FfmpegEncoder, FsImageLoader,
    LyricLine, LyricSyncError, PlaybackClock, SceneDescriptor, SongInfo, WallClockTransport,
};
use tracing_subscriber::EnvFilter;

fn main() -> lyric_sync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect {
            lyrics,
            at,
            background,
        } => run_inspect(&lyrics, at, &background),
        Commands::Preview {
            lyrics,
            duration,
            start,
        } => run_preview(&config, &lyrics, duration, start),
        Commands::Backgrounds {
            lyrics,
            song,
            render_cmd,
            describe_cmd,
            out,
        } => run_backgrounds(&lyrics, &song, &render_cmd, describe_cmd.as_deref(), &out),
        Commands::Export(args) => run_export(config, args),
    }
}

fn load_lines(path: &Path) -> lyric_sync_core::Result<Vec<LyricLine>> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| LyricSyncError::asset(path.display().to_string(), err))?;
    let lines = lyrics::with_intro_gap(lyrics::parse_srt(&content)?);
    tracing::info!(?path, lines = lines.len(), "loaded lyrics");
    Ok(lines)
}

fn run_inspect(lyrics_path: &Path, at: f64, background: &str) -> lyric_sync_core::Result<()> {
    let lines = load_lines(lyrics_path)?;
    let scene = SceneDescriptor::new(SongInfo::default(), background);
    let sampler = scene.sampler(&lines)?;

    let state = sampler.sample(at);
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn run_preview(
    config: &AppConfig,
    lyrics_path: &Path,
    duration: Option<f64>,
    start: f64,
) -> lyric_sync_core::Result<()> {
    let lines = load_lines(lyrics_path)?;
    let duration = duration
        .or_else(|| lines.last().map(|line| line.end_time + 1.0))
        .unwrap_or_default();
    let scene = SceneDescriptor::new(SongInfo::default(), "preview");
    let sampler = scene.sampler(&lines)?;

    let mut clock = PlaybackClock::with_replay_epsilon(
        WallClockTransport::new(duration),
        config.playback.replay_epsilon_seconds,
    );
    clock.on_metadata_loaded(duration);
    clock.seek(start);
    clock.play()?;
    tracing::info!(duration, start, "starting preview");

    let interval = audio::tick_interval(config.playback.tick_interval_ms);
    let mut last_line = None;
    while clock.wants_tick() {
        if let Some(state) = clock.tick(&sampler) {
            let line = render::describe_state(&state, 30);
            if last_line.as_ref() != Some(&line) {
                println!("{} {line}", lyrics::format_timecode(state.time));
                last_line = Some(line);
            }
        }
        std::thread::sleep(interval);
    }

    tracing::info!(state = ?clock.state(), position = clock.position(), "preview finished");
    Ok(())
}

fn run_backgrounds(
    lyrics_path: &Path,
    song: &SongArgs,
    render_cmd: &str,
    describe_cmd: Option<&str>,
    out: &Path,
) -> lyric_sync_core::Result<()> {
    let lines = load_lines(lyrics_path)?;
    let render = backgrounds::CommandSpec::parse(render_cmd)
        .ok_or_else(|| LyricSyncError::InvalidInput("--render-cmd is empty".to_string()))?;
    let describe = describe_cmd.and_then(backgrounds::CommandSpec::parse);
    let generator = CommandGenerator::new(render, describe);
    let song = song.info();

    let runtime = tokio::runtime::Runtime::new()?;
    let assets = runtime.block_on(backgrounds::generate_backgrounds(
        &generator,
        &lines,
        &song,
        |percent, status| tracing::info!(percent, status, "generating backgrounds"),
    ))?;

    backgrounds::save_manifest(out, &assets)?;
    println!("wrote {} backgrounds to {}", assets.len(), out.display());
    Ok(())
}

fn run_export(mut config: AppConfig, args: ExportArgs) -> lyric_sync_core::Result<()> {
    if let Some(frame_rate) = args.fps {
        config.export.frame_rate = frame_rate;
    }
    if let Some(out) = args.out {
        config.export.output_dir = out;
    }
    if let Some(font) = args.font {
        config.render.font_path = Some(font);
    }

    let lines = load_lines(&args.lyrics)?;
    let generated: Vec<BackgroundAsset> = match &args.backgrounds {
        Some(path) => backgrounds::load_manifest(path)?,
        None => Vec::new(),
    };
    let scene = SceneDescriptor::new(args.song.info(), args.background)
        .with_backgrounds(generated)
        .with_album_art(args.album_art);

    let audio_clip = AudioClip::new(args.audio);
    let duration = match args.duration {
        Some(duration) => duration,
        None => audio::probe_duration(&config.export.ffprobe_bin, &audio_clip.path)?,
    };

    let mut renderer =
        CanvasRenderer::new(config.render.clone())?.with_album_art(scene.album_art.clone());
    let encoder = EncoderService::new(FfmpegEncoder::in_temp_dir(config.export.ffmpeg_bin.clone()));
    let loader = FsImageLoader;
    let driver = ExportDriver::new(&encoder, &loader, config.export.clone());

    let request = ExportRequest {
        lines: &lines,
        scene: &scene,
        audio: &audio_clip,
        duration_seconds: duration,
    };
    let output = driver.export(request, &mut renderer, |progress| {
        tracing::info!(
            stage = ?progress.stage,
            percent = progress.percent,
            "{}",
            progress.message
        );
    })?;

    println!("{}", output.path.display());
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Karaoke lyric video renderer", long_about = None)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct SongArgs {
    #[arg(long, default_value = "")]
    title: String,
    #[arg(long, default_value = "")]
    artist: String,
}

impl SongArgs {
    fn info(&self) -> SongInfo {
        SongInfo::new(self.title.clone(), self.artist.clone())
    }
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// SRT file with the timed lyrics.
    lyrics: PathBuf,
    /// Audio track muxed into the video.
    #[arg(long)]
    audio: PathBuf,
    #[command(flatten)]
    song: SongArgs,
    /// Static background used when no generated backgrounds cover a moment.
    #[arg(long)]
    background: String,
    /// JSON manifest written by the `backgrounds` command.
    #[arg(long)]
    backgrounds: Option<PathBuf>,
    #[arg(long)]
    album_art: Option<String>,
    /// Track length in seconds. Probed with ffprobe when omitted.
    #[arg(long)]
    duration: Option<f64>,
    #[arg(long)]
    fps: Option<u32>,
    #[arg(long)]
    font: Option<PathBuf>,
    /// Directory receiving the finished video.
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the timeline state at a timestamp as JSON.
    Inspect {
        lyrics: PathBuf,
        /// Timestamp in seconds.
        #[arg(long)]
        at: f64,
        #[arg(long, default_value = "background")]
        background: String,
    },
    /// Play the lyrics in the terminal against a silent wall clock.
    Preview {
        lyrics: PathBuf,
        #[arg(long)]
        duration: Option<f64>,
        #[arg(long, default_value_t = 0.0)]
        start: f64,
    },
    /// Generate per-stanza backgrounds through external commands.
    Backgrounds {
        lyrics: PathBuf,
        #[command(flatten)]
        song: SongArgs,
        /// Command that reads a prompt on stdin and prints an image path.
        #[arg(long)]
        render_cmd: String,
        /// Command that reads stanza text on stdin and prints a description.
        #[arg(long)]
        describe_cmd: Option<String>,
        /// Manifest output path.
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Render the lyric video and encode it with the audio.
    Export(ExportArgs),
}
