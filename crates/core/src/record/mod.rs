//! Offline export: renders every frame of a synthetic clock and hands the
//! ordered sequence plus the audio to the encoder.

mod encoder;

use std::path::PathBuf;
use std::sync::MutexGuard;

use serde::{Deserialize, Serialize};

pub use encoder::{mux_args, Encoder, EncoderService, EncoderState, FfmpegEncoder};

use crate::assets::{AssetStore, ImageLoader};
use crate::audio::AudioClip;
use crate::config::ExportConfig;
use crate::render::{encode_png, FrameRenderer};
use crate::scene::SceneDescriptor;
use crate::{LyricLine, LyricSyncError, Result};

const INIT_END: f32 = 5.0;
const AUDIO_END: f32 = 8.0;
const PRELOAD_END: f32 = 12.0;
const FRAMES_END: f32 = 90.0;
const MUX_END: f32 = 98.0;

/// Longest frame sequence one export renders: a day of video at 60 fps.
const MAX_FRAMES: u64 = 24 * 60 * 60 * 60;

const FRAME_PATTERN: &str = "frame_%06d.png";
const OUTPUT_NAME: &str = "output.mp4";

/// Name of frame `index` inside the encoder storage; matches [`FRAME_PATTERN`].
pub fn frame_name(index: u64) -> String {
    format!("frame_{index:06}.png")
}

/// Number of frames for a track: `floor(duration * frame_rate)`.
pub fn total_frames(duration_seconds: f64, frame_rate: u32) -> u64 {
    (duration_seconds * f64::from(frame_rate)).floor() as u64
}

/// Synthetic clock time of frame `index`.
pub fn frame_time(index: u64, frame_rate: u32) -> f64 {
    index as f64 / f64::from(frame_rate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStage {
    Initializing,
    LoadingAudio,
    PreloadingImages,
    RenderingFrames,
    Encoding,
    Saving,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportProgress {
    pub stage: ExportStage,
    /// Overall completion in `[0, 100]`.
    pub percent: f32,
    pub message: String,
}

/// Everything one export call consumes.
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub lines: &'a [LyricLine],
    pub scene: &'a SceneDescriptor,
    pub audio: &'a AudioClip,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutput {
    pub path: PathBuf,
    pub frames: u64,
    pub bytes: usize,
}

/// Transient bookkeeping for one export call. Every name registered here is
/// unlinked from the encoder when the job is released.
#[derive(Debug)]
pub struct ExportJob {
    pub frame_rate: u32,
    pub total_frames: u64,
    pub current_frame_index: u64,
    rendered_frames: Vec<String>,
    scratch: Vec<String>,
}

impl ExportJob {
    fn new(frame_rate: u32, total_frames: u64) -> Self {
        Self {
            frame_rate,
            total_frames,
            current_frame_index: 0,
            rendered_frames: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn rendered_frames(&self) -> &[String] {
        &self.rendered_frames
    }

    fn release(&mut self, encoder: &mut dyn Encoder) {
        let frames = std::mem::take(&mut self.rendered_frames);
        let scratch = std::mem::take(&mut self.scratch);
        let mut failures = 0usize;
        for name in frames.iter().chain(&scratch) {
            if let Err(err) = encoder.unlink_asset(name) {
                failures += 1;
                tracing::warn!(name, %err, "failed to unlink encoder asset");
            }
        }
        tracing::debug!(
            frames = frames.len(),
            scratch = scratch.len(),
            failures,
            "released export job"
        );
    }
}

/// Holds the encoder for one job and releases the job's assets on drop,
/// including when a renderer panics mid-export.
struct JobLease<'a> {
    encoder: MutexGuard<'a, Box<dyn Encoder>>,
    job: ExportJob,
}

impl Drop for JobLease<'_> {
    fn drop(&mut self) {
        self.job.release(&mut **self.encoder);
    }
}

fn checked_frame_count(duration_seconds: f64, frame_rate: u32) -> Result<u64> {
    let frames = total_frames(duration_seconds, frame_rate);
    if frames == 0 {
        return Err(LyricSyncError::InvalidInput(
            "the track is too short to produce a single frame".to_string(),
        ));
    }
    if frames > MAX_FRAMES || usize::try_from(frames).is_err() {
        return Err(LyricSyncError::InvalidInput(format!(
            "{duration_seconds} seconds at {frame_rate} fps exceeds {MAX_FRAMES} frames"
        )));
    }
    Ok(frames)
}

/// Drives export jobs against a shared [`EncoderService`].
pub struct ExportDriver<'a> {
    encoder: &'a EncoderService,
    loader: &'a dyn ImageLoader,
    config: ExportConfig,
}

impl<'a> ExportDriver<'a> {
    pub fn new(encoder: &'a EncoderService, loader: &'a dyn ImageLoader, config: ExportConfig) -> Self {
        Self {
            encoder,
            loader,
            config,
        }
    }

    /// Renders and encodes one video.
    ///
    /// Durations that yield no frames, or an unreasonable number of them, are
    /// rejected before the encoder is touched. Fails with
    /// [`LyricSyncError::EncoderBusy`] while another export holds the
    /// encoder. Any failure aborts the job without producing a file, and
    /// every asset written to the encoder storage is removed either way.
    pub fn export<R, F>(
        &self,
        request: ExportRequest<'_>,
        renderer: &mut R,
        mut on_progress: F,
    ) -> Result<ExportOutput>
    where
        R: FrameRenderer + ?Sized,
        F: FnMut(ExportProgress),
    {
        let frame_rate = self.config.frame_rate;
        if frame_rate == 0 {
            return Err(LyricSyncError::InvalidInput(
                "frame rate must be positive".to_string(),
            ));
        }
        if !request.duration_seconds.is_finite() || request.duration_seconds <= 0.0 {
            return Err(LyricSyncError::InvalidInput(format!(
                "duration {} is not a positive number of seconds",
                request.duration_seconds
            )));
        }

        let frames = checked_frame_count(request.duration_seconds, frame_rate)?;

        let mut lease = JobLease {
            encoder: self.encoder.acquire()?,
            job: ExportJob::new(frame_rate, frames),
        };
        tracing::info!(
            frames,
            frame_rate,
            duration = request.duration_seconds,
            "starting export"
        );

        let JobLease { encoder, job } = &mut lease;
        let result = self.run_job(&mut ***encoder, job, &request, renderer, &mut on_progress);
        drop(lease);

        match &result {
            Ok(output) => {
                tracing::info!(path = ?output.path, bytes = output.bytes, "export finished");
                on_progress(ExportProgress {
                    stage: ExportStage::Done,
                    percent: 100.0,
                    message: format!("saved {}", output.path.display()),
                });
            }
            Err(err) => tracing::error!(%err, "export failed"),
        }
        result
    }

    fn run_job<R, F>(
        &self,
        encoder: &mut dyn Encoder,
        job: &mut ExportJob,
        request: &ExportRequest<'_>,
        renderer: &mut R,
        on_progress: &mut F,
    ) -> Result<ExportOutput>
    where
        R: FrameRenderer + ?Sized,
        F: FnMut(ExportProgress),
    {
        let mut report = |stage: ExportStage, percent: f32, message: String| {
            on_progress(ExportProgress {
                stage,
                percent,
                message,
            })
        };

        report(ExportStage::Initializing, 0.0, "initializing encoder".to_string());
        if !encoder.is_initialized() {
            encoder.initialize()?;
        }
        report(ExportStage::Initializing, INIT_END, "encoder ready".to_string());

        let audio_name = request.audio.asset_name();
        job.scratch.push(audio_name.clone());
        encoder.write_asset(&audio_name, &request.audio.read()?)?;
        report(ExportStage::LoadingAudio, AUDIO_END, "audio loaded".to_string());

        let sampler = request.scene.sampler(request.lines)?;
        let mut urls = sampler.background_urls();
        if let Some(art) = request.scene.album_art.as_deref() {
            urls.push(art);
        }
        let assets = AssetStore::preload(self.loader, urls)?;
        report(
            ExportStage::PreloadingImages,
            PRELOAD_END,
            format!("{} images ready", assets.len()),
        );

        let mut last_percent = None;
        for index in 0..job.total_frames {
            let state = sampler.sample(frame_time(index, job.frame_rate));
            let frame = renderer.render(&state, &assets)?;

            let name = frame_name(index);
            job.rendered_frames.push(name.clone());
            encoder.write_asset(&name, &encode_png(&frame)?)?;
            job.current_frame_index = index + 1;

            let fraction = index as f32 / job.total_frames as f32;
            let percent = PRELOAD_END + (FRAMES_END - PRELOAD_END) * fraction;
            if last_percent != Some(percent.floor()) {
                last_percent = Some(percent.floor());
                report(
                    ExportStage::RenderingFrames,
                    percent,
                    format!("frame {} of {}", index + 1, job.total_frames),
                );
            }
        }

        report(ExportStage::Encoding, FRAMES_END, "encoding video".to_string());
        job.scratch.push(OUTPUT_NAME.to_string());
        let args = mux_args(
            job.frame_rate,
            FRAME_PATTERN,
            &audio_name,
            OUTPUT_NAME,
            &self.config.video_codec,
            &self.config.pixel_format,
        );
        encoder.run(&args)?;
        report(ExportStage::Encoding, MUX_END, "video encoded".to_string());

        let video = encoder.read_asset(OUTPUT_NAME)?;
        std::fs::create_dir_all(&self.config.output_dir)?;
        let path = self.config.output_dir.join(request.scene.output_file_name());
        report(ExportStage::Saving, MUX_END, format!("writing {}", path.display()));
        if let Err(err) = std::fs::write(&path, &video) {
            let _ = std::fs::remove_file(&path);
            return Err(err.into());
        }

        Ok(ExportOutput {
            path,
            frames: job.total_frames,
            bytes: video.len(),
        })
    }
}
