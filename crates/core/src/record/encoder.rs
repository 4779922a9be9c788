use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard, TryLockError};

use serde::Serialize;

use crate::{LyricSyncError, Result};

/// Video encoder backend with a private working storage.
///
/// Assets are addressed by plain file names. The export driver is the only
/// caller and is responsible for unlinking everything it writes.
pub trait Encoder: Send {
    /// Prepares the backend. Calling it again once initialised is a no-op.
    fn initialize(&mut self) -> Result<()>;
    fn is_initialized(&self) -> bool;
    fn write_asset(&mut self, name: &str, bytes: &[u8]) -> Result<()>;
    /// Runs the backend with command line style arguments.
    fn run(&mut self, args: &[String]) -> Result<()>;
    fn read_asset(&mut self, name: &str) -> Result<Vec<u8>>;
    /// Removes an asset. Unlinking an unknown name succeeds.
    fn unlink_asset(&mut self, name: &str) -> Result<()>;
    /// Names currently present in the working storage.
    fn asset_names(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EncoderState {
    Uninitialized,
    Idle,
    Busy,
}

/// Caller-owned handle around one encoder backend.
///
/// Only one export may hold the backend at a time; a second request while it
/// is held is rejected with [`LyricSyncError::EncoderBusy`].
pub struct EncoderService {
    inner: Mutex<Box<dyn Encoder>>,
}

impl EncoderService {
    pub fn new<E: Encoder + 'static>(encoder: E) -> Self {
        Self {
            inner: Mutex::new(Box::new(encoder)),
        }
    }

    pub fn state(&self) -> EncoderState {
        match self.inner.try_lock() {
            Ok(encoder) if encoder.is_initialized() => EncoderState::Idle,
            Ok(_) => EncoderState::Uninitialized,
            Err(TryLockError::WouldBlock) => EncoderState::Busy,
            Err(TryLockError::Poisoned(poisoned)) if poisoned.get_ref().is_initialized() => {
                EncoderState::Idle
            }
            Err(TryLockError::Poisoned(_)) => EncoderState::Uninitialized,
        }
    }

    /// Takes exclusive use of the backend for one job.
    ///
    /// A job that panicked leaves the lock poisoned. The backend is recovered
    /// and anything left in its working storage is unlinked first.
    pub fn acquire(&self) -> Result<MutexGuard<'_, Box<dyn Encoder>>> {
        match self.inner.try_lock() {
            Ok(encoder) => Ok(encoder),
            Err(TryLockError::WouldBlock) => Err(LyricSyncError::EncoderBusy),
            Err(TryLockError::Poisoned(poisoned)) => {
                let mut encoder = poisoned.into_inner();
                let leftovers = encoder.asset_names();
                tracing::warn!(
                    leftovers = leftovers.len(),
                    "recovering encoder after an aborted job"
                );
                for name in &leftovers {
                    encoder.unlink_asset(name)?;
                }
                self.inner.clear_poison();
                Ok(encoder)
            }
        }
    }

    /// Lists the working storage contents, or `None` while a job runs.
    pub fn asset_names(&self) -> Option<Vec<String>> {
        self.inner.try_lock().ok().map(|encoder| encoder.asset_names())
    }
}

impl std::fmt::Debug for EncoderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderService")
            .field("state", &self.state())
            .finish()
    }
}

/// Arguments muxing a numbered PNG sequence with an audio track. The output
/// stops at the shorter of the two streams.
pub fn mux_args(
    frame_rate: u32,
    frame_pattern: &str,
    audio_name: &str,
    output_name: &str,
    video_codec: &str,
    pixel_format: &str,
) -> Vec<String> {
    let rate = frame_rate.to_string();
    [
        "-y",
        "-framerate",
        rate.as_str(),
        "-i",
        frame_pattern,
        "-i",
        audio_name,
        "-c:v",
        video_codec,
        "-pix_fmt",
        pixel_format,
        "-r",
        rate.as_str(),
        "-c:a",
        "aac",
        "-shortest",
        output_name,
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

/// [`Encoder`] backed by the `ffmpeg` binary and a scratch directory.
#[derive(Debug)]
pub struct FfmpegEncoder {
    ffmpeg_bin: String,
    work_dir: PathBuf,
    initialized: bool,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            work_dir: work_dir.into(),
            initialized: false,
        }
    }

    /// Uses a per-process directory under the system temp dir.
    pub fn in_temp_dir(ffmpeg_bin: impl Into<String>) -> Self {
        let dir = std::env::temp_dir().join(format!("lyric-sync-{}", std::process::id()));
        Self::new(ffmpeg_bin, dir)
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn asset_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(LyricSyncError::InvalidInput(format!(
                "`{name}` is not a valid encoder asset name"
            )));
        }
        Ok(self.work_dir.join(name))
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(LyricSyncError::Encoder("encoder is not initialized".to_string()))
        }
    }
}

impl Encoder for FfmpegEncoder {
    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let probe = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .output()
            .map_err(|err| {
                LyricSyncError::Encoder(format!("failed to start {}: {err}", self.ffmpeg_bin))
            })?;
        if !probe.status.success() {
            return Err(LyricSyncError::Encoder(format!(
                "{} -version exited with {}",
                self.ffmpeg_bin, probe.status
            )));
        }

        std::fs::create_dir_all(&self.work_dir)?;
        self.initialized = true;
        tracing::info!(work_dir = ?self.work_dir, "encoder initialized");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn write_asset(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.ensure_initialized()?;
        std::fs::write(self.asset_path(name)?, bytes)?;
        Ok(())
    }

    fn run(&mut self, args: &[String]) -> Result<()> {
        self.ensure_initialized()?;
        tracing::debug!(?args, "running encoder");

        let output = Command::new(&self.ffmpeg_bin)
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|err| LyricSyncError::Encoder(format!("failed to run encoder: {err}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        Err(LyricSyncError::Encoder(format!(
            "encoder exited with {}: {}",
            output.status,
            tail.join(" | ")
        )))
    }

    fn read_asset(&mut self, name: &str) -> Result<Vec<u8>> {
        self.ensure_initialized()?;
        let path = self.asset_path(name)?;
        std::fs::read(&path).map_err(|err| LyricSyncError::asset(name, err))
    }

    fn unlink_asset(&mut self, name: &str) -> Result<()> {
        let path = self.asset_path(name)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn asset_names(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.work_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_args_pair_frames_with_audio() {
        let args = mux_args(30, "frame_%06d.png", "audio.mp3", "out.mp4", "libx264", "yuv420p");

        assert_eq!(&args[1..5], ["-framerate", "30", "-i", "frame_%06d.png"]);
        assert!(args.contains(&"-shortest".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn rejects_path_like_asset_names() {
        let encoder = FfmpegEncoder::new("ffmpeg", "/tmp/unused");
        assert!(encoder.asset_path("../escape").is_err());
        assert!(encoder.asset_path("frame_000001.png").is_ok());
    }

    #[test]
    fn uninitialized_encoder_refuses_writes() {
        let mut encoder = FfmpegEncoder::new("ffmpeg", "/tmp/unused");
        let err = encoder.write_asset("a.png", b"x").unwrap_err();
        assert!(matches!(err, LyricSyncError::Encoder(_)));
    }

    #[test]
    fn missing_binary_fails_initialization() {
        let mut encoder = FfmpegEncoder::new("definitely-not-an-encoder-binary", "/tmp/unused");
        assert!(matches!(
            encoder.initialize().unwrap_err(),
            LyricSyncError::Encoder(_)
        ));
        assert!(!encoder.is_initialized());
    }

    #[test]
    fn service_reports_busy_while_held() {
        let service = EncoderService::new(FfmpegEncoder::new("ffmpeg", "/tmp/unused"));
        assert_eq!(service.state(), EncoderState::Uninitialized);

        let guard = service.acquire().unwrap();
        assert_eq!(service.state(), EncoderState::Busy);
        assert!(matches!(service.acquire(), Err(LyricSyncError::EncoderBusy)));
        drop(guard);

        assert_eq!(service.state(), EncoderState::Uninitialized);
    }
}
