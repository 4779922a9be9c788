use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use crate::{LyricSyncError, Result};

/// Audio playback collaborator driven by the playback clock.
///
/// The transport's own position is the only time source during playback.
pub trait AudioTransport {
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    /// Current playback position in seconds.
    fn position(&self) -> f64;
    fn set_position(&mut self, seconds: f64);
    /// Total duration, once the media metadata is known.
    fn duration(&self) -> Option<f64>;
    /// Whether playback reached the end of the media.
    fn has_ended(&self) -> bool;
}

/// Audio file handed to the encoder during export.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub path: PathBuf,
}

impl AudioClip {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Name used inside the encoder working storage. Keeps the original
    /// extension so the encoder can detect the container.
    pub fn asset_name(&self) -> String {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("audio.{ext}"),
            None => "audio".to_string(),
        }
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .map_err(|err| LyricSyncError::asset(self.path.display().to_string(), err))
    }
}

/// Asks `ffprobe` for the duration of an audio file.
pub fn probe_duration(ffprobe_bin: &str, path: &Path) -> Result<f64> {
    let unavailable = |reason: String| LyricSyncError::asset(path.display().to_string(), reason);

    let output = Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .map_err(|err| unavailable(format!("failed to run {ffprobe_bin}: {err}")))?;

    if !output.status.success() {
        return Err(unavailable(format!(
            "duration is unknown: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| unavailable("duration is unknown".to_string()))
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
}

/// Silent transport whose position follows the wall clock. Used by the
/// terminal preview where no audio device is attached.
#[derive(Debug)]
pub struct WallClockTransport {
    duration: f64,
    anchor: Option<Instant>,
    offset: f64,
}

impl WallClockTransport {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            anchor: None,
            offset: 0.0,
        }
    }

    fn elapsed(&self) -> f64 {
        self.anchor
            .map(|anchor| anchor.elapsed().as_secs_f64())
            .unwrap_or_default()
    }
}

impl AudioTransport for WallClockTransport {
    fn play(&mut self) -> Result<()> {
        if self.anchor.is_none() {
            self.anchor = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.offset = self.position();
        self.anchor = None;
    }

    fn position(&self) -> f64 {
        (self.offset + self.elapsed()).min(self.duration)
    }

    fn set_position(&mut self, seconds: f64) {
        self.offset = seconds.clamp(0.0, self.duration);
        if self.anchor.is_some() {
            self.anchor = Some(Instant::now());
        }
    }

    fn duration(&self) -> Option<f64> {
        Some(self.duration)
    }

    fn has_ended(&self) -> bool {
        self.position() >= self.duration
    }
}

/// Interval between display ticks for a refresh rate in milliseconds.
pub fn tick_interval(millis: u64) -> Duration {
    Duration::from_millis(millis.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_name_keeps_extension() {
        assert_eq!(AudioClip::new("/music/song.mp3").asset_name(), "audio.mp3");
        assert_eq!(AudioClip::new("/music/raw").asset_name(), "audio");
    }

    #[test]
    fn parses_probe_output() {
        assert_eq!(parse_duration("183.270000\n"), Some(183.27));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("0"), None);
    }

    #[test]
    fn wall_clock_transport_seeks_while_paused() {
        let mut transport = WallClockTransport::new(10.0);
        transport.set_position(4.0);
        assert_eq!(transport.position(), 4.0);

        transport.set_position(25.0);
        assert!(transport.has_ended());
    }

    #[test]
    fn missing_audio_is_unavailable() {
        let err = AudioClip::new("/definitely/not/here.mp3").read().unwrap_err();
        assert!(matches!(err, LyricSyncError::AssetUnavailable { .. }));
    }
}
