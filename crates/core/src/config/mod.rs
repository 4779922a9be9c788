use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub render: RenderConfig,
    pub export: ExportConfig,
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections fall back to their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        tracing::debug!(?path, "loaded configuration");
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Canvas and typography settings shared by preview and export frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// TrueType/OpenType font used for lyric text. Without one, frames are
    /// rendered without text.
    pub font_path: Option<PathBuf>,
    pub current_font_px: f32,
    pub context_font_px: f32,
    /// Opacity of the black layer drawn over the background, in `[0, 1]`.
    pub overlay_opacity: f32,
    pub album_art_px: u32,
    pub highlight_color: [u8; 4],
    pub base_color: [u8; 4],
    pub context_color: [u8; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            font_path: None,
            current_font_px: 56.0,
            context_font_px: 34.0,
            overlay_opacity: 0.5,
            album_art_px: 160,
            highlight_color: [255, 214, 64, 255],
            base_color: [255, 255, 255, 255],
            context_color: [200, 200, 200, 160],
        }
    }
}

/// Settings for the offline export pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub frame_rate: u32,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub output_dir: PathBuf,
    pub video_codec: String,
    pub pixel_format: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            output_dir: PathBuf::from("."),
            video_codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
        }
    }
}

/// Settings for the real-time playback driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub tick_interval_ms: u64,
    /// Pressing play within this distance of the end restarts from zero.
    pub replay_epsilon_seconds: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            replay_epsilon_seconds: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "export": { "frame_rate": 24 } }"#).unwrap();

        assert_eq!(config.export.frame_rate, 24);
        assert_eq!(config.export.ffmpeg_bin, "ffmpeg");
        assert_eq!(config.render.width, 1280);
        assert!((config.playback.replay_epsilon_seconds - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_path_yields_defaults() {
        let config = AppConfig::load_or_default(None).unwrap();
        assert_eq!(config.render.height, 720);
    }
}
