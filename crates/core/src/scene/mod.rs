use serde::{Deserialize, Serialize};

use crate::backgrounds::{BackgroundAsset, SongInfo};
use crate::timeline::TimelineSampler;
use crate::{LyricLine, Result};

/// Visual inputs of one lyric video: song metadata, album art and the
/// background set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub song: SongInfo,
    /// Static image used for the whole track when no generated backgrounds
    /// exist.
    pub fallback_background: String,
    #[serde(default)]
    pub backgrounds: Vec<BackgroundAsset>,
    #[serde(default)]
    pub album_art: Option<String>,
}

impl SceneDescriptor {
    pub fn new(song: SongInfo, fallback_background: impl Into<String>) -> Self {
        Self {
            song,
            fallback_background: fallback_background.into(),
            backgrounds: Vec::new(),
            album_art: None,
        }
    }

    pub fn with_backgrounds(mut self, backgrounds: Vec<BackgroundAsset>) -> Self {
        self.backgrounds = backgrounds;
        self
    }

    pub fn with_album_art(mut self, album_art: Option<String>) -> Self {
        self.album_art = album_art;
        self
    }

    /// Builds the sampler for `lines` with this scene's backgrounds.
    pub fn sampler(&self, lines: &[LyricLine]) -> Result<TimelineSampler> {
        TimelineSampler::new(
            lines,
            self.backgrounds.clone(),
            BackgroundAsset::fallback(self.fallback_background.clone()),
        )
    }

    /// Video file name derived from the song title and artist.
    pub fn output_file_name(&self) -> String {
        let stem = match (self.song.title.trim(), self.song.artist.trim()) {
            ("", "") => "lyric-video".to_string(),
            (title, "") => title.to_string(),
            ("", artist) => artist.to_string(),
            (title, artist) => format!("{title} - {artist}"),
        };
        format!("{}.mp4", sanitize_file_stem(&stem))
    }
}

fn sanitize_file_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_uses_title_and_artist() {
        let scene = SceneDescriptor::new(SongInfo::new("Night/Day", "The Band"), "bg.jpg");
        assert_eq!(scene.output_file_name(), "Night_Day - The Band.mp4");
    }

    #[test]
    fn file_name_without_metadata() {
        let scene = SceneDescriptor::new(SongInfo::default(), "bg.jpg");
        assert_eq!(scene.output_file_name(), "lyric-video.mp4");
    }

    #[test]
    fn sampler_uses_scene_backgrounds() {
        let scene = SceneDescriptor::new(SongInfo::default(), "bg.jpg")
            .with_backgrounds(vec![BackgroundAsset::new("gen.png", 0.0, 4.0)]);
        let sampler = scene.sampler(&[LyricLine::new("A", 0.0, 4.0)]).unwrap();

        assert_eq!(sampler.sample(1.0).background.url, "gen.png");
        assert_eq!(sampler.fallback().url, "bg.jpg");
    }
}
