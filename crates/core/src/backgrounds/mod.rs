//! Time-windowed background assets and the stanza-based generation driver.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{LyricLine, LyricSyncError, Result};

/// Number of real lines grouped into one stanza.
pub const LINES_PER_STANZA: usize = 2;

/// A background image reference that is active over `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundAsset {
    pub url: String,
    pub start_time: f64,
    pub end_time: f64,
}

impl BackgroundAsset {
    pub fn new(url: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        Self {
            url: url.into(),
            start_time,
            end_time,
        }
    }

    /// Static asset meant to cover an entire track.
    pub fn fallback(url: impl Into<String>) -> Self {
        Self::new(url, 0.0, f64::MAX)
    }

    pub fn contains(&self, time: f64) -> bool {
        self.start_time <= time && time < self.end_time
    }
}

/// Picks the asset shown at `time`.
///
/// An empty list always yields `fallback`. Otherwise the first asset whose
/// window contains `time` wins, and uncovered times hold the first asset of
/// the list.
pub fn background_at<'a>(
    assets: &'a [BackgroundAsset],
    time: f64,
    fallback: &'a BackgroundAsset,
) -> &'a BackgroundAsset {
    match assets.first() {
        None => fallback,
        Some(first) => assets
            .iter()
            .find(|asset| asset.contains(time))
            .unwrap_or(first),
    }
}

/// Song level information passed to the generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SongInfo {
    pub title: String,
    pub artist: String,
}

impl SongInfo {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }

    /// Generic description used when a stanza cannot be described.
    pub fn fallback_description(&self) -> String {
        format!(
            "Atmospheric cinematic artwork for the song \"{}\" by {}",
            self.title, self.artist
        )
    }
}

/// Up to [`LINES_PER_STANZA`] consecutive real lines and the window their
/// background covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Stanza {
    pub lines: Vec<LyricLine>,
    pub start_time: f64,
    pub end_time: f64,
}

impl Stanza {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Groups the real lines two per stanza; the last stanza may hold one line.
///
/// Windows tile the track: each stanza runs from its first line's start to
/// the next stanza's first start, and the final stanza ends with its last
/// line.
pub fn stanzas(lines: &[LyricLine]) -> Vec<Stanza> {
    let real: Vec<&LyricLine> = lines.iter().filter(|line| line.is_real()).collect();
    let chunks: Vec<&[&LyricLine]> = real.chunks(LINES_PER_STANZA).collect();

    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let start_time = chunk[0].start_time;
            let end_time = match chunks.get(index + 1) {
                Some(next) => next[0].start_time,
                None => chunk[chunk.len() - 1].end_time,
            };
            Stanza {
                lines: chunk.iter().map(|line| (*line).clone()).collect(),
                start_time,
                end_time,
            }
        })
        .collect()
}

/// Remote collaborator that turns lyric stanzas into background images.
#[async_trait]
pub trait BackgroundGenerator: Send + Sync {
    /// Produces a scene description for one stanza.
    async fn describe(&self, stanza: &Stanza, song: &SongInfo) -> Result<String>;

    /// Produces an image reference (path or URL) for a description.
    async fn render(&self, description: &str) -> Result<String>;
}

/// Generates one background per stanza, in stanza order.
///
/// A failed description is replaced by the song's generic description. A
/// failed or empty image result aborts the whole batch. `progress` receives a
/// percentage and a status message.
pub async fn generate_backgrounds<G, F>(
    generator: &G,
    lines: &[LyricLine],
    song: &SongInfo,
    mut progress: F,
) -> Result<Vec<BackgroundAsset>>
where
    G: BackgroundGenerator + ?Sized,
    F: FnMut(f32, &str),
{
    let stanzas = stanzas(lines);
    if stanzas.is_empty() {
        return Err(LyricSyncError::Generation(
            "there are no lyric lines to illustrate".to_string(),
        ));
    }

    let total = stanzas.len();
    let mut assets = Vec::with_capacity(total);
    tracing::info!(stanzas = total, title = %song.title, "generating backgrounds");

    for (index, stanza) in stanzas.iter().enumerate() {
        let percent = index as f32 / total as f32 * 100.0;
        progress(
            percent,
            &format!("describing stanza {} of {total}", index + 1),
        );

        let description = match generator.describe(stanza, song).await {
            Ok(description) if !description.trim().is_empty() => description,
            Ok(_) => {
                tracing::warn!(stanza = index, "empty stanza description, using song fallback");
                song.fallback_description()
            }
            Err(err) => {
                tracing::warn!(stanza = index, %err, "stanza description failed, using song fallback");
                song.fallback_description()
            }
        };

        progress(
            percent,
            &format!("rendering image {} of {total}", index + 1),
        );
        let url = generator.render(&description).await.map_err(|err| {
            LyricSyncError::Generation(format!("stanza {}: {err}", index + 1))
        })?;
        let url = url.trim();
        if url.is_empty() {
            return Err(LyricSyncError::Generation(format!(
                "stanza {} produced no image reference",
                index + 1
            )));
        }

        assets.push(BackgroundAsset::new(url, stanza.start_time, stanza.end_time));
    }

    progress(100.0, "backgrounds ready");
    Ok(assets)
}

/// External program invocation. The payload is written to stdin and the
/// trimmed stdout is the result.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Splits a whitespace separated command line into program and args.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    async fn run(&self, payload: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                LyricSyncError::Generation(format!("failed to start `{}`: {err}", self.program))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await.map_err(|err| {
                LyricSyncError::Generation(format!(
                    "failed to send input to `{}`: {err}",
                    self.program
                ))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|err| {
            LyricSyncError::Generation(format!("failed to wait for `{}`: {err}", self.program))
        })?;
        if !output.status.success() {
            return Err(LyricSyncError::Generation(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// [`BackgroundGenerator`] backed by external programs.
///
/// Without a describe command the stanza text itself, prefixed with the
/// song description, is used as the image prompt.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    describe: Option<CommandSpec>,
    render: CommandSpec,
}

impl CommandGenerator {
    pub fn new(render: CommandSpec, describe: Option<CommandSpec>) -> Self {
        Self { describe, render }
    }
}

#[async_trait]
impl BackgroundGenerator for CommandGenerator {
    async fn describe(&self, stanza: &Stanza, song: &SongInfo) -> Result<String> {
        match &self.describe {
            Some(command) => {
                let payload = format!("{}\n\n{}", song.fallback_description(), stanza.text());
                command.run(&payload).await
            }
            None => Ok(format!("{}. {}", song.fallback_description(), stanza.text())),
        }
    }

    async fn render(&self, description: &str) -> Result<String> {
        self.render.run(description).await
    }
}

/// Reads a JSON list of background assets.
pub fn load_manifest(path: &Path) -> Result<Vec<BackgroundAsset>> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| LyricSyncError::asset(path.display().to_string(), err))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_manifest(path: &Path, assets: &[BackgroundAsset]) -> Result<()> {
    let content = serde_json::to_string_pretty(assets)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn assets() -> Vec<BackgroundAsset> {
        vec![
            BackgroundAsset::new("a.png", 0.0, 10.0),
            BackgroundAsset::new("b.png", 10.0, 20.0),
            BackgroundAsset::new("c.png", 25.0, 30.0),
        ]
    }

    #[test]
    fn empty_assets_always_use_fallback() {
        let fallback = BackgroundAsset::fallback("static.jpg");
        for time in [-5.0, 0.0, 12.0, 1e9] {
            assert_eq!(background_at(&[], time, &fallback).url, "static.jpg");
        }
    }

    #[test]
    fn picks_the_covering_asset() {
        let fallback = BackgroundAsset::fallback("static.jpg");
        let assets = assets();

        assert_eq!(background_at(&assets, 0.0, &fallback).url, "a.png");
        assert_eq!(background_at(&assets, 10.0, &fallback).url, "b.png");
        assert_eq!(background_at(&assets, 29.9, &fallback).url, "c.png");
    }

    #[test]
    fn gaps_hold_the_first_asset() {
        let fallback = BackgroundAsset::fallback("static.jpg");
        let assets = assets();

        assert_eq!(background_at(&assets, 22.0, &fallback).url, "a.png");
        assert_eq!(background_at(&assets, 45.0, &fallback).url, "a.png");
    }

    fn lyric_lines() -> Vec<LyricLine> {
        vec![
            LyricLine::silent(0.0, 2.0),
            LyricLine::new("one", 2.0, 4.0),
            LyricLine::new("two", 4.0, 6.0),
            LyricLine::new("three", 7.0, 9.0),
        ]
    }

    #[test]
    fn groups_real_lines_two_per_stanza() {
        let stanzas = stanzas(&lyric_lines());

        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[0].text(), "one\ntwo");
        assert_eq!((stanzas[0].start_time, stanzas[0].end_time), (2.0, 7.0));
        assert_eq!(stanzas[1].lines.len(), 1);
        assert_eq!((stanzas[1].start_time, stanzas[1].end_time), (7.0, 9.0));
    }

    struct FakeGenerator {
        fail_describe: bool,
        fail_render_at: Option<usize>,
        descriptions: Mutex<Vec<String>>,
    }

    impl FakeGenerator {
        fn new(fail_describe: bool, fail_render_at: Option<usize>) -> Self {
            Self {
                fail_describe,
                fail_render_at,
                descriptions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BackgroundGenerator for FakeGenerator {
        async fn describe(&self, stanza: &Stanza, _song: &SongInfo) -> Result<String> {
            if self.fail_describe {
                Err(LyricSyncError::msg("unparseable reply"))
            } else {
                Ok(format!("scene: {}", stanza.text()))
            }
        }

        async fn render(&self, description: &str) -> Result<String> {
            let mut seen = self.descriptions.lock().unwrap();
            if Some(seen.len()) == self.fail_render_at {
                return Err(LyricSyncError::msg("quota exceeded"));
            }
            seen.push(description.to_string());
            Ok(format!("img-{}.png", seen.len()))
        }
    }

    #[tokio::test]
    async fn generates_one_asset_per_stanza() {
        let generator = FakeGenerator::new(false, None);
        let song = SongInfo::new("Song", "Band");
        let mut reports = Vec::new();

        let assets = generate_backgrounds(&generator, &lyric_lines(), &song, |percent, _| {
            reports.push(percent)
        })
        .await
        .unwrap();

        assert_eq!(
            assets,
            vec![
                BackgroundAsset::new("img-1.png", 2.0, 7.0),
                BackgroundAsset::new("img-2.png", 7.0, 9.0),
            ]
        );
        assert_eq!(reports.last().copied(), Some(100.0));
    }

    #[tokio::test]
    async fn description_failures_fall_back_to_song_description() {
        let generator = FakeGenerator::new(true, None);
        let song = SongInfo::new("Song", "Band");

        generate_backgrounds(&generator, &lyric_lines(), &song, |_, _| {})
            .await
            .unwrap();

        let seen = generator.descriptions.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|d| *d == song.fallback_description()));
    }

    #[tokio::test]
    async fn render_failure_aborts_the_batch() {
        let generator = FakeGenerator::new(false, Some(1));
        let song = SongInfo::new("Song", "Band");

        let err = generate_backgrounds(&generator, &lyric_lines(), &song, |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, LyricSyncError::Generation(_)));
        assert!(err.to_string().contains("stanza 2"));
    }

    #[tokio::test]
    async fn no_real_lines_is_a_generation_error() {
        let generator = FakeGenerator::new(false, None);
        let lines = vec![LyricLine::silent(0.0, 4.0)];

        let result =
            generate_backgrounds(&generator, &lines, &SongInfo::default(), |_, _| {}).await;
        assert!(result.is_err());
    }

    #[test]
    fn parses_command_lines() {
        let spec = CommandSpec::parse("gen-image --size 1280x720").unwrap();
        assert_eq!(spec.program, "gen-image");
        assert_eq!(spec.args, vec!["--size", "1280x720"]);
        assert!(CommandSpec::parse("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_that_ignores_its_input_is_a_generation_error() {
        let command = CommandSpec::parse("true").unwrap();
        let payload = "la ".repeat(4 * 1024 * 1024);

        let err = command.run(&payload).await.unwrap_err();
        assert!(matches!(err, LyricSyncError::Generation(_)));
        assert!(err.to_string().contains("`true`"));
    }
}
