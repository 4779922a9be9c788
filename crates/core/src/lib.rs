//! Core library for the Lyric Sync karaoke renderer.
//!
//! Lyrics are aligned to an audio track as timed lines. The
//! [`TimelineSampler`] maps any timestamp to the previous, current and next
//! line plus the reveal fraction of the current one. Two drivers consume it:
//! the real-time [`PlaybackClock`] and the offline [`ExportDriver`], which
//! renders every frame of a fixed-rate clock and hands the sequence to an
//! encoder.

pub mod assets;
pub mod audio;
pub mod backgrounds;
pub mod config;
pub mod error;
pub mod lyrics;
pub mod playback;
pub mod record;
pub mod render;
pub mod scene;
pub mod timeline;

pub use assets::{AssetStore, FsImageLoader, ImageLoader};
pub use audio::{AudioClip, AudioTransport, WallClockTransport};
pub use backgrounds::{
    background_at, generate_backgrounds, BackgroundAsset, BackgroundGenerator, CommandGenerator,
    SongInfo,
};
pub use config::{AppConfig, ExportConfig, PlaybackConfig, RenderConfig};
pub use error::{LyricSyncError, Result};
pub use lyrics::LyricLine;
pub use playback::{PlaybackClock, PlaybackState};
pub use record::{
    EncoderService, EncoderState, ExportDriver, ExportOutput, ExportProgress, ExportRequest,
    FfmpegEncoder,
};
pub use render::{CanvasRenderer, FrameRenderer};
pub use scene::SceneDescriptor;
pub use timeline::{progress_of, TimecodeIndex, TimelineSampler, TimelineState};
