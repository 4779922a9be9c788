//! Time to lyric-window derivation.
//!
//! [`TimelineSampler::sample`] is the one place that decides which lines are
//! shown at a timestamp. The playback clock and the export driver both call it
//! and never branch on line boundaries themselves.

use serde::Serialize;

use crate::backgrounds::{background_at, BackgroundAsset};
use crate::{lyrics, LyricLine, Result};

/// Previous/current/next lines active at a timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LyricWindow<'a> {
    pub previous: Option<&'a LyricLine>,
    pub current: Option<&'a LyricLine>,
    pub next: Option<&'a LyricLine>,
}

/// Boundary class of a timestamp relative to the indexed lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WindowClass {
    Empty,
    BeforeFirst,
    InLine,
    InGap,
    AfterLast,
}

/// Sorted index over the real lines of a lyric sequence.
#[derive(Debug, Clone, Default)]
pub struct TimecodeIndex {
    lines: Vec<LyricLine>,
}

impl TimecodeIndex {
    /// Builds an index from lines ordered by start time. Silent lines are
    /// filtered out here and never reach a window.
    pub fn new(lines: &[LyricLine]) -> Self {
        Self {
            lines: lines.iter().filter(|line| line.is_real()).cloned().collect(),
        }
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the window at `time`. Lines own `[start, end)`, so a line's
    /// end instant belongs to the following gap or line.
    pub fn window_at(&self, time: f64) -> LyricWindow<'_> {
        let lines = &self.lines;
        let (Some(first), Some(last)) = (lines.first(), lines.last()) else {
            return LyricWindow::default();
        };

        if time < first.start_time {
            return LyricWindow {
                next: Some(first),
                ..Default::default()
            };
        }

        if time >= last.end_time {
            return LyricWindow {
                previous: Some(last),
                ..Default::default()
            };
        }

        // Last line starting at or before `time`.
        let Some(candidate) = lines
            .partition_point(|line| line.start_time <= time)
            .checked_sub(1)
        else {
            return LyricWindow::default();
        };

        if lines[candidate].contains(time) {
            return LyricWindow {
                previous: candidate.checked_sub(1).map(|index| &lines[index]),
                current: Some(&lines[candidate]),
                next: lines.get(candidate + 1),
            };
        }

        match (0..=candidate).rev().find(|&index| lines[index].end_time <= time) {
            Some(index) => LyricWindow {
                previous: Some(&lines[index]),
                current: None,
                next: lines.get(index + 1),
            },
            None => LyricWindow::default(),
        }
    }

    /// Classifies `time` into one of the four boundary classes.
    pub fn classify(&self, time: f64) -> WindowClass {
        let window = self.window_at(time);
        match (window.previous, window.current, window.next) {
            (_, Some(_), _) => WindowClass::InLine,
            (None, None, Some(_)) => WindowClass::BeforeFirst,
            (Some(_), None, Some(_)) => WindowClass::InGap,
            (Some(_), None, None) => WindowClass::AfterLast,
            (None, None, None) => WindowClass::Empty,
        }
    }
}

/// Reveal fraction of `line` at `time`, clamped to `[0, 1]`. Zero-length
/// lines are fully revealed.
pub fn progress_of(line: &LyricLine, time: f64) -> f64 {
    let length = line.duration();
    if length <= 0.0 {
        return 1.0;
    }
    ((time - line.start_time) / length).clamp(0.0, 1.0)
}

/// Everything the renderer needs for one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimelineState<'a> {
    pub time: f64,
    pub previous: Option<&'a LyricLine>,
    pub current: Option<&'a LyricLine>,
    pub next: Option<&'a LyricLine>,
    /// Present exactly when `current` is.
    pub progress: Option<f64>,
    pub background: &'a BackgroundAsset,
}

/// Pure time to [`TimelineState`] function over an immutable lyric session.
#[derive(Debug, Clone)]
pub struct TimelineSampler {
    index: TimecodeIndex,
    backgrounds: Vec<BackgroundAsset>,
    fallback: BackgroundAsset,
}

impl TimelineSampler {
    /// Validates `lines` and builds the sampler.
    pub fn new(
        lines: &[LyricLine],
        backgrounds: Vec<BackgroundAsset>,
        fallback: BackgroundAsset,
    ) -> Result<Self> {
        lyrics::validate(lines)?;
        Ok(Self {
            index: TimecodeIndex::new(lines),
            backgrounds,
            fallback,
        })
    }

    pub fn index(&self) -> &TimecodeIndex {
        &self.index
    }

    pub fn backgrounds(&self) -> &[BackgroundAsset] {
        &self.backgrounds
    }

    pub fn fallback(&self) -> &BackgroundAsset {
        &self.fallback
    }

    /// Every distinct background URL the sampler can return, fallback first.
    pub fn background_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = vec![self.fallback.url.as_str()];
        for asset in &self.backgrounds {
            if !urls.contains(&asset.url.as_str()) {
                urls.push(asset.url.as_str());
            }
        }
        urls
    }

    /// Samples the timeline at `time`. Results do not depend on call order.
    pub fn sample(&self, time: f64) -> TimelineState<'_> {
        let window = self.index.window_at(time);
        TimelineState {
            time,
            previous: window.previous,
            current: window.current,
            next: window.next,
            progress: window.current.map(|line| progress_of(line, time)),
            background: background_at(&self.backgrounds, time, &self.fallback),
        }
    }
}
