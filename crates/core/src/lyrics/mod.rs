//! Lyric line model and SRT ingest.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{LyricSyncError, Result};

/// A single timed lyric entry. Times are in seconds.
///
/// An entry with empty text marks a deliberate silent gap. It keeps its time
/// window but never takes part in display-line selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

impl LyricLine {
    pub fn new(text: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        Self {
            text: text.into(),
            start_time,
            end_time,
        }
    }

    /// Creates a silent placeholder covering `[start_time, end_time)`.
    pub fn silent(start_time: f64, end_time: f64) -> Self {
        Self::new(String::new(), start_time, end_time)
    }

    /// Returns `true` when the line carries displayable text.
    pub fn is_real(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Half-open membership test: the end instant belongs to whatever follows.
    pub fn contains(&self, time: f64) -> bool {
        self.start_time <= time && time < self.end_time
    }
}

/// Checks the ordering invariants the timeline relies on.
///
/// Every line needs finite times with `start_time <= end_time`, the sequence
/// must be sorted by start time, and real lines must not overlap.
pub fn validate(lines: &[LyricLine]) -> Result<()> {
    for (index, line) in lines.iter().enumerate() {
        if !line.start_time.is_finite() || !line.end_time.is_finite() {
            return Err(LyricSyncError::InvalidInput(format!(
                "line {index} has a non-finite time"
            )));
        }
        if line.start_time > line.end_time {
            return Err(LyricSyncError::InvalidInput(format!(
                "line {index} ends at {} before it starts at {}",
                format_timecode(line.end_time),
                format_timecode(line.start_time)
            )));
        }
    }

    for (index, pair) in lines.windows(2).enumerate() {
        if pair[1].start_time < pair[0].start_time {
            return Err(LyricSyncError::InvalidInput(format!(
                "line {} starts before line {index}",
                index + 1
            )));
        }
    }

    let mut previous_real: Option<&LyricLine> = None;
    for line in lines.iter().filter(|line| line.is_real()) {
        if let Some(previous) = previous_real {
            if line.start_time < previous.end_time {
                return Err(LyricSyncError::InvalidInput(format!(
                    "lines `{}` and `{}` overlap",
                    previous.text, line.text
                )));
            }
        }
        previous_real = Some(line);
    }

    Ok(())
}

/// Prepends a silent line spanning from zero to the first line's start, when
/// the first line does not already start at zero.
pub fn with_intro_gap(mut lines: Vec<LyricLine>) -> Vec<LyricLine> {
    if let Some(first) = lines.first() {
        if first.start_time > 0.0 {
            let intro = LyricLine::silent(0.0, first.start_time);
            lines.insert(0, intro);
        }
    }
    lines
}

fn time_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})",
        )
        .expect("time line pattern is valid")
    })
}

/// Parses SRT-style subtitle text into lyric lines ordered by start time.
///
/// Blocks are separated by blank lines. Each block holds an optional index
/// line, a time line and one or more text lines; multi-line text keeps its
/// internal line breaks. Malformed blocks are skipped. The call only fails when
/// nothing usable remains.
pub fn parse_srt(content: &str) -> Result<Vec<LyricLine>> {
    let mut lines = Vec::new();
    let mut dropped = 0usize;

    for block in split_blocks(content) {
        match parse_block(&block) {
            Some(line) => lines.push(line),
            None => {
                dropped += 1;
                tracing::warn!(block = %block.join(" / "), "skipping malformed subtitle block");
            }
        }
    }

    if lines.is_empty() {
        return Err(LyricSyncError::NoUsableLines("subtitle input".to_string()));
    }

    lines.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    tracing::debug!(parsed = lines.len(), dropped, "parsed subtitle input");
    Ok(lines)
}

fn split_blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    for raw in content.lines() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

fn parse_block(block: &[&str]) -> Option<LyricLine> {
    let pattern = time_line_pattern();
    let time_index = block.iter().take(2).position(|line| pattern.is_match(line))?;
    let captures = pattern.captures(block[time_index])?;

    let field = |index: usize| captures.get(index)?.as_str().parse::<u32>().ok();
    let start = timecode_seconds(field(1)?, field(2)?, field(3)?, field(4)?);
    let end = timecode_seconds(field(5)?, field(6)?, field(7)?, field(8)?);
    if start > end {
        return None;
    }

    let text: Vec<&str> = block[time_index + 1..]
        .iter()
        .map(|line| line.trim())
        .collect();
    if text.is_empty() {
        return None;
    }

    Some(LyricLine::new(text.join("\n"), start, end))
}

fn timecode_seconds(hours: u32, minutes: u32, seconds: u32, millis: u32) -> f64 {
    f64::from(hours) * 3600.0 + f64::from(minutes) * 60.0 + f64::from(seconds)
        + f64::from(millis) / 1000.0
}

/// Formats seconds as `HH:MM:SS,mmm`. Negative values clamp to zero.
pub fn format_timecode(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let millis = total_millis % 1000;
    let total_seconds = total_millis / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_seconds / 3600,
        (total_seconds / 60) % 60,
        total_seconds % 60,
        millis
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:10,000 --> 00:00:12,500\nHello\n\n2\n00:00:13.000 --> 00:00:15.000\nSecond line\ncontinues\n";

    #[test]
    fn parses_blocks_with_both_separators() {
        let lines = parse_srt(SAMPLE).unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], LyricLine::new("Hello", 10.0, 12.5));
        assert_eq!(lines[1].text, "Second line\ncontinues");
        assert!((lines[1].start_time - 13.0).abs() < 1e-9);
    }

    #[test]
    fn index_line_is_optional() {
        let lines = parse_srt("00:01:00,250 --> 00:01:02,000\nNo index\n").unwrap();
        assert_eq!(lines, vec![LyricLine::new("No index", 60.25, 62.0)]);
    }

    #[test]
    fn malformed_blocks_are_dropped() {
        let input = "1\nnot a time\nText\n\n2\n00:00:01,000 --> 00:00:02,000\nKept\n\n3\n00:00:05,000 --> 00:00:03,000\nBackwards\n";
        let lines = parse_srt(input).unwrap();

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Kept");
    }

    #[test]
    fn fully_malformed_input_is_an_error() {
        let err = parse_srt("garbage\n\nmore garbage").unwrap_err();
        assert!(matches!(err, LyricSyncError::NoUsableLines(_)));
    }

    #[test]
    fn handles_crlf_input_and_sorts() {
        let input = "2\r\n00:00:05,000 --> 00:00:06,000\r\nB\r\n\r\n1\r\n00:00:01,000 --> 00:00:02,000\r\nA\r\n";
        let lines = parse_srt(input).unwrap();
        assert_eq!(lines[0].text, "A");
        assert_eq!(lines[1].text, "B");
    }

    #[test]
    fn validate_rejects_overlapping_real_lines() {
        let lines = vec![LyricLine::new("A", 0.0, 5.0), LyricLine::new("B", 4.0, 6.0)];
        assert!(validate(&lines).is_err());
    }

    #[test]
    fn validate_accepts_silent_intro() {
        let lines = with_intro_gap(vec![LyricLine::new("A", 5.0, 8.0)]);

        assert_eq!(lines.len(), 2);
        assert!(!lines[0].is_real());
        assert!(validate(&lines).is_ok());
    }

    #[test]
    fn formats_timecodes() {
        assert_eq!(format_timecode(3723.042), "01:02:03,042");
        assert_eq!(format_timecode(-1.0), "00:00:00,000");
    }
}
