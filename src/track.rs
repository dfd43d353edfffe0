use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Originating container/codec of a decoded track.
///
/// The ordinal of each variant is folded into the content fingerprint, so
/// existing entries must never be reordered or removed. New formats are
/// appended at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FormatCode {
    Flac = 0,
    Mp3 = 1,
    Ogg = 2,
    Opus = 3,
    Mp4 = 4,
    M4a = 5,
    Wav = 6,
    Wv = 7,
    Ape = 8,
    Ac3 = 9,
    Wma = 10,
    Dsf = 11,
    Dff = 12,
    Aif = 13,
    Aiff = 14,
}

impl FormatCode {
    /// All formats in ordinal order.
    pub const ALL: [FormatCode; 15] = [
        FormatCode::Flac,
        FormatCode::Mp3,
        FormatCode::Ogg,
        FormatCode::Opus,
        FormatCode::Mp4,
        FormatCode::M4a,
        FormatCode::Wav,
        FormatCode::Wv,
        FormatCode::Ape,
        FormatCode::Ac3,
        FormatCode::Wma,
        FormatCode::Dsf,
        FormatCode::Dff,
        FormatCode::Aif,
        FormatCode::Aiff,
    ];

    /// Stable ordinal used by the fingerprint.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Lowercase file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            FormatCode::Flac => "flac",
            FormatCode::Mp3 => "mp3",
            FormatCode::Ogg => "ogg",
            FormatCode::Opus => "opus",
            FormatCode::Mp4 => "mp4",
            FormatCode::M4a => "m4a",
            FormatCode::Wav => "wav",
            FormatCode::Wv => "wv",
            FormatCode::Ape => "ape",
            FormatCode::Ac3 => "ac3",
            FormatCode::Wma => "wma",
            FormatCode::Dsf => "dsf",
            FormatCode::Dff => "dff",
            FormatCode::Aif => "aif",
            FormatCode::Aiff => "aiff",
        }
    }

    /// Look up a format by extension (case-insensitive, no leading dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        Self::ALL.iter().copied().find(|f| f.extension() == ext)
    }

    /// Look up a format from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackError {
    #[error("channel count must be positive")]
    NoChannels,
    #[error("{len} samples do not divide into {channels} channels")]
    RaggedFrames { len: usize, channels: usize },
    #[error("sample rate must be positive for a non-empty track")]
    NoSampleRate,
}

/// Track length as whole minutes and remaining whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackDuration {
    pub minutes: u64,
    pub seconds: u64,
}

impl TrackDuration {
    /// Split a frame count into minutes and seconds, truncating any
    /// fractional second.
    pub fn from_frames(frames: usize, sample_rate: u32) -> Self {
        if sample_rate == 0 {
            return Self::default();
        }
        let total_secs = frames as u64 / sample_rate as u64;
        Self {
            minutes: total_secs / 60,
            seconds: total_secs % 60,
        }
    }

    pub fn total_seconds(&self) -> u64 {
        self.minutes * 60 + self.seconds
    }
}

/// Decoded audio held in memory: interleaved samples in [-1.0, 1.0], one
/// row per frame and one column per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    format_code: FormatCode,
}

impl PcmBuffer {
    pub fn new(
        samples: Vec<f32>,
        channels: usize,
        sample_rate: u32,
        format_code: FormatCode,
    ) -> Result<Self, TrackError> {
        if channels == 0 {
            return Err(TrackError::NoChannels);
        }
        if samples.len() % channels != 0 {
            return Err(TrackError::RaggedFrames {
                len: samples.len(),
                channels,
            });
        }
        if sample_rate == 0 && !samples.is_empty() {
            return Err(TrackError::NoSampleRate);
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
            format_code,
        })
    }

    /// Build a buffer from one sample vector per channel.
    pub fn from_channels(
        channels: &[Vec<f32>],
        sample_rate: u32,
        format_code: FormatCode,
    ) -> Result<Self, TrackError> {
        let count = channels.len();
        if count == 0 {
            return Err(TrackError::NoChannels);
        }
        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            let len = channels.iter().map(Vec::len).sum();
            return Err(TrackError::RaggedFrames {
                len,
                channels: count,
            });
        }
        let mut samples = Vec::with_capacity(frames * count);
        for i in 0..frames {
            samples.extend(channels.iter().map(|c| c[i]));
        }
        Self::new(samples, count, sample_rate, format_code)
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn format_code(&self) -> FormatCode {
        self.format_code
    }

    /// Interleaved samples, frame-major.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// All channel values of frame `index`.
    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.channels)?;
        self.samples.get(start..start + self.channels)
    }

    /// A buffer with zero frames means nothing was decoded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> TrackDuration {
        TrackDuration::from_frames(self.frames(), self.sample_rate)
    }
}
