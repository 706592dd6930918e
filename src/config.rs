//! Configuration loaded from environment variables

use std::path::PathBuf;
use std::str::FromStr;

use crate::source::SampleFormat;
use crate::tv::DecoderParams;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw sample file to decode
    pub input_path: PathBuf,

    /// On-disk sample encoding
    pub format: SampleFormat,

    /// 1 = demodulated amplitude, 2 = interleaved I/Q
    pub channels: usize,

    /// Skip a WAV header
    pub wav: bool,

    /// Rewind at end of file
    pub looping: bool,

    /// Input sample rate in Hz
    pub sample_rate: u32,

    /// Frame width in pixels
    pub width: usize,

    /// Frame height in pixels
    pub height: usize,

    /// Decoder tunables
    pub params: DecoderParams,

    /// Directory for `.bin` recordings; recording is off when unset
    pub record_dir: Option<PathBuf>,

    /// Statistics logging interval in milliseconds
    pub stats_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = DecoderParams::default();
        let flag = |key: &str| lookup(key).and_then(|s| parse_bool(&s));

        Self {
            input_path: lookup("SATV_INPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("recording.raw")),

            format: lookup("SATV_FORMAT")
                .and_then(|s| SampleFormat::from_str(&s).ok())
                .unwrap_or(SampleFormat::F32),

            channels: parse_var(&lookup, "SATV_CHANNELS")
                .filter(|&c: &usize| c == 1 || c == 2)
                .unwrap_or(2),

            wav: flag("SATV_WAV").unwrap_or(false),

            looping: flag("SATV_LOOP").unwrap_or(false),

            sample_rate: parse_var(&lookup, "SAMPLE_RATE").unwrap_or(100_000),

            width: parse_var(&lookup, "FRAME_WIDTH").unwrap_or(1285),

            height: parse_var(&lookup, "FRAME_HEIGHT").unwrap_or(730),

            params: DecoderParams {
                sync_level: parse_var(&lookup, "SYNC_LEVEL").unwrap_or(defaults.sync_level),
                black_level: parse_var(&lookup, "BLACK_LEVEL").unwrap_or(defaults.black_level),
                span: parse_var(&lookup, "SPAN").unwrap_or(defaults.span),
                live_view: flag("LIVE_VIEW").unwrap_or(defaults.live_view),
                auto_sync: flag("AUTO_SYNC").unwrap_or(defaults.auto_sync),
            },

            record_dir: lookup("RECORD_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),

            stats_interval_ms: parse_var(&lookup, "STATS_INTERVAL_MS").unwrap_or(5000),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
