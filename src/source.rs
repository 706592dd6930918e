//! Raw sample file source
//!
//! Reads recorded baseband files as `f32` samples. Files hold either one
//! channel (already demodulated amplitude) or two interleaved channels (I/Q).
//! WAV files are supported by skipping to the `data` chunk.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info};

/// Furthest into a WAV file we look for the `data` chunk
const WAV_SCAN_LIMIT: u64 = 1_000_000;

/// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("sample source I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown sample format '{0}' (expected u8, s8, s16 or f32)")]
    UnknownFormat(String),

    #[error("unsupported channel count {0} (expected 1 or 2)")]
    InvalidChannels(usize),
}

/// On-disk sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S8,
    S16,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }

    /// Decode one sample from exactly `bytes_per_sample()` bytes
    fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::U8 => bytes[0] as f32 / 127.5 - 1.0,
            SampleFormat::S8 => bytes[0] as i8 as f32 / 128.0,
            SampleFormat::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
            SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

impl FromStr for SampleFormat {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "u8" => Ok(SampleFormat::U8),
            "s8" | "i8" => Ok(SampleFormat::S8),
            "s16" | "i16" => Ok(SampleFormat::S16),
            "f32" => Ok(SampleFormat::F32),
            other => Err(SourceError::UnknownFormat(other.to_string())),
        }
    }
}

/// Anything that can feed blocks of samples to the capture thread
pub trait SampleSource {
    /// Values per sample frame: 1 for real samples, 2 for interleaved I/Q
    fn channels(&self) -> usize;

    /// Replace `out` with up to `frames` sample frames.
    /// Returns the number of frames read; 0 means the source is exhausted.
    fn read_block(&mut self, frames: usize, out: &mut Vec<f32>) -> Result<usize, SourceError>;
}

/// Raw file reader
pub struct SampleReader<R> {
    inner: R,
    format: SampleFormat,
    channels: usize,
    looping: bool,
    /// Byte offset of the first sample
    data_start: u64,
    scratch: Vec<u8>,
}

impl SampleReader<BufReader<File>> {
    /// Open a raw or WAV sample file
    pub fn open(
        path: &Path,
        format: SampleFormat,
        channels: usize,
        wav: bool,
        looping: bool,
    ) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let reader = Self::new(BufReader::new(file), format, channels, looping)?;
        let reader = if wav { reader.with_wav_header()? } else { reader };
        info!(
            "Opened {} ({:?}, {} channel(s), data at byte {})",
            path.display(),
            format,
            channels,
            reader.data_start
        );
        Ok(reader)
    }
}

impl<R: Read + Seek> SampleReader<R> {
    pub fn new(
        inner: R,
        format: SampleFormat,
        channels: usize,
        looping: bool,
    ) -> Result<Self, SourceError> {
        if channels != 1 && channels != 2 {
            return Err(SourceError::InvalidChannels(channels));
        }
        Ok(Self {
            inner,
            format,
            channels,
            looping,
            data_start: 0,
            scratch: Vec::new(),
        })
    }

    /// Start reading after the WAV header, if there is one.
    /// Files without a recognizable header are read from byte 0.
    pub fn with_wav_header(mut self) -> Result<Self, SourceError> {
        self.data_start = find_wav_data(&mut self.inner)?.unwrap_or(0);
        debug!("WAV data offset: {}", self.data_start);
        self.rewind()?;
        Ok(self)
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Seek back to the first sample
    pub fn rewind(&mut self) -> Result<(), SourceError> {
        self.inner.seek(SeekFrom::Start(self.data_start))?;
        Ok(())
    }

    /// Fill `buf` as far as possible, wrapping around at EOF when looping.
    /// Returns the number of bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let mut filled = 0;
        let mut wrapped_empty = false;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    if !self.looping || wrapped_empty {
                        break;
                    }
                    self.rewind()?;
                    // Guards against spinning on a file with no samples
                    wrapped_empty = true;
                }
                Ok(n) => {
                    filled += n;
                    wrapped_empty = false;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl<R: Read + Seek> SampleSource for SampleReader<R> {
    fn channels(&self) -> usize {
        self.channels
    }

    fn read_block(&mut self, frames: usize, out: &mut Vec<f32>) -> Result<usize, SourceError> {
        let sample_size = self.format.bytes_per_sample();
        let frame_size = sample_size * self.channels;

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(frames * frame_size, 0);
        let result = self.fill(&mut scratch);
        let read = match result {
            Ok(read) => read,
            Err(e) => {
                self.scratch = scratch;
                return Err(e);
            }
        };

        // A trailing partial frame is dropped
        let whole_frames = read / frame_size;
        out.clear();
        out.extend(
            scratch[..whole_frames * frame_size]
                .chunks_exact(sample_size)
                .map(|bytes| self.format.decode(bytes)),
        );

        self.scratch = scratch;
        Ok(whole_frames)
    }
}

/// Locate the first sample byte of a RIFF/WAVE file
fn find_wav_data<R: Read + Seek>(reader: &mut R) -> io::Result<Option<u64>> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; 16];
    if reader.read_exact(&mut header).is_err() {
        return Ok(None);
    }
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" || &header[12..16] != b"fmt " {
        return Ok(None);
    }

    // Walk 4-byte words until the data chunk id
    let mut pos = 16u64;
    let mut word = [0u8; 4];
    while pos < WAV_SCAN_LIMIT {
        if reader.read_exact(&mut word).is_err() {
            return Ok(None);
        }
        pos += 4;
        if &word == b"data" {
            // Skip the chunk size field
            let start = pos + 4;
            return Ok((start < file_size).then_some(start));
        }
    }
    Ok(None)
}
