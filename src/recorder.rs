//! Grayscale frame recorder
//!
//! File layout:
//! - 8 bytes: width (u64, little-endian)
//! - 8 bytes: height (u64, little-endian)
//! - then one `width * height` byte intensity plane per frame, back to back

use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::info;

/// Size of the recording header in bytes
pub const HEADER_LEN: usize = 16;

/// Appends frames to a `.bin` recording
pub struct Recorder<W: Write> {
    writer: W,
    width: usize,
    height: usize,
    plane: Vec<u8>,
    frames_written: u64,
}

impl Recorder<BufWriter<File>> {
    /// Start a new timestamped recording in `dir`, creating it if needed
    pub fn create(dir: &Path, width: usize, height: usize) -> Result<(Self, PathBuf)> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create recording directory {}", dir.display()))?;

        let path = dir.join(recording_file_name(Local::now()));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create recording {}", path.display()))?;
        let recorder = Self::new(BufWriter::new(file), width, height)
            .context("Failed to write recording header")?;

        info!("Recording {}x{} frames to {}", width, height, path.display());
        Ok((recorder, path))
    }
}

impl<W: Write> Recorder<W> {
    /// Write the header and get ready for frames
    pub fn new(mut writer: W, width: usize, height: usize) -> io::Result<Self> {
        writer.write_all(&(width as u64).to_le_bytes())?;
        writer.write_all(&(height as u64).to_le_bytes())?;
        Ok(Self {
            writer,
            width,
            height,
            plane: vec![0; width * height],
            frames_written: 0,
        })
    }

    /// Append one RGBA frame, keeping only the first channel of each pixel
    pub fn write_frame(&mut self, rgba: &[u8]) -> io::Result<()> {
        let pixels = self.width * self.height;
        if rgba.len() != pixels * 4 {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "frame is {} bytes, expected {} for {}x{} RGBA",
                    rgba.len(),
                    pixels * 4,
                    self.width,
                    self.height
                ),
            ));
        }

        for (dst, px) in self.plane.iter_mut().zip(rgba.chunks_exact(4)) {
            *dst = px[0];
        }
        self.writer.write_all(&self.plane)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and hand back the underlying writer
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Read the `(width, height)` header of a recording
pub fn read_header<R: Read>(reader: &mut R) -> io::Result<(u64, u64)> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let mut width = [0u8; 8];
    let mut height = [0u8; 8];
    width.copy_from_slice(&header[..8]);
    height.copy_from_slice(&header[8..]);
    Ok((u64::from_le_bytes(width), u64::from_le_bytes(height)))
}

/// `video_HH-MM-SS_DD-MM-YYYY.bin`
pub fn recording_file_name(now: DateTime<Local>) -> String {
    format!("video_{}.bin", now.format("%H-%M-%S_%d-%m-%Y"))
}
