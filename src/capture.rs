//! Capture pipeline - runs the frame decoder on a dedicated thread
//!
//! The capture thread owns the decoder outright. It reads blocks from the
//! sample source, demodulates I/Q input, feeds the decoder and hands out
//! owned frame copies through a single-slot channel, so the consumer never
//! sees a buffer that is still being written.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, trace};

use crate::demod::QuadratureDemod;
use crate::source::SampleSource;
use crate::tv::{DecoderParams, FrameAttempt, FrameDecoder, Geometry, SyncOffset};

/// Live view publishes one snapshot per this many blocks (40 ms at 5 ms blocks)
const LIVE_SNAPSHOT_BLOCKS: u64 = 8;

/// A frame handed from the capture thread to the consumer
#[derive(Debug, Clone)]
pub struct Frame {
    /// Counts up from 1 for each frame handed out
    pub sequence: u64,
    pub width: usize,
    pub height: usize,
    /// Taken from the live raster rather than a completed frame
    pub live: bool,
    /// Sync offset of the most recent completed frame
    pub offset: Option<SyncOffset>,
    /// RGBA8 pixels, row-major
    pub rgba: Vec<u8>,
}

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub geometry: Geometry,
    pub params: DecoderParams,
    /// Source sample rate in Hz
    pub sample_rate: u32,
}

impl CaptureConfig {
    /// Sample frames per source read: 5 ms of signal
    pub fn block_frames(&self) -> usize {
        (self.sample_rate as usize / 200).max(1)
    }
}

/// Statistics for the capture thread (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub samples_read: AtomicU64,
    pub blocks_processed: AtomicU64,
    pub frames_completed: AtomicU64,
    pub frames_published: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub skips_scheduled: AtomicU64,
    pub samples_skipped: AtomicU64,
    pub last_x_offset: AtomicU64,
    pub last_y_offset: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Consumer-side ends of a running capture
pub struct CaptureChannels {
    /// Holds at most one unread frame; newer frames replace it
    pub frames: Receiver<Frame>,
    /// Hot-swap decoder parameters; the newest value wins.
    ///
    /// The binary configures the decoder once at start and never sends here.
    /// Embedders use it to retune sync/black levels or toggle live view on a
    /// running capture; the update applies before the next block is decoded.
    pub params: Sender<DecoderParams>,
}

/// Capture controller
pub struct TvCapture {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl TvCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: CaptureStats::new(),
        }
    }

    /// Start decoding `source` on a new thread
    pub fn start(&self, source: Box<dyn SampleSource + Send>) -> Result<CaptureChannels> {
        info!("===========================================");
        info!("  Starting SATV capture");
        info!("===========================================");
        info!(
            "  Frame: {}x{}",
            self.config.geometry.width(),
            self.config.geometry.height()
        );
        info!("  Sample rate: {} Hz", self.config.sample_rate);
        let input = if source.channels() == 2 {
            "I/Q (FM demodulated)"
        } else {
            "real samples"
        };
        info!("  Input: {}", input);
        info!(
            "  Sync level: {} | Black level: {} | Span: {}",
            self.config.params.sync_level, self.config.params.black_level, self.config.params.span
        );
        info!(
            "  Live view: {} | Auto sync: {}",
            self.config.params.live_view, self.config.params.auto_sync
        );

        let (frame_tx, frame_rx) = bounded::<Frame>(1);
        let (params_tx, params_rx) = unbounded::<DecoderParams>();

        let config = self.config.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();
        let slot = FrameSlot {
            tx: frame_tx,
            stale: frame_rx.clone(),
        };

        running.store(true, Ordering::SeqCst);

        let thread_running = running.clone();
        let spawned = thread::Builder::new()
            .name("tv-capture".to_string())
            .spawn(move || {
                let result = run_capture(config, source, &thread_running, &stats, &slot, params_rx);
                if let Err(e) = result {
                    error!("Capture error: {:#}", e);
                }
                thread_running.store(false, Ordering::SeqCst);
                // Consumers see the disconnect only after the run flag is down
                drop(slot);
            });
        if let Err(e) = spawned {
            running.store(false, Ordering::SeqCst);
            return Err(e).context("Failed to spawn capture thread");
        }

        Ok(CaptureChannels {
            frames: frame_rx,
            params: params_tx,
        })
    }

    /// Stop capturing
    pub fn stop(&self) {
        info!("Stopping SATV capture...");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get statistics
    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }
}

impl Drop for TvCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Producer end of the single-slot frame channel
struct FrameSlot {
    tx: Sender<Frame>,
    /// Used only to evict an unread frame
    stale: Receiver<Frame>,
}

impl FrameSlot {
    /// Hand out `frame`, replacing any frame the consumer has not taken yet.
    /// Returns the pixel buffer of a frame that never reached the consumer.
    fn publish(&self, frame: Frame, stats: &CaptureStats) -> Option<Vec<u8>> {
        let frame = match self.tx.try_send(frame) {
            Ok(()) => {
                stats.frames_published.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(TrySendError::Full(frame)) | Err(TrySendError::Disconnected(frame)) => frame,
        };

        let evicted = self.stale.try_recv().ok().map(|old| {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Frame {} not collected, replaced", old.sequence);
            old.rgba
        });
        match self.tx.try_send(frame) {
            Ok(()) => {
                stats.frames_published.fetch_add(1, Ordering::Relaxed);
                evicted
            }
            Err(e) => {
                stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Frame channel full, dropping frame");
                Some(e.into_inner().rgba)
            }
        }
    }
}

/// Main capture loop (runs in dedicated thread)
fn run_capture(
    config: CaptureConfig,
    mut source: Box<dyn SampleSource + Send>,
    running: &AtomicBool,
    stats: &CaptureStats,
    slot: &FrameSlot,
    params_rx: Receiver<DecoderParams>,
) -> Result<()> {
    let geometry = config.geometry;
    let mut decoder = FrameDecoder::new(geometry, config.params);
    let mut demod = (source.channels() == 2)
        .then(|| QuadratureDemod::full_scale(config.sample_rate as f32));

    let block_frames = config.block_frames();
    let mut raw = Vec::with_capacity(block_frames * source.channels());
    let mut samples = Vec::with_capacity(block_frames);
    let mut sequence = 0u64;
    let mut live_blocks = 0u64;
    // Pixel buffer reclaimed from a frame the consumer never took
    let mut spare: Option<Vec<u8>> = None;
    let mut first_data = true;

    while running.load(Ordering::SeqCst) {
        if let Some(params) = params_rx.try_iter().last() {
            debug!("Decoder parameters updated: {:?}", params);
            decoder.set_parameters(params);
        }

        let frames_read = source
            .read_block(block_frames, &mut raw)
            .context("Failed to read samples")?;
        if frames_read == 0 {
            info!("Sample source exhausted");
            break;
        }
        if first_data {
            info!("First samples received ({} per block)", frames_read);
            first_data = false;
        }

        let block = match demod.as_mut() {
            Some(demod) => {
                demod.process(&raw, &mut samples);
                &samples
            }
            None => &raw,
        };
        decoder.input(block);

        stats.samples_read.fetch_add(frames_read as u64, Ordering::Relaxed);
        stats.blocks_processed.fetch_add(1, Ordering::Relaxed);

        let decoder_stats = decoder.stats().clone();
        stats.frames_completed.store(decoder_stats.frames_completed, Ordering::Relaxed);
        stats.skips_scheduled.store(decoder_stats.skips_scheduled, Ordering::Relaxed);
        stats.samples_skipped.store(decoder_stats.samples_skipped, Ordering::Relaxed);
        if let Some(offset) = decoder_stats.last_offset {
            stats.last_x_offset.store(offset.x as u64, Ordering::Relaxed);
            stats.last_y_offset.store(offset.y as u64, Ordering::Relaxed);
        }

        let (live, pixels) = match decoder.poll_frame() {
            FrameAttempt::NoFrameYet => continue,
            FrameAttempt::Live(pixels) => {
                live_blocks += 1;
                if (live_blocks - 1) % LIVE_SNAPSHOT_BLOCKS != 0 {
                    continue;
                }
                (true, pixels)
            }
            FrameAttempt::FrameReady(pixels) => (false, pixels),
        };
        sequence += 1;
        if !live {
            if let Some(offset) = decoder_stats.last_offset {
                let note = if offset.skip_scheduled {
                    ", skip scheduled"
                } else {
                    ""
                };
                debug!(
                    "Frame {}: sync x={} y={} (linear {}){}",
                    sequence, offset.x, offset.y, offset.linear, note
                );
            }
        }

        let mut rgba = spare.take().unwrap_or_default();
        rgba.clear();
        rgba.extend_from_slice(pixels);
        let frame = Frame {
            sequence,
            width: geometry.width(),
            height: geometry.height(),
            live,
            offset: decoder_stats.last_offset,
            rgba,
        };
        spare = slot.publish(frame, stats);
    }

    if !running.load(Ordering::SeqCst) {
        info!("Capture stopped before the source was exhausted");
    }
    info!(
        "Capture finished: samples={}, frames={}, published={}, dropped={}, skips={}",
        stats.samples_read.load(Ordering::Relaxed),
        stats.frames_completed.load(Ordering::Relaxed),
        stats.frames_published.load(Ordering::Relaxed),
        stats.frames_dropped.load(Ordering::Relaxed),
        stats.skips_scheduled.load(Ordering::Relaxed)
    );

    Ok(())
}
