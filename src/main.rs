//! SATV Capture - decodes recorded SATV baseband into frames
//!
//! Reads samples from a raw file, decodes them on a capture thread and
//! records the aligned frames to disk.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use satv_capture::capture::{CaptureConfig, TvCapture};
use satv_capture::config::Config;
use satv_capture::recorder::Recorder;
use satv_capture::source::SampleReader;
use satv_capture::tv::Geometry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   SATV Capture");
    info!("   line-scan video decoder");
    info!("===========================================");

    // Load configuration
    let config = Config::from_env();

    info!("Configuration:");
    info!("  Input: {}", config.input_path.display());
    info!("  Format: {:?} x{} channel(s)", config.format, config.channels);
    info!("  WAV header: {} | Loop: {}", config.wav, config.looping);
    info!("  Sample rate: {} Hz", config.sample_rate);
    info!("  Frame: {}x{}", config.width, config.height);
    match &config.record_dir {
        Some(dir) => info!("  Recording to: {}", dir.display()),
        None => info!("  Recording: off"),
    }

    let geometry = Geometry::new(config.width, config.height)?;

    let source = SampleReader::open(
        &config.input_path,
        config.format,
        config.channels,
        config.wav,
        config.looping,
    )
    .with_context(|| format!("Failed to open {}", config.input_path.display()))?;

    let capture = Arc::new(TvCapture::new(CaptureConfig {
        geometry,
        params: config.params,
        sample_rate: config.sample_rate,
    }));
    let channels = capture.start(Box::new(source))?;

    // Stop cleanly on Ctrl+C
    let signal_capture = capture.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received");
            signal_capture.stop();
        }
    });

    let mut recorder = match &config.record_dir {
        // Live view frames are raw previews, not decoded frames
        Some(dir) if !config.params.live_view => {
            Some(Recorder::create(dir, config.width, config.height)?.0)
        }
        Some(_) => {
            warn!("Live view is on, frames will not be recorded");
            None
        }
        None => None,
    };

    info!("===========================================");
    info!("  Decoding...");
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    let stats_interval = Duration::from_millis(config.stats_interval_ms.max(100));
    let mut frames_received = 0u64;
    let mut last_stats = Instant::now();

    // Main loop - receive frames from the capture thread
    loop {
        match channels.frames.recv_timeout(Duration::from_millis(500)) {
            Ok(frame) => {
                frames_received += 1;
                if let Some(offset) = frame.offset {
                    debug!(
                        "Frame #{} received: sync x={} y={}",
                        frame.sequence, offset.x, offset.y
                    );
                }

                if let Some(rec) = recorder.as_mut() {
                    if !frame.live {
                        if let Err(e) = rec.write_frame(&frame.rgba) {
                            error!("Failed to write frame, recording stopped: {}", e);
                            recorder = None;
                        }
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // No frame yet, continue with periodic tasks
            }
            Err(RecvTimeoutError::Disconnected) => {
                info!("Capture thread finished");
                break;
            }
        }

        if last_stats.elapsed() >= stats_interval {
            let stats = capture.stats();
            info!(
                "[Stats] Samples: {} | Frames: {} (rx {}, dropped {}) | Skips: {} | Sync {},{}",
                stats.samples_read.load(Ordering::Relaxed),
                stats.frames_completed.load(Ordering::Relaxed),
                frames_received,
                stats.frames_dropped.load(Ordering::Relaxed),
                stats.skips_scheduled.load(Ordering::Relaxed),
                stats.last_x_offset.load(Ordering::Relaxed),
                stats.last_y_offset.load(Ordering::Relaxed)
            );
            last_stats = Instant::now();
        }
    }

    capture.stop();

    if let Some(rec) = recorder {
        let written = rec.frames_written();
        rec.finish().context("Failed to flush recording")?;
        info!("Recording closed: {} frame(s)", written);
    }

    let stats = capture.stats();
    info!(
        "Shutdown complete. Samples: {}, frames decoded: {}, frames received: {}",
        stats.samples_read.load(Ordering::Relaxed),
        stats.frames_completed.load(Ordering::Relaxed),
        frames_received
    );
    Ok(())
}
