//! Frame decoder - raster tracking, sync histograms and frame hand-off
//!
//! Every sample becomes one pixel. Samples below the sync level are counted
//! in a per-column and a per-row histogram; at the end of each frame the two
//! histogram peaks give the sync position, which is used to rotate the frame
//! into an aligned copy and, with auto sync, to skip samples so the next
//! frames start on the sync pulse.

use tracing::{debug, trace, warn};

use super::types::{
    DecoderParams, DecoderStats, FrameAttempt, Geometry, SyncOffset, BYTES_PER_PIXEL,
};

/// Rows of vertical drift tolerated before auto sync skips samples.
/// Offsets up to this are treated as noise.
const AUTO_SYNC_MIN_ROWS: usize = 10;

/// Opaque red, drawn over sync pulses in live view
const SYNC_MARKER: [u8; BYTES_PER_PIXEL] = [255, 0, 0, 255];

/// Whether incoming samples are written or discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Writing,
    /// Samples still to discard before writing resumes
    Skipping(usize),
}

/// Streaming line-scan decoder.
///
/// Single-threaded by construction: all mutating calls take `&mut self`, so
/// feeding and reading from different threads needs a lock or, as the capture
/// pipeline does, a single owning thread that hands out frame copies.
pub struct FrameDecoder {
    geometry: Geometry,
    params: DecoderParams,

    // Raster cursor
    x: usize,
    y: usize,

    column_hits: Vec<u32>,
    row_hits: Vec<u32>,
    phase: Phase,

    /// Written continuously in raster order
    raster: Vec<u8>,
    /// Rotated copy of `raster`, refreshed once per frame
    aligned: Vec<u8>,
    frame_ready: bool,

    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(geometry: Geometry, params: DecoderParams) -> Self {
        Self {
            geometry,
            params,
            x: 0,
            y: 0,
            column_hits: vec![0; geometry.width()],
            row_hits: vec![0; geometry.height()],
            phase: Phase::Writing,
            raster: vec![0; geometry.rgba_len()],
            aligned: vec![0; geometry.rgba_len()],
            frame_ready: false,
            stats: DecoderStats::default(),
        }
    }

    /// Replace the tunables. Takes effect from the next sample.
    pub fn set_parameters(&mut self, params: DecoderParams) {
        self.params = params;
    }

    pub fn params(&self) -> &DecoderParams {
        &self.params
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    /// The raw raster as currently written, regardless of view mode
    pub fn raster(&self) -> &[u8] {
        &self.raster
    }

    /// Whether a completed frame is waiting to be read
    pub fn frame_pending(&self) -> bool {
        self.frame_ready
    }

    /// Feed a run of demodulated samples.
    ///
    /// The result does not depend on how the stream is split into calls.
    pub fn input(&mut self, samples: &[f32]) {
        for &value in samples {
            match self.phase {
                Phase::Skipping(remaining) => {
                    self.phase = if remaining > 1 {
                        Phase::Skipping(remaining - 1)
                    } else {
                        Phase::Writing
                    };
                    self.stats.samples_skipped += 1;
                }
                Phase::Writing => self.write_sample(value),
            }
        }
    }

    /// Ask for something to display.
    ///
    /// Live view always offers the raw raster. Otherwise a completed frame is
    /// offered once; later calls return `NoFrameYet` until the next frame
    /// completes.
    pub fn poll_frame(&mut self) -> FrameAttempt<'_> {
        if self.params.live_view {
            return FrameAttempt::Live(&self.raster);
        }
        if !self.frame_ready {
            return FrameAttempt::NoFrameYet;
        }
        self.frame_ready = false;
        FrameAttempt::FrameReady(&self.aligned)
    }

    /// Copy the current displayable frame into `rgba`.
    ///
    /// Returns `false` and leaves `rgba` untouched when there is nothing new.
    /// `rgba` must hold exactly `width * height * 4` bytes.
    pub fn draw(&mut self, rgba: &mut [u8]) -> bool {
        let expected = self.geometry.rgba_len();
        if rgba.len() != expected {
            warn!(
                "draw buffer is {} bytes, expected {} ({}x{} RGBA)",
                rgba.len(),
                expected,
                self.geometry.width(),
                self.geometry.height()
            );
            return false;
        }

        match self.poll_frame().pixels() {
            Some(pixels) => {
                rgba.copy_from_slice(pixels);
                true
            }
            None => false,
        }
    }

    fn write_sample(&mut self, value: f32) {
        let width = self.geometry.width();
        let pos = (self.y * width + self.x) * BYTES_PER_PIXEL;

        let level = intensity(value, &self.params);
        let pixel = if value < self.params.sync_level {
            self.column_hits[self.x] = self.column_hits[self.x].saturating_add(1);
            self.row_hits[self.y] = self.row_hits[self.y].saturating_add(1);
            self.stats.sync_hits += 1;

            if self.params.live_view {
                SYNC_MARKER
            } else {
                [level, level, level, 255]
            }
        } else {
            [level, level, level, 255]
        };
        self.raster[pos..pos + BYTES_PER_PIXEL].copy_from_slice(&pixel);
        self.stats.samples_processed += 1;

        self.x += 1;
        if self.x >= width {
            self.x = 0;
            self.y += 1;
        }
        if self.y >= self.geometry.height() {
            self.x = 0;
            self.y = 0;
            self.complete_frame();
        }
    }

    fn complete_frame(&mut self) {
        let x = argmax(&self.column_hits);
        let y = argmax(&self.row_hits);
        self.column_hits.fill(0);
        self.row_hits.fill(0);

        let linear = x + y * self.geometry.width();
        let skip_scheduled = self.params.auto_sync && y > AUTO_SYNC_MIN_ROWS;
        if skip_scheduled {
            self.phase = Phase::Skipping(linear);
            self.stats.skips_scheduled += 1;
            debug!("Auto sync: skipping {} samples (x={}, y={})", linear, x, y);
        }

        // Rotate left by `linear` pixels: the sync pulse lands at the origin
        let split = linear * BYTES_PER_PIXEL;
        let tail = self.raster.len() - split;
        self.aligned[..tail].copy_from_slice(&self.raster[split..]);
        self.aligned[tail..].copy_from_slice(&self.raster[..split]);

        if self.frame_ready {
            trace!("Unread frame overwritten");
        }
        self.frame_ready = true;

        let offset = SyncOffset {
            x,
            y,
            linear,
            skip_scheduled,
        };
        self.stats.frames_completed += 1;
        self.stats.last_offset = Some(offset);
        trace!(
            "Frame {} complete: sync at x={} y={}",
            self.stats.frames_completed,
            x,
            y
        );
    }
}

/// Map an amplitude onto 0..=255. NaN maps to 0.
fn intensity(value: f32, params: &DecoderParams) -> u8 {
    let scaled = (value - params.black_level) * 255.0 / params.span;
    // Float-to-int `as` truncates and sends NaN to 0
    scaled.clamp(0.0, 255.0) as u8
}

/// Index of the largest count; the lowest index wins ties
fn argmax(hits: &[u32]) -> usize {
    hits.iter()
        .enumerate()
        .fold((0, 0), |(best_idx, best), (idx, &count)| {
            if count > best {
                (idx, count)
            } else {
                (best_idx, best)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRIGHT: f32 = 200.0;
    const SYNC: f32 = -1.0;

    fn test_params(live_view: bool, auto_sync: bool) -> DecoderParams {
        DecoderParams {
            sync_level: 0.0,
            black_level: 0.0,
            span: 255.0,
            live_view,
            auto_sync,
        }
    }

    fn decoder(width: usize, height: usize, live_view: bool, auto_sync: bool) -> FrameDecoder {
        FrameDecoder::new(
            Geometry::new(width, height).unwrap(),
            test_params(live_view, auto_sync),
        )
    }

    /// Frame with every pixel bright except the listed (x, y) sync positions
    fn frame_with_sync(width: usize, height: usize, sync: &[(usize, usize)]) -> Vec<f32> {
        let mut samples = vec![BRIGHT; width * height];
        for &(x, y) in sync {
            samples[y * width + x] = SYNC;
        }
        samples
    }

    /// Drifting test pattern: a sync column and a sync row, shifted by `phase`
    fn drifting_signal(width: usize, height: usize, frames: usize, phase: usize) -> Vec<f32> {
        (0..width * height * frames)
            .map(|i| {
                let pos = i + phase;
                let col = pos % width;
                let row = (pos / width) % height;
                if col == 3 || row == 15 {
                    SYNC
                } else {
                    ((col * 7 + row * 3) % 50) as f32 * 5.0
                }
            })
            .collect()
    }

    fn pixel(buf: &[u8], index: usize) -> [u8; 4] {
        let pos = index * BYTES_PER_PIXEL;
        [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]
    }

    #[test]
    fn test_intensity_mapping() {
        let params = test_params(false, false);
        assert_eq!(intensity(-10.0, &params), 0);
        assert_eq!(intensity(0.0, &params), 0);
        assert_eq!(intensity(100.0, &params), 100);
        assert_eq!(intensity(100.7, &params), 100);
        assert_eq!(intensity(255.0, &params), 255);
        assert_eq!(intensity(1000.0, &params), 255);
        assert_eq!(intensity(f32::NAN, &params), 0);
        assert_eq!(intensity(f32::INFINITY, &params), 255);
        assert_eq!(intensity(f32::NEG_INFINITY, &params), 0);
    }

    #[test]
    fn test_intensity_black_level_and_span() {
        let params = DecoderParams {
            black_level: -0.5,
            span: 1.0,
            ..test_params(false, false)
        };
        assert_eq!(intensity(-0.5, &params), 0);
        assert_eq!(intensity(0.5, &params), 255);
        assert_eq!(intensity(0.0, &params), 127);
    }

    #[test]
    fn test_non_finite_samples_with_zero_span() {
        let samples = [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 0.5];
        let params = |live_view| DecoderParams {
            span: 0.0,
            ..test_params(live_view, false)
        };
        let geometry = Geometry::new(2, 2).unwrap();

        let mut live = FrameDecoder::new(geometry, params(true));
        live.input(&samples);
        assert_eq!(pixel(live.raster(), 0), [0, 0, 0, 255]);
        assert_eq!(pixel(live.raster(), 1), [255, 255, 255, 255]);
        assert_eq!(pixel(live.raster(), 2), SYNC_MARKER);
        assert_eq!(pixel(live.raster(), 3), [255, 255, 255, 255]);
        // NaN is never below the sync level; -inf is
        assert_eq!(live.stats().sync_hits, 1);
        assert_eq!(live.stats().frames_completed, 1);

        let offset = live.stats().last_offset.unwrap();
        assert_eq!((offset.x, offset.y, offset.linear), (0, 1, 2));

        let mut out = vec![0u8; 16];
        assert!(live.draw(&mut out));
        assert_eq!(out, live.raster());

        let mut aligned = FrameDecoder::new(geometry, params(false));
        aligned.input(&samples);
        assert_eq!(aligned.stats().sync_hits, 1);
        assert!(aligned.draw(&mut out));
        assert_eq!(pixel(&out, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(&out, 1), [255, 255, 255, 255]);
        assert_eq!(pixel(&out, 2), [0, 0, 0, 255]);
        assert_eq!(pixel(&out, 3), [255, 255, 255, 255]);
    }

    #[test]
    fn test_gray_pixel_written() {
        let mut dec = decoder(4, 4, false, false);
        dec.input(&[42.0]);
        assert_eq!(pixel(dec.raster(), 0), [42, 42, 42, 255]);
    }

    #[test]
    fn test_sync_marking_live_view() {
        let mut live = decoder(4, 4, true, false);
        live.input(&[-0.5, 10.0, -0.0001]);
        assert_eq!(pixel(live.raster(), 0), SYNC_MARKER);
        assert_eq!(pixel(live.raster(), 1), [10, 10, 10, 255]);
        assert_eq!(pixel(live.raster(), 2), SYNC_MARKER);

        let mut aligned = decoder(4, 4, false, false);
        aligned.input(&[-0.5]);
        assert_eq!(pixel(aligned.raster(), 0), [0, 0, 0, 255]);

        // Hits are counted in both modes
        assert_eq!(live.column_hits[0], 1);
        assert_eq!(aligned.column_hits[0], 1);
        assert_eq!(aligned.row_hits[0], 1);
    }

    #[test]
    fn test_sync_level_is_strict() {
        let mut dec = decoder(4, 4, true, false);
        dec.input(&[0.0]);
        assert_eq!(pixel(dec.raster(), 0), [0, 0, 0, 255]);
        assert_eq!(dec.stats().sync_hits, 0);
    }

    #[test]
    fn test_frame_cadence_without_sync() {
        let mut dec = decoder(8, 6, false, true);
        dec.input(&vec![BRIGHT; 8 * 6 - 1]);
        assert_eq!(dec.stats().frames_completed, 0);
        assert!(!dec.frame_pending());

        dec.input(&[BRIGHT]);
        assert_eq!(dec.stats().frames_completed, 1);
        assert_eq!(dec.stats().last_offset, Some(SyncOffset::default()));
        assert_eq!((dec.x, dec.y), (0, 0));
        assert!(dec.frame_pending());
        assert_eq!(dec.phase, Phase::Writing);
    }

    #[test]
    fn test_histograms_cleared_at_frame_boundary() {
        let mut dec = decoder(8, 6, false, false);
        dec.input(&frame_with_sync(8, 6, &[(2, 3), (5, 1)]));
        assert!(dec.column_hits.iter().all(|&c| c == 0));
        assert!(dec.row_hits.iter().all(|&c| c == 0));

        // Next frame starts counting from zero
        dec.input(&[SYNC]);
        assert_eq!(dec.column_hits[0], 1);
        assert_eq!(dec.column_hits.iter().sum::<u32>(), 1);
    }

    #[test]
    fn test_argmax_lowest_index_wins() {
        assert_eq!(argmax(&[0, 0, 0]), 0);
        assert_eq!(argmax(&[1, 3, 3, 2]), 1);
        assert_eq!(argmax(&[0, 0, 5]), 2);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_rotation_by_sync_offset() {
        let (w, h) = (4, 3);
        let mut dec = decoder(w, h, false, false);
        let mut samples: Vec<f32> = (0..w * h).map(|i| (i * 10 + 5) as f32).collect();
        samples[2 * w + 1] = SYNC;
        dec.input(&samples);

        let offset = dec.stats().last_offset.unwrap();
        assert_eq!((offset.x, offset.y, offset.linear), (1, 2, 9));
        assert!(!offset.skip_scheduled);

        let raster = dec.raster().to_vec();
        let mut expected = raster.clone();
        expected.rotate_left(9 * BYTES_PER_PIXEL);

        let mut out = vec![0u8; w * h * 4];
        assert!(dec.draw(&mut out));
        assert_eq!(out, expected);
        assert_eq!(pixel(&out, 0), pixel(&raster, 9));
        assert_eq!(pixel(&out, w * h - 9), pixel(&raster, 0));
    }

    #[test]
    fn test_rotation_by_zero_is_identity() {
        let mut dec = decoder(5, 4, false, false);
        let samples: Vec<f32> = (0..20).map(|i| (i * 12) as f32).collect();
        dec.input(&samples);

        let raster = dec.raster().to_vec();
        match dec.poll_frame() {
            FrameAttempt::FrameReady(frame) => assert_eq!(frame, &raster[..]),
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_auto_sync_threshold_not_exceeded() {
        let (w, h) = (16, 16);
        let mut dec = decoder(w, h, false, true);
        let sync_row: Vec<_> = (0..w).map(|x| (x, 10)).collect();
        dec.input(&frame_with_sync(w, h, &sync_row));

        let offset = dec.stats().last_offset.unwrap();
        assert_eq!((offset.x, offset.y, offset.linear), (0, 10, 160));
        assert!(!offset.skip_scheduled);
        assert_eq!(dec.phase, Phase::Writing);
        assert_eq!(dec.stats().skips_scheduled, 0);
    }

    #[test]
    fn test_auto_sync_threshold_exceeded() {
        let (w, h) = (16, 16);
        let mut dec = decoder(w, h, false, true);
        let sync_row: Vec<_> = (0..w).map(|x| (x, 11)).collect();
        dec.input(&frame_with_sync(w, h, &sync_row));

        let offset = dec.stats().last_offset.unwrap();
        assert_eq!((offset.y, offset.linear), (11, 176));
        assert!(offset.skip_scheduled);
        assert_eq!(dec.phase, Phase::Skipping(176));

        // The skip spans calls and writes nothing
        dec.input(&vec![SYNC; 100]);
        dec.input(&vec![SYNC; 76]);
        assert_eq!(dec.stats().samples_skipped, 176);
        assert_eq!((dec.x, dec.y), (0, 0));
        assert_eq!(dec.stats().sync_hits, w as u64);
        assert_eq!(dec.phase, Phase::Writing);

        dec.input(&[7.0]);
        assert_eq!(pixel(dec.raster(), 0), [7, 7, 7, 255]);
        assert_eq!(dec.x, 1);
    }

    #[test]
    fn test_no_skip_without_auto_sync() {
        let (w, h) = (16, 16);
        let mut dec = decoder(w, h, false, false);
        let sync_row: Vec<_> = (0..w).map(|x| (x, 14)).collect();
        dec.input(&frame_with_sync(w, h, &sync_row));

        assert!(!dec.stats().last_offset.unwrap().skip_scheduled);
        assert_eq!(dec.phase, Phase::Writing);
        // Rotation still follows the detected offset
        let raster = dec.raster().to_vec();
        let mut out = vec![0u8; w * h * 4];
        assert!(dec.draw(&mut out));
        assert_eq!(pixel(&out, 0), pixel(&raster, 14 * w));
    }

    #[test]
    fn test_auto_sync_skips_to_sync_pulse() {
        let (w, h) = (32, 24);
        let frame = w * h;
        let signal = drifting_signal(w, h, 3, 5);
        let mut dec = decoder(w, h, false, true);
        dec.input(&signal[..frame]);

        // Sync column lands on raster column 30, sync row on raster row 15
        let offset = dec.stats().last_offset.unwrap();
        assert_eq!((offset.x, offset.y, offset.linear), (30, 15, 510));
        assert!(offset.skip_scheduled);

        let raster = dec.raster().to_vec();
        let mut out = vec![0u8; frame * 4];
        assert!(dec.draw(&mut out));
        assert_eq!(pixel(&out, 0), pixel(&raster, 510));

        // The next written sample is the one right after the skipped run
        dec.input(&signal[frame..frame + 511]);
        assert_eq!(dec.stats().samples_skipped, 510);
        assert_eq!((dec.x, dec.y), (1, 0));
        assert_eq!(signal[frame + 510], SYNC);
        assert_eq!(dec.column_hits[0], 1);
        assert_eq!(dec.row_hits[0], 1);
    }

    #[test]
    fn test_chunking_invariance() {
        let (w, h) = (32, 24);
        let signal = drifting_signal(w, h, 5, 11 + 17 * w);

        let mut whole = decoder(w, h, false, true);
        whole.input(&signal);

        // Sample by sample, collecting every completed frame
        let mut single = decoder(w, h, false, true);
        let mut single_frames = Vec::new();
        for sample in &signal {
            single.input(std::slice::from_ref(sample));
            if let FrameAttempt::FrameReady(frame) = single.poll_frame() {
                single_frames.push(frame.to_vec());
            }
        }

        // Uneven chunks, each shorter than a frame
        let mut chunked = decoder(w, h, false, true);
        let mut chunked_frames = Vec::new();
        let sizes = [1, 7, 13, 64, 3, 250, 31];
        let mut rest = &signal[..];
        for size in sizes.iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let (chunk, tail) = rest.split_at((*size).min(rest.len()));
            chunked.input(chunk);
            if let FrameAttempt::FrameReady(frame) = chunked.poll_frame() {
                chunked_frames.push(frame.to_vec());
            }
            rest = tail;
        }

        assert!(whole.stats().skips_scheduled > 0);
        assert_eq!(single_frames.len() as u64, whole.stats().frames_completed);
        assert_eq!(single_frames, chunked_frames);

        for dec in [&single, &chunked] {
            assert_eq!(dec.raster(), whole.raster());
            assert_eq!(dec.column_hits, whole.column_hits);
            assert_eq!(dec.row_hits, whole.row_hits);
            assert_eq!(dec.phase, whole.phase);
            assert_eq!(dec.stats(), whole.stats());
        }

        let last = single_frames.last().unwrap();
        match whole.poll_frame() {
            FrameAttempt::FrameReady(frame) => assert_eq!(frame, &last[..]),
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_single_slot_overwrite() {
        let (w, h) = (4, 4);
        let mut dec = decoder(w, h, false, false);
        dec.input(&vec![10.0; w * h]);
        dec.input(&vec![20.0; w * h]);
        assert_eq!(dec.stats().frames_completed, 2);

        let mut out = vec![0u8; w * h * 4];
        assert!(dec.draw(&mut out));
        assert!(out.chunks(4).all(|px| px == [20, 20, 20, 255]));

        // Only one frame was retained
        let mut again = vec![9u8; w * h * 4];
        assert!(!dec.draw(&mut again));
        assert!(again.iter().all(|&b| b == 9));
        assert_eq!(dec.poll_frame(), FrameAttempt::NoFrameYet);
    }

    #[test]
    fn test_live_and_aligned_views_diverge() {
        let (w, h) = (6, 5);
        let samples: Vec<f32> = (0..w * h * 2).map(|i| (i % 97) as f32).collect();

        let mut live = decoder(w, h, true, false);
        let mut aligned = decoder(w, h, false, false);
        live.input(&samples);
        aligned.input(&samples);

        assert_eq!(live.raster(), aligned.raster());
        assert_eq!(live.stats(), aligned.stats());

        assert!(matches!(live.poll_frame(), FrameAttempt::Live(_)));
        assert!(matches!(live.poll_frame(), FrameAttempt::Live(_)));
        assert!(matches!(aligned.poll_frame(), FrameAttempt::FrameReady(_)));
        assert_eq!(aligned.poll_frame(), FrameAttempt::NoFrameYet);
    }

    #[test]
    fn test_live_view_draw_always_succeeds() {
        let mut dec = decoder(4, 4, true, false);
        let mut out = vec![0u8; 64];
        assert!(dec.draw(&mut out));
        dec.input(&[SYNC, 50.0]);
        assert!(dec.draw(&mut out));
        assert_eq!(pixel(&out, 0), SYNC_MARKER);
        assert_eq!(pixel(&out, 1), [50, 50, 50, 255]);
    }

    #[test]
    fn test_draw_rejects_wrong_size_buffer() {
        let mut dec = decoder(4, 4, false, false);
        dec.input(&vec![BRIGHT; 16]);

        let mut small = vec![0u8; 16];
        assert!(!dec.draw(&mut small));
        assert!(dec.frame_pending());

        let mut out = vec![0u8; 64];
        assert!(dec.draw(&mut out));
        assert!(!dec.frame_pending());
    }

    #[test]
    fn test_set_parameters_applies_to_next_sample() {
        let mut dec = decoder(4, 4, false, false);
        dec.input(&[SYNC]);
        dec.set_parameters(test_params(true, false));
        dec.input(&[SYNC]);

        assert_eq!(pixel(dec.raster(), 0), [0, 0, 0, 255]);
        assert_eq!(pixel(dec.raster(), 1), SYNC_MARKER);
        assert!(dec.params().live_view);
    }
}
