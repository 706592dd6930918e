//! FM quadrature demodulation of interleaved I/Q samples
//!
//! The SATV signal is frequency modulated; the instantaneous frequency of the
//! baseband I/Q stream is the amplitude the frame decoder works on.

use std::f32::consts::PI;

/// Phase-difference FM demodulator
pub struct QuadratureDemod {
    /// Output per radian of phase step
    gain: f32,
    last_phase: f32,
}

impl QuadratureDemod {
    /// `deviation` is the frequency deviation (Hz) that maps to an output of 1.0
    pub fn new(sample_rate: f32, deviation: f32) -> Self {
        Self {
            gain: sample_rate / (2.0 * PI * deviation),
            last_phase: 0.0,
        }
    }

    /// Deviation of half the sample rate: output spans [-1, 1]
    pub fn full_scale(sample_rate: f32) -> Self {
        Self::new(sample_rate, sample_rate / 2.0)
    }

    /// Demodulate interleaved I/Q pairs into `out` (replacing its contents).
    /// Phase is carried across calls, so chunking does not change the output.
    pub fn process(&mut self, iq: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.extend(iq.chunks_exact(2).map(|pair| {
            let phase = pair[1].atan2(pair[0]);
            let step = wrap_phase(phase - self.last_phase);
            self.last_phase = phase;
            step * self.gain
        }));
    }
}

/// Fold a phase difference into [-PI, PI]
fn wrap_phase(diff: f32) -> f32 {
    if diff > PI {
        diff - 2.0 * PI
    } else if diff < -PI {
        diff + 2.0 * PI
    } else {
        diff
    }
}
