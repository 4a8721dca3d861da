//! One-pole low-pass filter plus linear-interpolation resampler, used to
//! bring the OPL3 chip's native generation rate down to the output device
//! rate. The chip is cheapest to run at its own clock-derived rate; this
//! module is the only place that rate conversion happens.

/// Converts a stream sampled at `in_rate_hz` to one at `out_rate_hz` by
/// one-pole low-pass filtering followed by linear interpolation.
///
/// `step` is re-entrant: it asks its caller for exactly as many upstream
/// samples as are needed to produce the next output sample, never more.
/// This lets the OPL driver generate native-rate samples lazily, a few at
/// a time, instead of sizing a worst-case buffer up front.
#[derive(Debug, Clone, Copy)]
pub struct LpfResampler {
    lpf: f32,
    inc: f64,
    mu: f64,
    prev: f32,
    next: f32,
}

impl LpfResampler {
    pub fn new(cutoff_hz: f32, in_rate_hz: f64, out_rate_hz: f64) -> Self {
        let lpf = 1.0 - (-2.0 * std::f32::consts::PI * cutoff_hz / in_rate_hz as f32).exp();
        LpfResampler {
            lpf,
            inc: in_rate_hz / out_rate_hz,
            mu: 1.0,
            prev: 0.0,
            next: 0.0,
        }
    }

    /// Produce one output sample. `pull_input` is called once per upstream
    /// sample consumed (zero or more times per call to `step`), and must
    /// return the next native-rate sample scaled to the desired volume.
    pub fn step<F: FnMut() -> i32>(&mut self, volume: f32, mut pull_input: F) -> i16 {
        while self.mu >= 1.0 {
            self.prev = self.next;
            let sample = pull_input() as f32 * volume;
            self.next += (sample - self.next) * self.lpf;
            self.mu -= 1.0;
        }
        let y = self.prev + (self.next - self.prev) * self.mu as f32;
        self.mu += self.inc;
        y.clamp(i16::MIN as f32, i16::MAX as f32) as i16
    }

    pub fn reset(&mut self) {
        self.mu = 1.0;
        self.prev = 0.0;
        self.next = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_silence_out() {
        let mut r = LpfResampler::new(16_000.0, 49_716.0, 44_100.0);
        for _ in 0..256 {
            assert_eq!(r.step(1.0, || 0), 0);
        }
    }

    #[test]
    fn dc_converges_under_volume_scaling() {
        let mut r = LpfResampler::new(16_000.0, 49_716.0, 44_100.0);
        let mut last = 0i16;
        for _ in 0..5_000 {
            last = r.step(0.5, || 20_000);
        }
        assert!((last as i32 - 10_000).abs() < 200, "settled at {last}");
    }

    #[test]
    fn downsampling_pulls_fewer_inputs_than_a_1to1_rate() {
        let mut r = LpfResampler::new(16_000.0, 49_716.0, 44_100.0);
        let mut pulls = 0;
        for _ in 0..4_410 {
            r.step(1.0, || {
                pulls += 1;
                0
            });
        }
        // inc = 49716/44100 ~= 1.127, so ~4410 outputs need ~4969 inputs,
        // comfortably more than 1:1 but nowhere near double.
        assert!(pulls > 4_410 && pulls < 2 * 4_410, "pulled {pulls} inputs");
    }
}
