//! Drives the OPL3 chip emulator and the MUS score player in lockstep:
//! generates native-rate chip audio up to the next 140 Hz tick boundary,
//! ticks the player, and repeats — so a chord struck mid-tick never
//! smears across a generation call that straddled it.

use log::warn;
use opl3_rs::Opl3Chip;

use crate::dsp::LpfResampler;
use crate::mus::{MusPlayer, RegisterSink};

/// OPL3's native internal sample rate.
pub const OPL_CLOCK_HZ: f64 = 49_716.0;
/// MUS ticks run at 140 Hz; this is how many native-rate frames make up
/// one tick.
pub const SAMPLES_PER_TICK: u32 = (OPL_CLOCK_HZ / 140.0) as u32;
/// One spare frame of headroom in the native scratch buffer, matching the
/// reference driver's sizing margin.
const OPL_EXTRA_SAMPLES: usize = 1;
const OPL_CHANNELS: usize = 2;

/// Computes the native-rate scratch buffer size (in frames) needed so
/// that a request for `out_max_frames` output-rate frames can always be
/// serviced without a mid-call reallocation.
pub fn opl_buf_size(out_max_frames: usize, out_sample_rate_hz: f64) -> usize {
    let frames = (out_max_frames as f64 * OPL_CLOCK_HZ / out_sample_rate_hz).ceil() as usize;
    frames + OPL_EXTRA_SAMPLES
}

struct ChipSink<'a>(&'a mut Opl3Chip);
impl RegisterSink for ChipSink<'_> {
    fn write_reg(&mut self, reg: u16, value: u8) {
        self.0.write_register_buffered(reg, value);
    }
}

/// Everything needed to generate native-rate OPL3 audio and tick the MUS
/// player in lockstep. Split out from `OplDriver` so the resampler fields
/// sit in disjoint struct fields from this one: a closure that only
/// touches `source.pull_frame()` borrows just this field under Rust
/// 2021's per-field closure capture, letting `generate_resampled` call
/// `resampler_l.step(..)` and the pull closure in the same expression
/// without the two borrows aliasing.
struct NativeSource {
    chip: Opl3Chip,
    player: MusPlayer,
    native_buf: Vec<i16>,
    native_fill: usize,
    native_read: usize,
    until_tick: u32,
    playing: bool,
}

impl NativeSource {
    /// Generates `num_frames` native-rate stereo frames into the internal
    /// buffer, ticking the player whenever a tick boundary is crossed.
    /// This is the direct analogue of the reference advance loop: it
    /// never generates past `self.until_tick` in one chip call, so ticks
    /// always land on exact sample boundaries.
    fn advance(&mut self, num_frames: usize) {
        self.native_fill = 0;
        self.native_read = 0;
        if self.native_buf.len() < num_frames * OPL_CHANNELS {
            warn!("opl scratch buffer too small for requested frames, truncating");
        }
        let mut remaining = num_frames;
        let mut write_at = 0usize;

        while remaining > 0 {
            let chunk = remaining.min(self.until_tick as usize).max(1);
            let chunk = chunk.min((self.native_buf.len() - write_at) / OPL_CHANNELS).max(1);
            self.generate_native(write_at, chunk);
            write_at += chunk * OPL_CHANNELS;
            remaining -= chunk;
            self.until_tick = self.until_tick.saturating_sub(chunk as u32);

            if self.until_tick == 0 {
                self.until_tick = SAMPLES_PER_TICK;
                if self.playing {
                    let mut sink = ChipSink(&mut self.chip);
                    self.playing = self.player.update(&mut sink, 1);
                }
            }

            if write_at >= self.native_buf.len() {
                break;
            }
        }
        self.native_fill = write_at;
    }

    /// Fills `count` native-rate stereo frames starting at native_buf
    /// offset `at`. `opl3-rs` requires at least 4 samples (2 frames) per
    /// `generate` call; a single requested frame is padded and the extra
    /// discarded.
    fn generate_native(&mut self, at: usize, count: usize) {
        let want = count.max(2);
        let mut scratch = vec![0i16; want * OPL_CHANNELS];
        self.chip.generate(&mut scratch);
        let bytes = count * OPL_CHANNELS;
        self.native_buf[at..at + bytes].copy_from_slice(&scratch[..bytes]);
    }

    /// Pulls one native-rate stereo frame (left, right), generating more
    /// native audio on underflow and advancing the shared cursor exactly
    /// once. Pulling L and R together (instead of as two independent
    /// `pull(ch)` calls) keeps both channels reading the same native
    /// frame even when a resampler's fractional-step loop consumes more
    /// than one input per output sample.
    fn pull_frame(&mut self) -> (i32, i32) {
        if (self.native_read + 1) * OPL_CHANNELS > self.native_fill {
            self.advance(SAMPLES_PER_TICK as usize);
        }
        let idx = self.native_read * OPL_CHANNELS;
        self.native_read += 1;
        let l = *self.native_buf.get(idx).unwrap_or(&0) as i32;
        let r = *self.native_buf.get(idx + 1).unwrap_or(&0) as i32;
        (l, r)
    }
}

pub struct OplDriver {
    source: NativeSource,
    resampler_l: LpfResampler,
    resampler_r: LpfResampler,
    out_sample_rate_hz: f64,
    /// Right-channel samples pulled alongside the left channel's pull
    /// closure, queued so the right resampler's own pull closure can
    /// drain them instead of pulling a fresh (and desynced) frame from
    /// `source`. Reused across calls to avoid allocating per frame.
    right_queue: Vec<i32>,
}

impl OplDriver {
    pub fn new(player: MusPlayer, out_sample_rate_hz: f64, out_max_frames: usize, resampler_cutoff_hz: f32) -> Self {
        let native_cap = opl_buf_size(out_max_frames, out_sample_rate_hz) * OPL_CHANNELS;
        OplDriver {
            source: NativeSource {
                chip: Opl3Chip::new(OPL_CLOCK_HZ as u32),
                player,
                native_buf: vec![0i16; native_cap.max(8)],
                native_fill: 0,
                native_read: 0,
                until_tick: SAMPLES_PER_TICK,
                playing: false,
            },
            resampler_l: LpfResampler::new(resampler_cutoff_hz, OPL_CLOCK_HZ, out_sample_rate_hz),
            resampler_r: LpfResampler::new(resampler_cutoff_hz, OPL_CLOCK_HZ, out_sample_rate_hz),
            out_sample_rate_hz,
            right_queue: Vec::with_capacity(2),
        }
    }

    pub fn start(&mut self, score: Vec<u8>, score_start: usize, loop_enabled: bool) {
        let mut sink = ChipSink(&mut self.source.chip);
        self.source.player.start(&mut sink, score, score_start, loop_enabled);
        self.source.native_fill = 0;
        self.source.native_read = 0;
        self.source.until_tick = SAMPLES_PER_TICK;
        self.resampler_l.reset();
        self.resampler_r.reset();
        self.source.playing = true;
    }

    pub fn stop(&mut self) {
        let mut sink = ChipSink(&mut self.source.chip);
        self.source.player.stop(&mut sink);
        self.source.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.source.playing
    }

    /// Fills `out` (interleaved stereo i16, `out.len()` must be even) at
    /// the configured output sample rate, applying `volume` (0.0..=1.0-ish
    /// scale already folded in by the caller from the music volume
    /// control).
    pub fn generate_resampled(&mut self, out: &mut [i16], volume: f32) {
        debug_assert_eq!(out.len() % 2, 0);
        let OplDriver { source, resampler_l, resampler_r, right_queue, .. } = self;
        for frame in out.chunks_exact_mut(2) {
            right_queue.clear();
            frame[0] = resampler_l.step(volume, || {
                let (l, r) = source.pull_frame();
                right_queue.push(r);
                l
            });
            // The left and right resamplers share the same inc/mu
            // progression (identical cutoff and rates, reset together),
            // so the right resampler always consumes exactly as many
            // inputs as were queued above.
            let mut queued = right_queue.iter().copied();
            frame[1] = resampler_r.step(volume, || queued.next().unwrap_or(0));
        }
    }

    pub fn out_sample_rate_hz(&self) -> f64 {
        self.out_sample_rate_hz
    }
}
