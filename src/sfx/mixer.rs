//! Polyphonic PCM sfx mixer: up to `NUM_CHANNELS` voices stepped through
//! cached samples at an arbitrary pitch, panned, summed, and low-passed.

use std::sync::Arc;

use log::warn;

use crate::dsp::BiquadLowPass;
use crate::sfx::cache::{CachedSfx, SfxBank};
use crate::sfx::tables::{pan_volumes, step_table, vol_lookup};

/// Hardware-style voice count; a power of two so a handle's low bits can
/// address a slot directly.
pub const NUM_CHANNELS: usize = 8;
const NUM_CHANNELS_POW2: u32 = NUM_CHANNELS as u32;
const SLOT_MASK: u32 = NUM_CHANNELS_POW2 - 1;

/// Extra fixed-point bits stacked on top of the 16.16 pitch step so a
/// voice's position only needs to be re-bucketed into whole samples every
/// `1 << SFX_STEP_SHIFT` fractional accumulations, not every sample.
const SFX_STEP_SHIFT: u32 = 2;

/// A 32-bit playback handle: a monotonically increasing sequence number in
/// the high bits and a voice-table slot index in the low 3 bits. Returned
/// to callers by `start_sfx`, and required by `stop_sfx`/`update_sfx` to
/// confirm the caller is still talking about the same playback instance
/// and not a since-reused slot.
pub type SfxHandle = u32;

#[derive(Clone)]
struct Voice {
    data: Arc<CachedSfx>,
    sound_id: usize,
    position: i32,
    step: i32,
    step_remainder: u32,
    end: i32,
    left_vol: i32,
    right_vol: i32,
    handle: SfxHandle,
}

pub struct SfxMixer {
    voices: [Option<Voice>; NUM_CHANNELS],
    channel_start_order: [u64; NUM_CHANNELS],
    next_handle: u32,
    alloc_seq: u64,
    biquad_l: BiquadLowPass,
    biquad_r: BiquadLowPass,
}

/// Identifies which playing instances should be pre-empted when a new
/// instance of the same effect starts, matching the original engine's
/// "only one of these at a time" treatment for a handful of looping
/// movement/impact sounds (footsteps, saw idle/full, pistol repeat, etc).
/// The crate does not hard-code sound identities; the caller passes the
/// set of `sound_id`s that should dedup against each other.
pub fn is_single_instance(sound_id: usize, single_instance_ids: &[usize]) -> bool {
    single_instance_ids.contains(&sound_id)
}

impl SfxMixer {
    pub fn new(pcm_cutoff_hz: f32, pcm_q: f32, sample_rate_hz: f32) -> Self {
        SfxMixer {
            voices: Default::default(),
            channel_start_order: [0; NUM_CHANNELS],
            next_handle: 0,
            alloc_seq: 0,
            biquad_l: BiquadLowPass::new(pcm_cutoff_hz, pcm_q, sample_rate_hz),
            biquad_r: BiquadLowPass::new(pcm_cutoff_hz, pcm_q, sample_rate_hz),
        }
    }

    /// Starts a new voice playing `sfx` (looked up from `bank` by
    /// `sound_id`). `volume` is 0..127, `separation` is 1..255 (128 =
    /// centre), `pitch` is a steptable index (0..255, 128 = unshifted).
    /// `single_instance_ids` lists sound ids that should only ever have one
    /// active voice; starting one stops any other active voice with the
    /// same `sound_id` first.
    ///
    /// Returns `None` if `bank` has no usable sample for `sound_id` and no
    /// fallback was registered. Panics if `volume`/`separation` produce an
    /// out-of-range attenuation, matching the original engine's choice to
    /// treat that as a programmer error rather than a recoverable one.
    pub fn start_sfx(
        &mut self,
        bank: &SfxBank,
        sound_id: usize,
        volume: i32,
        separation: i32,
        pitch: u8,
        single_instance_ids: &[usize],
    ) -> Option<SfxHandle> {
        let sfx = bank.get(sound_id)?.clone();

        if is_single_instance(sound_id, single_instance_ids) {
            for voice in self.voices.iter_mut() {
                if voice.as_ref().map(|v| v.sound_id) == Some(sound_id) {
                    *voice = None;
                }
            }
        }

        let slot = self.choose_slot();

        let (left_vol, right_vol) = pan_volumes(volume, separation);
        assert!(
            (0..=127).contains(&left_vol) && (0..=127).contains(&right_vol),
            "sfx volume/separation produced an out-of-range attenuation: left={left_vol} right={right_vol}"
        );

        let step = step_table()[pitch as usize];
        self.alloc_seq += 1;
        self.next_handle = self.next_handle.wrapping_add(NUM_CHANNELS_POW2);
        let handle = self.next_handle | slot as u32;

        self.channel_start_order[slot] = self.alloc_seq;
        self.voices[slot] = Some(Voice {
            data: Arc::new(sfx.clone()),
            sound_id,
            position: 0,
            step,
            step_remainder: 0,
            end: sfx.logical_len as i32,
            left_vol,
            right_vol,
            handle,
        });

        Some(handle)
    }

    /// Picks the voice slot for a new sound: the oldest free slot, or if
    /// none is free, the oldest active slot (matching the original's
    /// "lowest `channelstart`" linear scan).
    fn choose_slot(&self) -> usize {
        if let Some(free) = self.voices.iter().position(|v| v.is_none()) {
            return free;
        }
        (0..NUM_CHANNELS)
            .min_by_key(|&i| self.channel_start_order[i])
            .expect("NUM_CHANNELS is non-zero")
    }

    /// Stops the voice identified by `handle`, if it is still the one
    /// playing in its slot. Stopping a handle whose slot has since been
    /// reused for a newer sound is a silent no-op.
    pub fn stop_sfx(&mut self, handle: SfxHandle) {
        let slot = (handle & SLOT_MASK) as usize;
        if let Some(v) = &self.voices[slot] {
            if v.handle == handle {
                self.voices[slot] = None;
            }
        }
    }

    /// `true` if `handle` still identifies an active voice.
    pub fn is_playing(&self, handle: SfxHandle) -> bool {
        let slot = (handle & SLOT_MASK) as usize;
        self.voices[slot].as_ref().map(|v| v.handle) == Some(handle)
    }

    /// Updates volume/separation for an already-playing voice, without
    /// restarting it. No-op if `handle` is stale.
    pub fn update_sfx(&mut self, handle: SfxHandle, volume: i32, separation: i32) {
        let slot = (handle & SLOT_MASK) as usize;
        if let Some(v) = &mut self.voices[slot] {
            if v.handle == handle {
                let (left_vol, right_vol) = pan_volumes(volume, separation);
                if (0..=127).contains(&left_vol) && (0..=127).contains(&right_vol) {
                    v.left_vol = left_vol;
                    v.right_vol = right_vol;
                } else {
                    warn!("update_sfx: out-of-range attenuation, ignoring update");
                }
            }
        }
    }

    pub fn stop_all(&mut self) {
        for v in self.voices.iter_mut() {
            *v = None;
        }
    }

    /// Mixes `out_frames` stereo i16 frames (interleaved L,R) of sfx on
    /// top of whatever is already in `out` — the music bed is expected to
    /// have been written there first. The biquad is applied to the sfx
    /// sum alone, and the pre-existing (music) content is added back in
    /// afterward, so music never passes through the PCM low-pass. Must
    /// not allocate or block.
    pub fn mix_into(&mut self, out: &mut [i16]) {
        debug_assert_eq!(out.len() % 2, 0);
        let table = vol_lookup();

        for frame in out.chunks_exact_mut(2) {
            let mut dl: i32 = 0;
            let mut dr: i32 = 0;

            for slot in 0..NUM_CHANNELS {
                let finished = if let Some(v) = &mut self.voices[slot] {
                    let sample = v.data.samples[v.position as usize] as i32;
                    dl += table[(v.left_vol * 256 + sample) as usize];
                    dr += table[(v.right_vol * 256 + sample) as usize];

                    v.step_remainder += v.step as u32;
                    v.position += (v.step_remainder >> (16 + SFX_STEP_SHIFT)) as i32;
                    v.step_remainder &= (1 << (16 + SFX_STEP_SHIFT)) - 1;

                    v.position >= v.end
                } else {
                    false
                };
                if finished {
                    self.voices[slot] = None;
                }
            }

            dl = self.biquad_l.step(dl);
            dr = self.biquad_r.step(dr);

            let music_l = frame[0] as i32;
            let music_r = frame[1] as i32;
            frame[0] = (dl + music_l).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            frame[1] = (dr + music_r).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfx::cache::load_sfx;

    fn test_bank(samples: &[u8]) -> SfxBank {
        let mut lump = vec![0u8; 8];
        lump.extend_from_slice(samples);
        let mut bank = SfxBank::new();
        bank.insert("tone", Some(&lump));
        bank
    }

    #[test]
    fn unstarted_mixer_is_silent() {
        let mut mixer = SfxMixer::new(4400.0, 0.6, 44100.0);
        let mut buf = vec![0i16; 64];
        mixer.mix_into(&mut buf);
        assert!(buf.iter().all(|&s| s == 0));
    }

    #[test]
    fn starting_a_voice_returns_a_usable_handle() {
        let bank = test_bank(&[255; 64]);
        let mut mixer = SfxMixer::new(4400.0, 0.6, 44100.0);
        let h = mixer.start_sfx(&bank, 0, 127, 128, 128, &[]).unwrap();
        assert!(mixer.is_playing(h));
        assert_eq!(mixer.active_voice_count(), 1);
    }

    #[test]
    fn stopping_with_a_stale_handle_is_a_noop() {
        let bank = test_bank(&[255; 64]);
        let mut mixer = SfxMixer::new(4400.0, 0.6, 44100.0);
        let h1 = mixer.start_sfx(&bank, 0, 127, 128, 128, &[]).unwrap();
        mixer.stop_sfx(h1);
        assert!(!mixer.is_playing(h1));
        // start a new voice that is very likely to reuse the freed slot
        let h2 = mixer.start_sfx(&bank, 0, 127, 128, 128, &[]).unwrap();
        assert_ne!(h1, h2, "sequence number must differ across allocations");
        mixer.stop_sfx(h1);
        assert!(mixer.is_playing(h2), "stale stop must not affect the new voice");
    }

    #[test]
    fn voice_frees_itself_once_it_reaches_the_end_of_its_sample() {
        let bank = test_bank(&[200; 8]); // one mix-chunk-padded-to worth
        let mut mixer = SfxMixer::new(4400.0, 0.6, 44100.0);
        let h = mixer.start_sfx(&bank, 0, 127, 128, 128, &[]).unwrap();
        let mut buf = vec![0i16; 4096];
        mixer.mix_into(&mut buf);
        assert!(!mixer.is_playing(h));
        assert_eq!(mixer.active_voice_count(), 0);
    }

    #[test]
    fn single_instance_sounds_replace_their_predecessor() {
        let bank = test_bank(&[200; 4096]);
        let mut mixer = SfxMixer::new(4400.0, 0.6, 44100.0);
        let h1 = mixer.start_sfx(&bank, 0, 127, 128, 128, &[0]).unwrap();
        let h2 = mixer.start_sfx(&bank, 0, 127, 128, 128, &[0]).unwrap();
        assert!(!mixer.is_playing(h1));
        assert!(mixer.is_playing(h2));
        assert_eq!(mixer.active_voice_count(), 1);
    }

    #[test]
    #[should_panic]
    fn out_of_range_attenuation_panics() {
        let bank = test_bank(&[200; 64]);
        let mut mixer = SfxMixer::new(4400.0, 0.6, 44100.0);
        // separation=0 is out of the documented 1..255 domain and can
        // produce an attenuation outside [0,127].
        mixer.start_sfx(&bank, 0, 200, 0, 128, &[]);
    }
}
