//! Maps the 16 logical MUS channels onto the OPL3 chip's 18 physical FM
//! voices: instrument register loading, key-on/key-off, pitch bending, and
//! the priority rule that decides which hardware voice a new note steals
//! when every voice is already busy.

use crate::mus::op2bank::{Instrument, InstrumentBank, OpVoice};
use crate::mus::tables::{note_table, pack_block_fnum};

pub const NUM_VOICES: usize = 18;
/// Voices 0..8 live in OPL3 register bank one, 9..17 in bank two (offset
/// by 0x100 in the register address space).
pub const BANK_TWO_START: usize = 9;

/// First-operator and second-operator OPL register offsets for each of
/// the 9 FM voice slots within one register bank.
const CHAN_OPER1: [u16; 9] = [0, 1, 2, 8, 9, 10, 16, 17, 18];
const CHAN_OPER2: [u16; 9] = [3, 4, 5, 11, 12, 13, 19, 20, 21];

pub mod reg {
    pub const CHAR: u16 = 0x20;
    pub const LEVEL: u16 = 0x40;
    pub const ATTACK_DECAY: u16 = 0x60;
    pub const SUSTAIN_RELEASE: u16 = 0x80;
    pub const FNUM_LOW: u16 = 0xA0;
    pub const KEY_ON_BLOCK: u16 = 0xB0;
    pub const FEEDBACK_CONN: u16 = 0xC0;
    pub const WAVE_SELECT: u16 = 0xE0;
    pub const KEY_ON_BIT: u8 = 0x20;
}

/// Something that accepts raw OPL register writes. Implemented by the
/// chip driver; kept as a trait here so the allocator can be exercised in
/// tests without a real chip.
pub trait RegisterSink {
    fn write_reg(&mut self, reg: u16, value: u8);
}

#[derive(Debug, Clone, Copy)]
pub struct HwVoice {
    pub seq: u64,
    /// Set when a release (key-off with fade) is scheduled; currently
    /// recorded for structural parity with the source driver but never
    /// consulted by `choose_hw_voice` — see the crate's design notes.
    pub release_deadline: u64,
    pub note_id: Option<i16>,
    pub note_attenuation: i8,
    pub hw_cmd: u16,
    pub playing_note: u8,
    pub mus_channel: Option<u8>,
    /// `(instrument index, is second/double voice)` currently loaded.
    pub ins_sel: Option<(u8, bool)>,
    pub ksl1: u8,
    pub ksl2: u8,
    pub lvl1: u8,
    pub lvl2: u8,
    pub feedback: u8,
    pub fine_tune: i8,
}

impl Default for HwVoice {
    fn default() -> Self {
        HwVoice {
            seq: 0,
            release_deadline: 0,
            note_id: None,
            note_attenuation: 0,
            hw_cmd: 0,
            playing_note: 0,
            mus_channel: None,
            ins_sel: None,
            ksl1: 0,
            ksl2: 0,
            lvl1: 0,
            lvl2: 0,
            feedback: 0,
            fine_tune: 0,
        }
    }
}

fn op_regs(voice_index: usize) -> (u16, u16) {
    let bank_offset = if voice_index >= BANK_TWO_START { 0x100 } else { 0 };
    let slot = voice_index % BANK_TWO_START;
    (bank_offset + CHAN_OPER1[slot], bank_offset + CHAN_OPER2[slot])
}

fn voice_reg_base(voice_index: usize) -> u16 {
    let bank_offset = if voice_index >= BANK_TWO_START { 0x100 } else { 0 };
    bank_offset + (voice_index % BANK_TWO_START) as u16
}

/// Number of ticks after key-off before a voice's release is considered
/// complete. Recorded into `HwVoice::release_deadline` but never consulted
/// by `choose_hw_voice` — see the crate's design notes.
const RELEASE_TICKS: u64 = 4;

/// Silences a hardware voice's key-on bit without touching its instrument
/// configuration, using the last `hw_cmd` written (so block/fnum survive).
/// `mus_time` is the player's current tick count, stamped into
/// `release_deadline` for structural parity with the source driver.
pub fn key_off_hw(sink: &mut impl RegisterSink, voice: &mut HwVoice, voice_index: usize, mus_time: u64) {
    let base = voice_reg_base(voice_index);
    let cmd = voice.hw_cmd & !(reg::KEY_ON_BIT as u16);
    sink.write_reg(reg::KEY_ON_BLOCK + base, cmd as u8);
    voice.hw_cmd = cmd;
    voice.note_id = None;
    voice.mus_channel = None;
    voice.release_deadline = mus_time + RELEASE_TICKS;
}

/// Mutes both operators of a voice entirely (used when tearing down
/// playback), in addition to key-off.
pub fn silence_hw(sink: &mut impl RegisterSink, voice: &mut HwVoice, voice_index: usize, mus_time: u64) {
    let (op1, op2) = op_regs(voice_index);
    sink.write_reg(reg::LEVEL + op1, 0x3F);
    sink.write_reg(reg::LEVEL + op2, 0x3F);
    key_off_hw(sink, voice, voice_index, mus_time);
}

/// Writes the full register sequence to load `instrument`'s voice
/// `voice_slot` (0 for the primary voice, 1 for the double-voice second
/// voice) onto hardware voice `voice_index`. Mutes both operators first so
/// no audible glitch occurs while registers are mid-update.
pub fn load_hw_instrument(
    sink: &mut impl RegisterSink,
    voice: &mut HwVoice,
    voice_index: usize,
    ins_index: u8,
    voice_slot: usize,
    instrument: &Instrument,
    pan_bits: i8,
) {
    let (op1, op2) = op_regs(voice_index);
    sink.write_reg(reg::LEVEL + op1, 0x3F);
    sink.write_reg(reg::LEVEL + op2, 0x3F);

    let v: &OpVoice = &instrument.voices[voice_slot];

    sink.write_reg(reg::CHAR + op1, v.mod_char);
    sink.write_reg(reg::ATTACK_DECAY + op1, v.mod_attack);
    sink.write_reg(reg::SUSTAIN_RELEASE + op1, v.mod_sustain);
    sink.write_reg(reg::WAVE_SELECT + op1, v.mod_wave_sel);
    sink.write_reg(reg::LEVEL + op1, (v.mod_scale & 0xC0) | (v.mod_level & 0x3F));

    sink.write_reg(reg::CHAR + op2, v.car_char);
    sink.write_reg(reg::ATTACK_DECAY + op2, v.car_attack);
    sink.write_reg(reg::SUSTAIN_RELEASE + op2, v.car_sustain);
    sink.write_reg(reg::WAVE_SELECT + op2, v.car_wave_sel);
    sink.write_reg(reg::LEVEL + op2, (v.car_scale & 0xC0) | (v.car_level & 0x3F));

    apply_pan(sink, voice_index, pan_bits, v.feedback);

    voice.ksl1 = v.mod_scale & 0xC0;
    voice.ksl2 = v.car_scale & 0xC0;
    voice.lvl1 = v.mod_level & 0x3F;
    voice.lvl2 = v.car_level & 0x3F;
    voice.feedback = v.feedback;
    // Fine-tune only detunes the second voice of a double-voice instrument;
    // the primary voice always plays the instrument's nominal pitch.
    voice.fine_tune = if voice_slot == 1 {
        (instrument.fine_tune as i32 / 2 - 64) as i8
    } else {
        0
    };
    voice.ins_sel = Some((ins_index, voice_slot == 1));
}

/// Writes a voice's OPL3 stereo-enable bits (register 0xC0+voice, bits
/// 4-5) alongside its feedback/connection nibble (bits 0-3), which share
/// the same register.
pub fn apply_pan(sink: &mut impl RegisterSink, voice_index: usize, pan_bits: i8, feedback: u8) {
    let base = voice_reg_base(voice_index);
    let value = (pan_bits as u8) | (feedback & 0x0F);
    sink.write_reg(reg::FEEDBACK_CONN + base, value);
}

/// Converts a MIDI pan value (0..127, 64 = centre) into OPL3 stereo-enable
/// bits, snapping to a hard left/right feed once the pan deviates from
/// centre by more than `pan_threshold::THRESHOLD`, and centre otherwise.
pub fn pan_bits_from_midi(pan: u8) -> i8 {
    use crate::mus::channel::pan_bits;
    let centred = pan as i32 - 64;
    if centred <= -(pan_bits::THRESHOLD as i32) {
        pan_bits::LEFT
    } else if centred >= pan_bits::THRESHOLD as i32 {
        pan_bits::RIGHT
    } else {
        pan_bits::CENTRE
    }
}

/// Centre-panned voices feed both stereo outputs and so sum to a louder
/// perceived level than a hard-panned voice feeding only one; subtracting
/// a small fixed attenuation when centred keeps perceived loudness roughly
/// constant across the pan range.
pub fn pan_attenuation(pan_bits: i8) -> i8 {
    use crate::mus::channel::pan_bits as bits;
    if pan_bits == bits::CENTRE {
        bits::CENTRE_ATTENUATION
    } else {
        0
    }
}

/// Reapplies per-operator output level given main/note/channel/pan
/// attenuation, clamped into the OPL's 0..63 attenuation range. The
/// modulator operator (op1) is only updated when the instrument is in
/// additive (double-carrier) connection mode, matching the hardware's own
/// insensitivity to modulator level in FM mode.
pub fn update_volume(sink: &mut impl RegisterSink, voice: &HwVoice, voice_index: usize, pan_attenuation: i8) {
    let (op1, op2) = op_regs(voice_index);
    let v_att = clamp_attenuation(voice.note_attenuation as i32 + pan_attenuation as i32);
    sink.write_reg(reg::LEVEL + op2, voice.ksl2 | clamp_level(voice.lvl2, v_att));
    if voice.feedback & 1 != 0 {
        sink.write_reg(reg::LEVEL + op1, voice.ksl1 | clamp_level(voice.lvl1, v_att));
    }
}

fn clamp_attenuation(v: i32) -> i32 {
    v.clamp(0, 63)
}

fn clamp_level(base_level: u8, extra_attenuation: i32) -> u8 {
    (base_level as i32 + extra_attenuation).clamp(0, 63) as u8
}

/// Computes the bent block/fnum word for `note` (whole semitones) with an
/// additional fractional `bend` in -128..127 units, 64 units per semitone
/// (so a full -128..127 sweep spans about one whole tone each direction),
/// plus the instrument voice's fine-tune. `fine_tune` is added directly to
/// each looked-up semitone's raw packed block/fnum word, unclipped, before
/// the block/fnum split — matching the source driver's frequency formula,
/// which lets a fine-tune nudge ripple from the fnum field into the block
/// field rather than being scaled as a separate pitch quantity.
/// Interpolates in absolute frequency space (`fnum << block`) rather than
/// raw fnum, since adjacent semitones can land in different OPL octave
/// blocks; re-encodes into the target semitone's own block/scale field and
/// caps the fnum at 1023 (10-bit register width).
pub fn bend_pitch(note: u8, bend: i8, fine_tune: i8) -> u16 {
    let bend_semitones = bend as f64 / 64.0;
    let effective_note = note as f64 + bend_semitones;
    let table = note_table();
    let base = effective_note.floor().clamp(0.0, 255.0) as usize;
    let frac = effective_note - effective_note.floor();

    let tuned_block_fnum = |idx: usize| -> (u32, u32) {
        let raw = (table[idx] as i32 + fine_tune as i32).max(0) as u32;
        ((raw >> 10) & 0x7, raw & 0x3FF)
    };

    let (lo_block, lo_fnum) = tuned_block_fnum(base);
    let (hi_block, hi_fnum) = tuned_block_fnum((base + 1).min(255));

    let lo_freq = (lo_fnum << lo_block) as f64;
    let hi_freq = (hi_fnum << hi_block) as f64;
    let freq = lo_freq + (hi_freq - lo_freq) * frac;

    let target_block = if frac > 0.0 { hi_block } else { lo_block };
    let fnum = (freq / (1u32 << target_block) as f64).round().clamp(0.0, 1023.0) as u16;
    pack_block_fnum(target_block as u8, fnum)
}

/// Writes the frequency + key-on registers for `voice_index`, applying
/// pitch bend inline, and updates the voice's bookkeeping fields.
pub fn key_on(
    sink: &mut impl RegisterSink,
    voice: &mut HwVoice,
    voice_index: usize,
    mus_channel: u8,
    note: u8,
    bend: i8,
    seq: u64,
) {
    let cmd = bend_pitch(note, bend, voice.fine_tune);
    let base = voice_reg_base(voice_index);
    let low = (cmd & 0xFF) as u8;
    let high = ((cmd >> 8) & 0x1F) as u8 | reg::KEY_ON_BIT;

    sink.write_reg(reg::FNUM_LOW + base, low);
    sink.write_reg(reg::KEY_ON_BLOCK + base, high);

    voice.hw_cmd = ((high as u16) << 8) | low as u16;
    voice.seq = seq;
    voice.note_id = Some(note as i16);
    voice.playing_note = note;
    voice.mus_channel = Some(mus_channel);
}

/// Picks which hardware voice should play a new note, in priority order:
///
/// 1. A voice already playing the exact same note on the exact same
///    channel (a repeated note) is key-offed and reused directly.
/// 2. Failing that, the oldest voice that is key-offed (`note_id.is_none()`)
///    and already has the requested instrument loaded — avoids a register
///    reload.
/// 3. Failing that, the oldest key-offed voice of any instrument.
/// 4. Failing that (every voice busy), the note is dropped: this
///    allocator never steals an actively-playing voice.
pub fn choose_hw_voice(
    voices: &[HwVoice; NUM_VOICES],
    mus_channel: u8,
    note: u8,
    ins_index: u8,
    voice_slot: usize,
) -> Option<usize> {
    if let Some(i) = voices.iter().position(|v| {
        v.note_id == Some(note as i16) && v.mus_channel == Some(mus_channel)
    }) {
        return Some(i);
    }

    let matching_free = voices
        .iter()
        .enumerate()
        .filter(|(_, v)| v.note_id.is_none() && v.ins_sel == Some((ins_index, voice_slot == 1)))
        .min_by_key(|(_, v)| v.seq);
    if let Some((i, _)) = matching_free {
        return Some(i);
    }

    voices
        .iter()
        .enumerate()
        .filter(|(_, v)| v.note_id.is_none())
        .min_by_key(|(_, v)| v.seq)
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink(Vec<(u16, u8)>);
    impl RegisterSink for RecordingSink {
        fn write_reg(&mut self, reg: u16, value: u8) {
            self.0.push((reg, value));
        }
    }

    #[test]
    fn chooses_free_voice_over_busy_ones() {
        let mut voices = [HwVoice::default(); NUM_VOICES];
        voices[0].note_id = Some(10);
        voices[0].mus_channel = Some(0);
        let picked = choose_hw_voice(&voices, 1, 20, 5, 0);
        assert_ne!(picked, Some(0));
    }

    #[test]
    fn exact_note_channel_match_is_reused_first() {
        let mut voices = [HwVoice::default(); NUM_VOICES];
        voices[3].note_id = Some(64);
        voices[3].mus_channel = Some(2);
        voices[3].seq = 100;
        let picked = choose_hw_voice(&voices, 2, 64, 7, 0);
        assert_eq!(picked, Some(3));
    }

    #[test]
    fn when_all_voices_busy_the_note_is_dropped_not_stolen() {
        let mut voices = [HwVoice::default(); NUM_VOICES];
        for (i, v) in voices.iter_mut().enumerate() {
            v.note_id = Some(1);
            v.mus_channel = Some(0);
            v.seq = 100 + i as u64;
        }
        let picked = choose_hw_voice(&voices, 9, 50, 3, 0);
        assert_eq!(picked, None, "every voice is active, so the new note has nowhere to go");
    }

    #[test]
    fn prefers_reusing_a_free_voice_with_matching_instrument() {
        let mut voices = [HwVoice::default(); NUM_VOICES];
        voices[1].seq = 5;
        voices[1].ins_sel = Some((9, false));
        voices[2].seq = 1;
        voices[2].ins_sel = Some((2, false));
        let picked = choose_hw_voice(&voices, 0, 40, 9, 0);
        assert_eq!(picked, Some(1), "matching instrument should win over an older mismatch");
    }

    #[test]
    fn bend_pitch_caps_fnum_at_register_width() {
        let cmd = bend_pitch(127, 127, 127);
        assert!(cmd & 0x3FF <= 1023);
    }

    #[test]
    fn one_semitone_down_bend_matches_the_semitone_below() {
        // A decoded bend of -64 (raw pitch_wheel byte 64, re-centred at
        // 128) is exactly one semitone, per the format's own "64 is a
        // half-tone down" convention.
        let bent = bend_pitch(60, -64, 0);
        let unbent_below = bend_pitch(59, 0, 0);
        assert_eq!(bent, unbent_below);
    }

    #[test]
    fn load_instrument_mutes_operators_before_reconfiguring() {
        let mut sink = RecordingSink(Vec::new());
        let mut voice = HwVoice::default();
        let instrument = Instrument {
            flags: crate::mus::op2bank::InstrumentFlags::empty(),
            fine_tune: 128,
            note_num: 0,
            voices: [OpVoice::default(), OpVoice::default()],
        };
        load_hw_instrument(&mut sink, &mut voice, 0, 5, 0, &instrument, crate::mus::channel::pan_bits::CENTRE);
        assert_eq!(sink.0[0], (reg::LEVEL + 0, 0x3F));
        assert_eq!(sink.0[1], (reg::LEVEL + 3, 0x3F));
        assert_eq!(voice.ins_sel, Some((5, false)));
    }

    #[test]
    fn fine_tune_only_applies_to_the_second_double_voice() {
        let mut sink = RecordingSink(Vec::new());
        let instrument = Instrument {
            flags: crate::mus::op2bank::InstrumentFlags::DOUBLE_VOICE,
            fine_tune: 128,
            note_num: 0,
            voices: [OpVoice::default(), OpVoice::default()],
        };

        let mut primary = HwVoice::default();
        load_hw_instrument(&mut sink, &mut primary, 0, 5, 0, &instrument, crate::mus::channel::pan_bits::CENTRE);
        assert_eq!(primary.fine_tune, 0, "primary voice always plays the nominal pitch");

        let mut second = HwVoice::default();
        load_hw_instrument(&mut sink, &mut second, 1, 5, 1, &instrument, crate::mus::channel::pan_bits::CENTRE);
        assert_eq!(second.fine_tune, 0, "fine_tune of 128 (centre) detunes to 0 cents");
    }
}
