//! Lookup tables for the MUS/OPL synthesis path: note-to-hardware-frequency
//! encoding and the logarithmic volume-to-attenuation curve.

use std::sync::OnceLock;

/// OPL3's internal sample-generation clock. Used to convert a note's
/// frequency into the chip's 10-bit fnum / 3-bit block register encoding.
pub const OPL_CLOCK_HZ: f64 = 49_716.0 * 72.0;

/// Encodes a MIDI note number (with fractional part, for pitch-bend
/// interpolation) into OPL's `(block, fnum)` register pair. `block` is
/// chosen as the smallest value for which `fnum` still fits in 10 bits,
/// which maximizes frequency resolution and leaves headroom on both sides
/// for subsequent pitch-bend adjustment.
pub fn note_to_block_fnum(note_number: f64) -> (u8, u16) {
    let freq = 440.0 * 2f64.powf((note_number - 69.0) / 12.0);
    for block in 0..=7u8 {
        let fnum = (freq * (1u32 << (20 - block)) as f64 / OPL_CLOCK_HZ).round();
        if fnum <= 1023.0 {
            return (block, fnum.max(0.0) as u16);
        }
    }
    (7, 1023)
}

/// Packs `(block, fnum)` into the 10+3 bit word OPL expects in registers
/// 0xA0-0xB8 (fnum low 8 bits in 0xA_, block + fnum high 2 bits + key-on
/// in 0xB_). Key-on is not set here; callers OR in bit 5 separately.
pub fn pack_block_fnum(block: u8, fnum: u16) -> u16 {
    ((block as u16) << 10) | (fnum & 0x3FF)
}

/// A 256-entry table of packed `(block, fnum)` words for note numbers
/// 0..255 (as whole units — fractional bend interpolates between adjacent
/// entries at the call site). Entries beyond the playable MIDI range
/// (0..127) degenerate to the same bounds as `note_to_block_fnum` itself;
/// there is no artificial "unplayable" hole because the formula is valid
/// across the whole domain.
fn build_note_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    for (note, slot) in table.iter_mut().enumerate() {
        let (block, fnum) = note_to_block_fnum(note as f64);
        *slot = pack_block_fnum(block, fnum);
    }
    table
}

pub fn note_table() -> &'static [u16; 256] {
    static TABLE: OnceLock<[u16; 256]> = OnceLock::new();
    TABLE.get_or_init(build_note_table)
}

/// `att_log_square[v]` converts a linear 0..127 volume into a 0..63 OPL
/// attenuation level, using the DMX-derived logarithmic curve (`-20 *
/// log10(v/127)`, quantized to OPL's ~0.75 dB attenuation steps). Volume 0
/// maps to full attenuation (63); volume 127 maps to no attenuation (0).
///
/// A second curve (`att_log_cube`, a cubic rather than square-law taper)
/// exists in some derivatives of this driver but is never selected by the
/// production playback path — only `att_log_square` is implemented here.
fn build_att_log_square() -> [u8; 128] {
    let mut table = [0u8; 128];
    for (v, slot) in table.iter_mut().enumerate() {
        *slot = if v == 0 {
            63
        } else {
            let db = -20.0 * (v as f64 / 127.0).log10();
            (db / 0.75).round().clamp(0.0, 63.0) as u8
        };
    }
    table
}

pub fn att_log_square() -> &'static [u8; 128] {
    static TABLE: OnceLock<[u8; 128]> = OnceLock::new();
    TABLE.get_or_init(build_att_log_square)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_volume_has_no_attenuation() {
        assert_eq!(att_log_square()[127], 0);
    }

    #[test]
    fn zero_volume_is_fully_attenuated() {
        assert_eq!(att_log_square()[0], 63);
    }

    #[test]
    fn attenuation_curve_is_monotonic_non_increasing_with_volume() {
        let table = att_log_square();
        for w in table.windows(2) {
            assert!(w[0] >= w[1], "attenuation must decrease as volume rises");
        }
    }

    #[test]
    fn block_fnum_stays_in_register_bounds() {
        for note in 0..128 {
            let (block, fnum) = note_to_block_fnum(note as f64);
            assert!(block <= 7);
            assert!(fnum <= 1023);
        }
    }

    #[test]
    fn higher_notes_need_no_lower_block_than_lower_notes() {
        // within the same octave span, frequency increases monotonically
        // with note number, so block should never decrease sharply in a
        // way that makes fnum jump backwards across an octave boundary.
        let (_, fnum_a) = note_to_block_fnum(60.0);
        let (_, fnum_b) = note_to_block_fnum(61.0);
        assert!(fnum_b >= fnum_a || fnum_b < 200, "unexpected octave wraparound");
    }
}
