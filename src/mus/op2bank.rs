//! Parser for the OP2/GENMIDI instrument bank format: 175 fixed-layout
//! 36-byte instrument records, each describing one or two OPL voices.

use std::fmt;

/// Size in bytes of one packed instrument record.
const INSTRUMENT_RECORD_LEN: usize = 36;
/// Size in bytes of one packed voice record within an instrument.
const VOICE_RECORD_LEN: usize = 16;
pub const NUM_INSTRUMENTS: usize = 175;
/// Index of the first percussion instrument (melodic instruments are 0..=127).
pub const PERCUSSION_BASE: usize = 128;

bitflags::bitflags! {
    /// Instrument-level playback flags (`MUS_instrument.flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstrumentFlags: i16 {
        const FIXED_NOTE = 0x01;
        const DELAYED_VIBRATO = 0x02; // present in the format, never consulted
        const DOUBLE_VOICE = 0x04;
    }
}

/// One OPL voice's register contents (modulator + carrier operator
/// settings, feedback/connection, and a per-voice note offset).
#[derive(Debug, Clone, Copy, Default)]
pub struct OpVoice {
    pub mod_char: u8,
    pub mod_attack: u8,
    pub mod_sustain: u8,
    pub mod_wave_sel: u8,
    pub mod_scale: u8,
    pub mod_level: u8,
    pub feedback: u8,
    pub car_char: u8,
    pub car_attack: u8,
    pub car_sustain: u8,
    pub car_wave_sel: u8,
    pub car_scale: u8,
    pub car_level: u8,
    pub note_offset: i16,
}

impl OpVoice {
    fn parse(bytes: &[u8; VOICE_RECORD_LEN]) -> Self {
        OpVoice {
            mod_char: bytes[0],
            mod_attack: bytes[1],
            mod_sustain: bytes[2],
            mod_wave_sel: bytes[3],
            mod_scale: bytes[4],
            mod_level: bytes[5],
            feedback: bytes[6],
            car_char: bytes[7],
            car_attack: bytes[8],
            car_sustain: bytes[9],
            car_wave_sel: bytes[10],
            car_scale: bytes[11],
            car_level: bytes[12],
            // bytes[13] is the reserved byte
            note_offset: i16::from_le_bytes([bytes[14], bytes[15]]),
        }
    }
}

/// One instrument: up to two voices (the second used only when
/// `DOUBLE_VOICE` is set), a fine-tune byte for the second voice's detune,
/// and the percussion note number when `FIXED_NOTE` is set.
#[derive(Debug, Clone, Copy)]
pub struct Instrument {
    pub flags: InstrumentFlags,
    pub fine_tune: u8,
    pub note_num: u8,
    pub voices: [OpVoice; 2],
}

impl Instrument {
    pub fn is_fixed_note(&self) -> bool {
        self.flags.contains(InstrumentFlags::FIXED_NOTE)
    }

    pub fn is_double_voice(&self) -> bool {
        self.flags.contains(InstrumentFlags::DOUBLE_VOICE)
    }

    fn parse(bytes: &[u8; INSTRUMENT_RECORD_LEN]) -> Self {
        let flags = i16::from_le_bytes([bytes[0], bytes[1]]);
        let mut voice0 = [0u8; VOICE_RECORD_LEN];
        voice0.copy_from_slice(&bytes[4..20]);
        let mut voice1 = [0u8; VOICE_RECORD_LEN];
        voice1.copy_from_slice(&bytes[20..36]);

        Instrument {
            flags: InstrumentFlags::from_bits_truncate(flags),
            fine_tune: bytes[2],
            note_num: bytes[3],
            voices: [OpVoice::parse(&voice0), OpVoice::parse(&voice1)],
        }
    }
}

#[derive(Debug)]
pub struct Op2BankError {
    pub available: usize,
    pub required: usize,
}

impl fmt::Display for Op2BankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OP2 bank data too short: {} bytes available, {} required",
            self.available, self.required
        )
    }
}

impl std::error::Error for Op2BankError {}

/// The full 175-instrument bank, in GENMIDI/OP2 order: instruments 0..127
/// are melodic (indexed by MIDI program number), 128..174 are percussion
/// (indexed by `note - 35`).
#[derive(Clone)]
pub struct InstrumentBank {
    instruments: Vec<Instrument>,
}

impl InstrumentBank {
    /// Parses `data` as the 175*36-byte instrument table. `data` must
    /// already have the 8-byte `"#OPL_II#"` GENMIDI header stripped.
    pub fn parse(data: &[u8]) -> Result<Self, Op2BankError> {
        let required = NUM_INSTRUMENTS * INSTRUMENT_RECORD_LEN;
        if data.len() < required {
            return Err(Op2BankError { available: data.len(), required });
        }
        let mut instruments = Vec::with_capacity(NUM_INSTRUMENTS);
        for i in 0..NUM_INSTRUMENTS {
            let mut record = [0u8; INSTRUMENT_RECORD_LEN];
            record.copy_from_slice(&data[i * INSTRUMENT_RECORD_LEN..(i + 1) * INSTRUMENT_RECORD_LEN]);
            instruments.push(Instrument::parse(&record));
        }
        Ok(InstrumentBank { instruments })
    }

    pub fn get(&self, index: usize) -> Option<&Instrument> {
        self.instruments.get(index)
    }

    /// Percussion instrument for a MUS/MIDI percussion note number
    /// (35..=81 is the usable range; out-of-range notes have no mapping).
    pub fn percussion(&self, note: u8) -> Option<&Instrument> {
        if (35..=81).contains(&note) {
            self.get(PERCUSSION_BASE + (note as usize - 35))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_bank_bytes() -> Vec<u8> {
        let mut data = vec![0u8; NUM_INSTRUMENTS * INSTRUMENT_RECORD_LEN];
        // instrument 0: set FIXED_NOTE and a note_num
        data[0] = 0x01;
        data[3] = 60;
        // instrument 1: set DOUBLE_VOICE, and voice[1].note_offset = -3
        let rec1 = INSTRUMENT_RECORD_LEN;
        data[rec1] = 0x04;
        let ofs = (-3i16).to_le_bytes();
        data[rec1 + 20 + 14] = ofs[0];
        data[rec1 + 20 + 15] = ofs[1];
        data
    }

    #[test]
    fn rejects_short_data() {
        assert!(InstrumentBank::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn parses_flags_and_note_num() {
        let bank = InstrumentBank::parse(&fake_bank_bytes()).unwrap();
        let instr0 = bank.get(0).unwrap();
        assert!(instr0.is_fixed_note());
        assert!(!instr0.is_double_voice());
        assert_eq!(instr0.note_num, 60);
    }

    #[test]
    fn parses_second_voice_note_offset() {
        let bank = InstrumentBank::parse(&fake_bank_bytes()).unwrap();
        let instr1 = bank.get(1).unwrap();
        assert!(instr1.is_double_voice());
        assert_eq!(instr1.voices[1].note_offset, -3);
    }

    #[test]
    fn percussion_range_maps_to_bank_two() {
        let bank = InstrumentBank::parse(&fake_bank_bytes()).unwrap();
        assert!(bank.percussion(34).is_none());
        assert!(bank.percussion(82).is_none());
        assert!(bank.percussion(35).is_some());
        assert_eq!(
            bank.percussion(35).map(|_| PERCUSSION_BASE),
            Some(PERCUSSION_BASE)
        );
    }
}
