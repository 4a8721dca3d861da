//! MUS score byte-stream event decoding: event tags, variable-length
//! delays, and the per-event payload each tag carries.

/// The seven command codes encoded in bits 4-6 of a MUS event byte. Bit 7
/// is the "last event in this tick" flag, consumed by the caller before
/// this enum is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusEventKind {
    ReleaseNote,
    PlayNote,
    PitchWheel,
    SystemEvent,
    Controller,
    EndOfMeasure,
    EndOfScore,
    Unused,
}

impl MusEventKind {
    fn from_code(code: u8) -> Self {
        match code {
            0 => MusEventKind::ReleaseNote,
            1 => MusEventKind::PlayNote,
            2 => MusEventKind::PitchWheel,
            3 => MusEventKind::SystemEvent,
            4 => MusEventKind::Controller,
            5 => MusEventKind::EndOfMeasure,
            6 => MusEventKind::EndOfScore,
            _ => MusEventKind::Unused,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MusEvent {
    ReleaseNote { channel: u8, note: u8 },
    PlayNote { channel: u8, note: u8, velocity: Option<u8> },
    PitchWheel { channel: u8, bend: u8 },
    SystemEvent { channel: u8, controller: u8 },
    Controller { channel: u8, controller: u8, value: u8 },
    EndOfMeasure,
    EndOfScore,
    Unused { channel: u8 },
}

#[derive(Debug)]
pub struct DecodeError {
    pub message: &'static str,
}

/// Reads one event (and, for `PlayNote`/`Controller`/`PitchWheel`/
/// `SystemEvent`, its payload bytes) from `score` starting at `*pos`.
/// Returns `(event, last_in_tick)`. Advances `*pos` past whatever it
/// consumed.
///
/// Matches the reference decoder exactly on ambiguous points: a system
/// event carries exactly one controller-number byte (some MUS variants in
/// the wild are documented as reading two; this implementation does not).
pub fn decode_event(score: &[u8], pos: &mut usize) -> Result<(MusEvent, bool), DecodeError> {
    let byte = *score.get(*pos).ok_or(DecodeError { message: "score truncated reading event byte" })?;
    *pos += 1;

    let last_in_tick = byte & 0x80 != 0;
    let kind = MusEventKind::from_code((byte >> 4) & 0x07);
    let channel = byte & 0x0F;

    let event = match kind {
        MusEventKind::ReleaseNote => {
            let note = read_byte(score, pos)? & 0x7F;
            MusEvent::ReleaseNote { channel, note }
        }
        MusEventKind::PlayNote => {
            let note_byte = read_byte(score, pos)?;
            let note = note_byte & 0x7F;
            let velocity = if note_byte & 0x80 != 0 {
                Some(read_byte(score, pos)? & 0x7F)
            } else {
                None
            };
            MusEvent::PlayNote { channel, note, velocity }
        }
        MusEventKind::PitchWheel => {
            let bend = read_byte(score, pos)?;
            MusEvent::PitchWheel { channel, bend }
        }
        MusEventKind::SystemEvent => {
            let controller = read_byte(score, pos)?;
            MusEvent::SystemEvent { channel, controller }
        }
        MusEventKind::Controller => {
            let controller = read_byte(score, pos)?;
            let value = read_byte(score, pos)?;
            MusEvent::Controller { channel, controller, value }
        }
        MusEventKind::EndOfMeasure => MusEvent::EndOfMeasure,
        MusEventKind::EndOfScore => MusEvent::EndOfScore,
        MusEventKind::Unused => MusEvent::Unused { channel },
    };

    Ok((event, last_in_tick))
}

fn read_byte(score: &[u8], pos: &mut usize) -> Result<u8, DecodeError> {
    let b = *score.get(*pos).ok_or(DecodeError { message: "score truncated reading event payload" })?;
    *pos += 1;
    Ok(b)
}

/// Decodes a MUS variable-length delay: 7 bits per byte, high bit set
/// means "another byte follows", accumulated big-endian-style (each new
/// byte's low 7 bits become the new low bits, previous value shifts up).
pub fn decode_delay(score: &[u8], pos: &mut usize) -> Result<u32, DecodeError> {
    let mut delay: u32 = 0;
    loop {
        let b = read_byte(score, pos)?;
        delay = (delay << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok(delay)
}
