//! Per-logical-channel MUS player state: the instrument currently
//! selected, volume/expression/pan/bend, and the mono/poly play mode.

/// Channel 15 (0-indexed) carries percussion instead of a selectable
/// instrument.
pub const PERCUSSION_CHANNEL: u8 = 15;

/// OPL3 stereo panning register bit patterns, and the threshold/centre
/// attenuation used when computing a channel's effective left/right
/// balance from MIDI pan (0..127).
pub mod pan_bits {
    pub const LEFT: i8 = 0x10;
    pub const CENTRE: i8 = 0x30;
    pub const RIGHT: i8 = 0x20;
    pub const CENTRE_ATTENUATION: i8 = 6;
    pub const THRESHOLD: i8 = 21;
}

#[derive(Debug, Clone, Copy)]
pub struct MusChannelState {
    /// When set, a new note on this channel key-offs every other active
    /// voice owned by the channel before playing.
    pub mono: bool,
    /// Velocity of the last note played, reused when a `PlayNote` event
    /// omits its own velocity byte.
    pub last_velocity: u8,
    pub volume_attenuation: i8,
    pub expression_attenuation: i8,
    pub bend: i8,
    pub pan_bits: i8,
    pub instrument_index: u8,
}

impl Default for MusChannelState {
    fn default() -> Self {
        MusChannelState {
            mono: false,
            last_velocity: 0,
            volume_attenuation: 0,
            expression_attenuation: 0,
            bend: 0,
            pan_bits: pan_bits::CENTRE,
            instrument_index: 0,
        }
    }
}

impl MusChannelState {
    /// `ctrl_reset_all` (MIDI controller 121): clears volume/expression
    /// attenuation, bend, and pan back to defaults. Returns whether
    /// anything actually changed, so the caller only re-sends OPL volume
    /// updates when needed.
    pub fn reset_all(&mut self) -> bool {
        let changed = self.volume_attenuation != 0
            || self.expression_attenuation != 0
            || self.bend != 0
            || self.pan_bits != pan_bits::CENTRE;
        self.volume_attenuation = 0;
        self.expression_attenuation = 0;
        self.bend = 0;
        self.pan_bits = pan_bits::CENTRE;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channel_is_centred_and_silent() {
        let ch = MusChannelState::default();
        assert_eq!(ch.pan_bits, pan_bits::CENTRE);
        assert_eq!(ch.last_velocity, 0);
    }

    #[test]
    fn reset_all_reports_no_change_when_already_default() {
        let mut ch = MusChannelState::default();
        assert!(!ch.reset_all());
    }

    #[test]
    fn reset_all_reports_change_and_clears_state() {
        let mut ch = MusChannelState::default();
        ch.volume_attenuation = 10;
        ch.bend = -5;
        ch.pan_bits = pan_bits::LEFT;
        assert!(ch.reset_all());
        assert_eq!(ch.volume_attenuation, 0);
        assert_eq!(ch.bend, 0);
        assert_eq!(ch.pan_bits, pan_bits::CENTRE);
    }
}
