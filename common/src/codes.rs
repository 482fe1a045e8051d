use serde::{Deserialize, Serialize};

pub const NEC_HEADER_MARK_US: u16 = 9_000;
pub const NEC_HEADER_SPACE_US: u16 = 4_500;
pub const NEC_BIT_MARK_US: u16 = 560;
pub const NEC_ONE_SPACE_US: u16 = 1_690;
pub const NEC_ZERO_SPACE_US: u16 = 560;
pub const NEC_BITS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanCode {
    Power,
    SpeedUp,
    SpeedDown,
}

impl FanCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::SpeedUp => "speed-up",
            Self::SpeedDown => "speed-down",
        }
    }
}

/// NEC payloads for the fan remote, sent MSB first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrCodeSet {
    pub power: u32,
    pub speed_up: u32,
    pub speed_down: u32,
}

impl Default for IrCodeSet {
    fn default() -> Self {
        Self {
            power: 0x807F_48B7,
            speed_up: 0x807F_C03F,
            speed_down: 0x807F_40BF,
        }
    }
}

impl IrCodeSet {
    pub fn value(&self, code: FanCode) -> u32 {
        match code {
            FanCode::Power => self.power,
            FanCode::SpeedUp => self.speed_up,
            FanCode::SpeedDown => self.speed_down,
        }
    }

    /// Falls back to the built-in payload for any code whose command byte is
    /// not followed by its complement. Zeroed codes fail that check too.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        for (slot, fallback) in [
            (&mut self.power, defaults.power),
            (&mut self.speed_up, defaults.speed_up),
            (&mut self.speed_down, defaults.speed_down),
        ] {
            if !nec::has_valid_command(*slot) {
                *slot = fallback;
            }
        }
    }
}

pub mod nec {
    use super::*;

    /// Raw mark/space timings in microseconds. Even indices are marks.
    pub fn encode(value: u32) -> Vec<u16> {
        let mut raw = Vec::with_capacity(2 + NEC_BITS as usize * 2 + 1);
        raw.push(NEC_HEADER_MARK_US);
        raw.push(NEC_HEADER_SPACE_US);

        for bit in (0..NEC_BITS).rev() {
            raw.push(NEC_BIT_MARK_US);
            if value & (1 << bit) != 0 {
                raw.push(NEC_ONE_SPACE_US);
            } else {
                raw.push(NEC_ZERO_SPACE_US);
            }
        }

        raw.push(NEC_BIT_MARK_US);
        raw
    }

    /// True when the command byte is followed by its complement.
    pub fn has_valid_command(value: u32) -> bool {
        let command = (value >> 8) & 0xFF;
        let inverse = value & 0xFF;
        command ^ inverse == 0xFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nec_frame_has_header_bits_and_trailer() {
        let raw = nec::encode(0x807F_48B7);

        assert_eq!(raw.len(), 67);
        assert_eq!(&raw[..2], &[NEC_HEADER_MARK_US, NEC_HEADER_SPACE_US]);
        assert_eq!(raw[66], NEC_BIT_MARK_US);
        assert!(raw.iter().step_by(2).skip(1).all(|mark| *mark == NEC_BIT_MARK_US));
    }

    #[test]
    fn nec_bits_are_msb_first() {
        let raw = nec::encode(0x8000_0001);

        // First data bit follows the header: mark, then space.
        assert_eq!(raw[3], NEC_ONE_SPACE_US);
        assert_eq!(raw[5], NEC_ZERO_SPACE_US);
        assert_eq!(raw[65], NEC_ONE_SPACE_US);
    }

    #[test]
    fn default_codes_carry_inverted_commands() {
        let codes = IrCodeSet::default();
        for code in [FanCode::Power, FanCode::SpeedUp, FanCode::SpeedDown] {
            assert!(nec::has_valid_command(codes.value(code)), "{}", code.as_str());
        }
        assert!(!nec::has_valid_command(0x807F_4848));
    }

    #[test]
    fn sanitize_restores_zeroed_and_corrupt_codes() {
        let mut codes = IrCodeSet {
            power: 0,
            speed_up: 0x1234_56A9,
            speed_down: 0x807F_4848,
        };
        codes.sanitize();

        assert_eq!(codes.power, IrCodeSet::default().power);
        assert_eq!(codes.speed_up, 0x1234_56A9);
        assert_eq!(codes.speed_down, IrCodeSet::default().speed_down);
    }
}
