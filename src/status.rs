//! Status and error codes carried in STATUS and ERROR blocks.

/// Rocket status codes, as they appear on the wire.
///
/// Note: `ChangedApogee` and `ChangedLanded` share wire value 0x04 for
/// compatibility with deployed ground station decoders; 0x04 parses as
/// `ChangedApogee`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// All systems nominal.
    SystemsNominal,
    /// The telemetry system just changed to the idle state.
    ChangedIdle,
    /// The telemetry system just changed to the airborne state.
    ChangedAirborne,
    /// The telemetry system just changed to the ascent stage.
    ChangedAscent,
    /// The telemetry system just detected apogee.
    ChangedApogee,
    /// The telemetry system just changed to the landed state.
    ChangedLanded,
    /// The telemetry system is still in the idle state.
    UpdateIdle,
    /// The telemetry system is still in the airborne state.
    UpdateAirborne,
    /// The telemetry system is still in the ascent stage.
    UpdateAscent,
    /// The telemetry system is still in the descent stage.
    UpdateDescent,
    /// The telemetry system is still in the landed state.
    UpdateLanded,
}

impl StatusCode {
    pub fn code(self) -> u8 {
        match self {
            Self::SystemsNominal => 0x00,
            Self::ChangedIdle => 0x01,
            Self::ChangedAirborne => 0x02,
            Self::ChangedAscent => 0x03,
            Self::ChangedApogee => 0x04,
            Self::ChangedLanded => 0x04,
            Self::UpdateIdle => 0x05,
            Self::UpdateAirborne => 0x06,
            Self::UpdateAscent => 0x07,
            Self::UpdateDescent => 0x08,
            Self::UpdateLanded => 0x09,
        }
    }

    pub fn from_code(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::SystemsNominal),
            0x01 => Some(Self::ChangedIdle),
            0x02 => Some(Self::ChangedAirborne),
            0x03 => Some(Self::ChangedAscent),
            0x04 => Some(Self::ChangedApogee),
            0x05 => Some(Self::UpdateIdle),
            0x06 => Some(Self::UpdateAirborne),
            0x07 => Some(Self::UpdateAscent),
            0x08 => Some(Self::UpdateDescent),
            0x09 => Some(Self::UpdateLanded),
            _ => None,
        }
    }
}

/// Error codes carried in ERROR blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// A general error has occurred.
    General = 0x00,
    /// The process named in the block has died.
    ProcessDead = 0x01,
}

/// Originating process ids for error blocks. Must stay below 32; the top
/// three bits of the field are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessId {
    General = 0x00,
    Collection = 0x01,
    Fusion = 0x02,
    Logging = 0x03,
    Transmit = 0x04,
}
