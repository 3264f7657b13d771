//! ISO 7816-4 status words seen on the ISD-R channel

/// Status word constants and helpers
pub struct SW;

impl SW {
    pub const SUCCESS: u16 = 0x9000;

    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const WRONG_DATA: u16 = 0x6A80;
    pub const FILE_NOT_FOUND: u16 = 0x6A82;

    /// Reported by the modem when the element refreshed before answering
    pub const UNKNOWN_ERROR: u16 = 0x6F00;

    const MORE_DATA: u8 = 0x61;

    /// `61xx` announcing `available` bytes
    pub fn more_data(available: u8) -> u16 {
        u16::from_be_bytes([Self::MORE_DATA, available])
    }

    /// Byte count of a `61xx` status, None for any other status
    pub fn pending_bytes(sw: u16) -> Option<u8> {
        match sw.to_be_bytes() {
            [Self::MORE_DATA, available] => Some(available),
            _ => None,
        }
    }
}
