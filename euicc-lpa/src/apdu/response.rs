//! Responses returned by the secure element

use super::status::SW;

/// Response data and the status word that closed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    sw: u16,
}

impl Response {
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        Self { data, sw }
    }

    /// `9000` carrying `data`
    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, SW::SUCCESS)
    }

    /// Bare status word without data
    pub fn error(sw: u16) -> Self {
        Self::new(Vec::new(), sw)
    }

    /// Partial `data` with `61xx`, `available` more bytes pending
    pub fn more_data(data: Vec<u8>, available: u8) -> Self {
        Self::new(data, SW::more_data(available))
    }

    /// Parse a raw R-APDU as delivered by a reader or modem
    ///
    /// The last two bytes are the status word; fewer than two is None.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        let split = raw.len().checked_sub(2)?;
        let (data, sw) = raw.split_at(split);
        Some(Self::new(data.to_vec(), u16::from_be_bytes([sw[0], sw[1]])))
    }

    pub fn sw(&self) -> u16 {
        self.sw
    }

    /// Only `9000` counts as a final success
    pub fn is_okay(&self) -> bool {
        self.sw == SW::SUCCESS
    }

    /// Bytes announced by a `61xx` status, fetched with GET RESPONSE
    pub fn available_response(&self) -> Option<u8> {
        SW::pending_bytes(self.sw)
    }
}
