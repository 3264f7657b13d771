//! APDU (Application Protocol Data Unit) handling
//!
//! Command APDUs sent to the ISD-R, the STORE DATA segmentation every ES10x
//! request goes through, and the response/status word types coming back.
//!
//! # Example
//! ```ignore
//! use euicc_lpa::apdu::RequestBuilder;
//!
//! let mut request = RequestBuilder::new(false);
//! request.add_store_data(&get_eid_request);
//! for apdu in request.apdus() {
//!     println!("{}", hex::encode_upper(apdu.to_bytes()));
//! }
//! ```

mod response;
mod status;

pub use response::Response;
pub use status::SW;

/// Largest STORE DATA block in a short APDU
pub const MAX_SHORT_DATA: usize = 255;
/// Largest STORE DATA block in an extended APDU
pub const MAX_EXTENDED_DATA: usize = 65535;

/// A command APDU
///
/// # Fields
/// - `cla`: Class byte; the logical channel is applied by the transport
/// - `ins`: Instruction byte (the command to execute)
/// - `p1`, `p2`: Parameter bytes (command-specific)
/// - `data`: Command data (may be empty)
/// - `le`: Expected response length (None if not specified)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct APDU {
    /// Class byte (CLA)
    pub cla: u8,
    /// Instruction byte (INS)
    pub ins: u8,
    /// Parameter 1 (P1)
    pub p1: u8,
    /// Parameter 2 (P2)
    pub p2: u8,
    /// Command data (may be empty)
    pub data: Vec<u8>,
    /// Expected response length (Le), None if not specified
    pub le: Option<u32>,
}

impl APDU {
    /// Create a new APDU with just the header (CLA, INS, P1, P2)
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Create a new APDU with data
    pub fn with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le: None,
        }
    }

    /// GET RESPONSE for `available` pending bytes (0 means 256)
    pub fn get_response(cla: u8, available: u8) -> Self {
        let le = if available == 0 { 256 } else { available as u32 };
        Self {
            le: Some(le),
            ..Self::new(cla, ins::GET_RESPONSE, 0x00, 0x00)
        }
    }

    /// Whether this block closes a STORE DATA sequence
    pub fn is_last_block(&self) -> bool {
        self.ins == ins::STORE_DATA && self.p1 == STORE_DATA_P1_LAST
    }

    /// Serialize to raw bytes
    ///
    /// Short form is used while Lc fits one byte and Le is at most 256,
    /// extended form otherwise:
    /// - Short: CLA INS P1 P2 [Lc Data] [Le]
    /// - Extended: CLA INS P1 P2 00 [Lc1 Lc2 Data] [Le1 Le2]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.cla, self.ins, self.p1, self.p2];
        let extended = self.data.len() > MAX_SHORT_DATA || self.le.map_or(false, |le| le > 256);

        if extended {
            out.push(0x00);
            if !self.data.is_empty() {
                out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
                out.extend_from_slice(&self.data);
            }
            if let Some(le) = self.le {
                // 65536 is encoded as 0000
                out.extend_from_slice(&((le & 0xFFFF) as u16).to_be_bytes());
            }
        } else {
            if !self.data.is_empty() {
                out.push(self.data.len() as u8);
                out.extend_from_slice(&self.data);
            }
            if let Some(le) = self.le {
                // 256 is encoded as 00
                out.push((le & 0xFF) as u8);
            }
        }
        out
    }
}

/// STORE DATA P1 for a block followed by more blocks
pub const STORE_DATA_P1_MORE: u8 = 0x11;
/// STORE DATA P1 for the final block of a payload
pub const STORE_DATA_P1_LAST: u8 = 0x91;
/// CLA for GlobalPlatform proprietary commands
pub const CLA_STORE_DATA: u8 = 0x80;

/// Collects the APDUs of one logical exchange
///
/// Each payload added through [`RequestBuilder::add_store_data`] is split
/// into STORE DATA blocks; block numbering restarts for every payload.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    max_block: usize,
    apdus: Vec<APDU>,
}

impl RequestBuilder {
    /// Create a builder; `extended` selects the extended APDU block size
    pub fn new(extended: bool) -> Self {
        Self {
            max_block: if extended {
                MAX_EXTENDED_DATA
            } else {
                MAX_SHORT_DATA
            },
            apdus: Vec::new(),
        }
    }

    /// Split `payload` into STORE DATA blocks
    pub fn add_store_data(&mut self, payload: &[u8]) {
        if payload.is_empty() {
            self.apdus.push(APDU::new(
                CLA_STORE_DATA,
                ins::STORE_DATA,
                STORE_DATA_P1_LAST,
                0,
            ));
            return;
        }

        let blocks = payload.chunks(self.max_block).count();
        for (index, block) in payload.chunks(self.max_block).enumerate() {
            let p1 = if index + 1 == blocks {
                STORE_DATA_P1_LAST
            } else {
                STORE_DATA_P1_MORE
            };
            self.apdus.push(APDU::with_data(
                CLA_STORE_DATA,
                ins::STORE_DATA,
                p1,
                index as u8,
                block.to_vec(),
            ));
        }
    }

    /// APDUs added so far, in transmission order
    pub fn apdus(&self) -> &[APDU] {
        &self.apdus
    }

    pub fn into_apdus(self) -> Vec<APDU> {
        self.apdus
    }

    pub fn is_empty(&self) -> bool {
        self.apdus.is_empty()
    }
}

/// Instruction bytes
pub mod ins {
    pub const GET_RESPONSE: u8 = 0xC0;
    pub const STORE_DATA: u8 = 0xE2;
}
