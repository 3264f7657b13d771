//! BER-TLV Encoder
//!
//! Encodes TLV nodes to bytes for STORE DATA requests, and builds request
//! nodes from typed primitives.

use super::parser::{is_constructed_tag, TLV};

/// TLV Encoder for building BER-TLV structures
pub struct TLVEncoder;

impl TLVEncoder {
    /// Encode a tag-value pair to bytes
    pub fn encode(tag: u32, value: &[u8]) -> Vec<u8> {
        let mut result = Self::encode_tag(tag);
        result.extend(Self::encode_length(value.len()));
        result.extend_from_slice(value);
        result
    }

    /// Encode just the tag bytes
    pub fn encode_tag(tag: u32) -> Vec<u8> {
        let bytes = tag.to_be_bytes();
        let skip = bytes.iter().take(3).take_while(|&&b| b == 0).count();
        bytes[skip..].to_vec()
    }

    /// Encode just the length bytes
    pub fn encode_length(length: usize) -> Vec<u8> {
        if length < 128 {
            // Short form
            return vec![length as u8];
        }
        let bytes = (length as u32).to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        let mut result = vec![0x80 | (4 - skip) as u8];
        result.extend_from_slice(&bytes[skip..]);
        result
    }

    /// Encode a TLV node to bytes
    pub fn encode_tlv(tlv: &TLV) -> Vec<u8> {
        if tlv.subs.is_empty() {
            return Self::encode(tlv.tag, &tlv.value);
        }
        let mut child_bytes = Vec::with_capacity(tlv.data_len());
        for child in &tlv.subs {
            child_bytes.extend(Self::encode_tlv(child));
        }
        Self::encode(tlv.tag, &child_bytes)
    }
}

/// Minimal two's complement big-endian encoding of an INTEGER
pub fn signed_int_to_bytes(value: i32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 3 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        let redundant = (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// BIT STRING encoding of a flag set, bit 0 being the first bit on the wire
pub fn bits_to_bytes(value: u32) -> Vec<u8> {
    let reversed = value.reverse_bits().to_be_bytes();
    let used = reversed
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);

    let mut result = Vec::with_capacity(used + 1);
    let unused_bits = match used {
        0 => 8,
        n => reversed[n - 1].trailing_zeros() as u8,
    };
    result.push(unused_bits);
    result.extend_from_slice(&reversed[..used]);
    result
}

/// Builder for request nodes
///
/// # Example
/// ```ignore
/// let request = TLVBuilder::new(tags::SET_NICKNAME)
///     .add_bytes(tags::ICCID, &iccid)
///     .add_string(tags::NICKNAME, "Work")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TLVBuilder {
    tag: u32,
    children: Vec<TLV>,
}

impl TLVBuilder {
    /// Start a constructed node
    pub fn new(tag: u32) -> Self {
        Self {
            tag,
            children: Vec::new(),
        }
    }

    /// Add an already-built node
    pub fn add(mut self, child: TLV) -> Self {
        self.children.push(child);
        self
    }

    /// Add a nested builder
    pub fn add_builder(self, child: TLVBuilder) -> Self {
        self.add(child.build())
    }

    /// Add a primitive holding raw bytes
    pub fn add_bytes(self, tag: u32, value: &[u8]) -> Self {
        self.add(TLV::new(tag, value.to_vec()))
    }

    /// Add a primitive holding a UTF-8 string
    pub fn add_string(self, tag: u32, value: &str) -> Self {
        self.add(TLV::new(tag, value.as_bytes().to_vec()))
    }

    /// Add a primitive holding an INTEGER
    pub fn add_integer(self, tag: u32, value: i32) -> Self {
        self.add(TLV::new(tag, signed_int_to_bytes(value)))
    }

    /// Add a primitive holding a BIT STRING
    pub fn add_bits(self, tag: u32, value: u32) -> Self {
        self.add(TLV::new(tag, bits_to_bytes(value)))
    }

    /// Add a primitive holding a BOOLEAN
    pub fn add_bool(self, tag: u32, value: bool) -> Self {
        self.add(TLV::new(tag, vec![if value { 0xFF } else { 0x00 }]))
    }

    /// Build the node
    pub fn build(self) -> TLV {
        debug_assert!(is_constructed_tag(self.tag), "builder tag must be constructed");
        TLV::constructed(self.tag, self.children)
    }
}
