//! BER-TLV Parser
//!
//! Decodes the DER-flavoured BER-TLV structures the eUICC returns. Constructed
//! tags are always decoded into their children, so a decoded [`TLV`] carries
//! either a raw value (primitive) or a list of children (constructed), never both.

use std::borrow::Cow;

use thiserror::Error;

use super::encoder::TLVEncoder;

/// Errors that can occur while decoding or reading TLV data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TLVError {
    #[error("No TLV data")]
    Empty,

    #[error("Unexpected end of data while parsing tag")]
    UnexpectedEndTag,

    #[error("Unexpected end of data while parsing length")]
    UnexpectedEndLength,

    #[error("Unexpected end of data while parsing value: need {needed} bytes, {available} available")]
    UnexpectedEndValue { needed: usize, available: usize },

    #[error("Invalid length encoding")]
    InvalidLength,

    #[error("Length too large: {0} length bytes")]
    LengthTooLarge(usize),

    #[error("Only four bytes for tags supported")]
    TagTooLong,

    #[error("Tag 0x{0:X} not found")]
    TagNotFound(u32),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Deepest nesting accepted when decoding
///
/// SGP.22 structures stay well below this; anything deeper is rejected
/// instead of recursing without bound.
pub const MAX_NESTING_DEPTH: usize = 32;

/// A TLV (Tag-Length-Value) node
///
/// - `tag`: the tag bytes packed big-endian into a u32 (1-4 byte tags)
/// - `value`: raw value bytes of a primitive node
/// - `subs`: children of a constructed node
///
/// Decoded nodes also remember the bytes they were read from, see
/// [`TLV::raw`]. Equality only compares tag, value and children.
#[derive(Debug, Clone)]
pub struct TLV {
    /// The tag (1-4 bytes encoded as u32)
    pub tag: u32,
    /// The raw value bytes (empty for constructed nodes)
    pub value: Vec<u8>,
    /// Child TLVs of a constructed node
    pub subs: Vec<TLV>,
    wire: Option<Wire>,
}

#[derive(Debug, Clone)]
struct Wire {
    bytes: Vec<u8>,
    header_len: usize,
}

impl PartialEq for TLV {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.value == other.value && self.subs == other.subs
    }
}

impl Eq for TLV {}

impl TLV {
    /// Create a new primitive TLV
    pub fn new(tag: u32, value: Vec<u8>) -> Self {
        Self {
            tag,
            value,
            subs: Vec::new(),
            wire: None,
        }
    }

    /// Create a new constructed TLV with children
    pub fn constructed(tag: u32, children: Vec<TLV>) -> Self {
        Self {
            tag,
            value: Vec::new(),
            subs: children,
            wire: None,
        }
    }

    /// Check if this is a constructed (container) tag based on the tag bits
    pub fn is_constructed(&self) -> bool {
        is_constructed_tag(self.tag)
    }

    /// Direct children of this node
    pub fn children(&self) -> &[TLV] {
        &self.subs
    }

    /// Direct children carrying `tag`, in order
    pub fn children_with_tag(&self, tag: u32) -> Vec<&TLV> {
        self.subs.iter().filter(|c| c.tag == tag).collect()
    }

    /// Find a direct child by tag (non-recursive)
    pub fn find_child(&self, tag: u32) -> Option<&TLV> {
        self.subs.iter().find(|c| c.tag == tag)
    }

    /// Whether the path of tags exists below this node
    pub fn has_child(&self, path: &[u32]) -> bool {
        self.child(path).is_ok()
    }

    /// Walk a path of tags, one level per tag
    pub fn child(&self, path: &[u32]) -> Result<&TLV, TLVError> {
        let mut node = self;
        for &tag in path {
            node = node.find_child(tag).ok_or(TLVError::TagNotFound(tag))?;
        }
        Ok(node)
    }

    /// Length of the value part when encoded
    pub fn data_len(&self) -> usize {
        if self.subs.is_empty() {
            self.value.len()
        } else {
            self.subs.iter().map(TLV::encoded_len).sum()
        }
    }

    /// Length of the complete encoding (tag + length + value)
    pub fn encoded_len(&self) -> usize {
        let data_len = self.data_len();
        TLVEncoder::encode_tag(self.tag).len() + TLVEncoder::encode_length(data_len).len() + data_len
    }

    /// Encode the node and all its children
    pub fn encode(&self) -> Vec<u8> {
        TLVEncoder::encode_tlv(self)
    }

    /// Encode the tag and length only, for streaming the children separately
    pub fn head(&self) -> Vec<u8> {
        let mut head = TLVEncoder::encode_tag(self.tag);
        head.extend(TLVEncoder::encode_length(self.data_len()));
        head
    }

    /// The bytes the node was decoded from
    ///
    /// Signed structures must be passed on exactly as received, even when
    /// the element used a non-minimal length encoding. Built nodes have no
    /// received form and yield [`TLV::encode`].
    pub fn raw(&self) -> Cow<'_, [u8]> {
        match &self.wire {
            Some(wire) => Cow::Borrowed(&wire.bytes),
            None => Cow::Owned(self.encode()),
        }
    }

    /// Length of [`TLV::raw`]
    pub fn raw_len(&self) -> usize {
        self.wire
            .as_ref()
            .map_or_else(|| self.encoded_len(), |wire| wire.bytes.len())
    }

    /// Tag and length as received, the counterpart of [`TLV::head`]
    pub fn raw_head(&self) -> Vec<u8> {
        match &self.wire {
            Some(wire) => wire.bytes[..wire.header_len].to_vec(),
            None => self.head(),
        }
    }

    /// Uppercase hex of the full encoding
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.encode())
    }

    fn primitive_value(&self) -> Result<&[u8], TLVError> {
        if self.is_constructed() {
            return Err(TLVError::InvalidData(format!(
                "tag 0x{:X} is constructed",
                self.tag
            )));
        }
        Ok(&self.value)
    }

    /// Raw value bytes of a primitive node
    pub fn as_bytes(&self) -> Result<&[u8], TLVError> {
        self.primitive_value()
    }

    /// Value interpreted as a UTF-8 string
    pub fn as_string(&self) -> Result<String, TLVError> {
        let value = self.primitive_value()?;
        String::from_utf8(value.to_vec())
            .map_err(|_| TLVError::InvalidData(format!("tag 0x{:X} is not UTF-8", self.tag)))
    }

    /// Value interpreted as a big-endian integer of at most four bytes
    pub fn as_integer(&self) -> Result<i32, TLVError> {
        let value = self.primitive_value()?;
        if value.len() > 4 {
            return Err(TLVError::InvalidData(format!(
                "integer of {} bytes under tag 0x{:X}",
                value.len(),
                self.tag
            )));
        }
        Ok(value.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32) as i32)
    }

    /// Value interpreted as a big-endian integer of at most eight bytes
    pub fn as_raw_long(&self) -> Result<i64, TLVError> {
        let value = self.primitive_value()?;
        if value.len() > 8 {
            return Err(TLVError::InvalidData(format!(
                "long of {} bytes under tag 0x{:X}",
                value.len(),
                self.tag
            )));
        }
        Ok(value.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64) as i64)
    }

    /// Value interpreted as a BIT STRING, bit 0 being the first bit on the wire
    pub fn as_bits(&self) -> Result<u32, TLVError> {
        let value = self.primitive_value()?;
        if value.is_empty() || value.len() > 5 {
            return Err(TLVError::InvalidData(format!(
                "bit string of {} bytes under tag 0x{:X}",
                value.len(),
                self.tag
            )));
        }
        // First byte is the unused-bits count.
        let bits = &value[1..];
        let packed = bits.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        let aligned = (packed << (8 * (4 - bits.len()))) as u32;
        Ok(aligned.reverse_bits())
    }
}

/// Whether the first tag byte marks a constructed encoding
pub fn is_constructed_tag(tag: u32) -> bool {
    let first_byte = TLVEncoder::encode_tag(tag)[0];
    (first_byte & 0x20) != 0
}

/// Decode the first TLV node from `data`, ignoring trailing bytes
pub fn decode(data: &[u8]) -> Result<TLV, TLVError> {
    if data.is_empty() {
        return Err(TLVError::Empty);
    }
    TLVParser::parse_one(data).map(|(tlv, _)| tlv)
}

/// Decode every node in `data`; the bytes must be consumed exactly
pub fn decode_all(data: &[u8]) -> Result<Vec<TLV>, TLVError> {
    decode_siblings(data, 0)
}

fn decode_siblings(data: &[u8], depth: usize) -> Result<Vec<TLV>, TLVError> {
    let mut result = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (tlv, consumed) = TLVParser::parse_nested(&data[offset..], depth)?;
        result.push(tlv);
        offset += consumed;
    }
    Ok(result)
}

/// Header of a single TLV: tag, header size and declared value length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TLVHeader {
    pub tag: u32,
    pub header_len: usize,
    pub value_len: usize,
}

pub struct TLVParser;

impl TLVParser {
    /// Parse one TLV, returning it with the number of bytes consumed
    pub fn parse_one(data: &[u8]) -> Result<(TLV, usize), TLVError> {
        Self::parse_nested(data, 0)
    }

    fn parse_nested(data: &[u8], depth: usize) -> Result<(TLV, usize), TLVError> {
        if depth >= MAX_NESTING_DEPTH {
            return Err(TLVError::InvalidData(format!(
                "nesting deeper than {} levels",
                MAX_NESTING_DEPTH
            )));
        }

        let header = Self::parse_header(data)?;
        let end = header.header_len + header.value_len;
        let value = &data[header.header_len..end];

        let mut tlv = if is_constructed_tag(header.tag) {
            TLV::constructed(header.tag, decode_siblings(value, depth + 1)?)
        } else {
            TLV::new(header.tag, value.to_vec())
        };
        tlv.wire = Some(Wire {
            bytes: data[..end].to_vec(),
            header_len: header.header_len,
        });
        Ok((tlv, end))
    }

    /// Parse and check the tag and length of the TLV at the start of `data`
    pub fn parse_header(data: &[u8]) -> Result<TLVHeader, TLVError> {
        let (tag, tag_len) = parse_tag(data)?;
        let (value_len, len_len) = parse_length(&data[tag_len..])?;
        let header_len = tag_len + len_len;

        let available = data.len() - header_len;
        if value_len > available {
            return Err(TLVError::UnexpectedEndValue {
                needed: value_len,
                available,
            });
        }
        Ok(TLVHeader {
            tag,
            header_len,
            value_len,
        })
    }
}

/// Parse a BER tag (1-4 bytes)
fn parse_tag(data: &[u8]) -> Result<(u32, usize), TLVError> {
    let first = *data.first().ok_or(TLVError::UnexpectedEndTag)?;

    // Low 5 bits all set means subsequent bytes follow
    if (first & 0x1F) != 0x1F {
        return Ok((first as u32, 1));
    }

    let mut tag = first as u32;
    let mut len = 1;
    loop {
        let byte = *data.get(len).ok_or(TLVError::UnexpectedEndTag)?;
        tag = (tag << 8) | byte as u32;
        len += 1;
        if (byte & 0x80) == 0 {
            return Ok((tag, len));
        }
        if len == 4 {
            return Err(TLVError::TagTooLong);
        }
    }
}

/// Parse a BER length (1-5 bytes)
fn parse_length(data: &[u8]) -> Result<(usize, usize), TLVError> {
    let first = *data.first().ok_or(TLVError::UnexpectedEndLength)?;

    // Short form (0-127)
    if (first & 0x80) == 0 {
        return Ok((first as usize, 1));
    }

    let num_bytes = (first & 0x7F) as usize;
    if num_bytes == 0 {
        // Indefinite length is not DER
        return Err(TLVError::InvalidLength);
    }
    if num_bytes > 4 {
        return Err(TLVError::LengthTooLarge(num_bytes));
    }
    if data.len() < 1 + num_bytes {
        return Err(TLVError::UnexpectedEndLength);
    }

    let length = data[1..=num_bytes]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((length, 1 + num_bytes))
}
