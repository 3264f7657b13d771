//! Device information sent during server authentication
//!
//! The IMEI encoding depends on the SGP.22 version: from 2.1 on it is TBCD
//! with an `F` filler, and the nibbles of the last octet are swapped so the
//! check digit sits in the high nibble. Earlier versions use plain packed
//! decimal.

use log::error;

use crate::bcd::{bcd_to_bytes, bch_to_string, strip_trailing_fs};
use crate::card::SpecVersion;
use crate::tlv::{tags, TLVBuilder, TLV};

/// Encoded IMEI length in bytes
pub const DEVICE_ID_LENGTH: usize = 8;

const IMEI_DIGITS: usize = 15;
const TAC_LENGTH: usize = 4;

/// Capability names and the tag of their version field
const CAPABILITY_TAGS: &[(&str, u32)] = &[
    ("gsm", tags::CTX_0),
    ("utran", tags::CTX_1),
    ("cdma1x", tags::CTX_2),
    ("hrpd", tags::CTX_3),
    ("ehrpd", tags::CTX_4),
    ("eutran", tags::CTX_5),
    ("nfc", tags::CTX_6),
    ("crl", tags::CTX_7),
    ("nrepc", tags::CTX_8),
    ("nr5gc", tags::CTX_9),
    ("eutran5gc", tags::CTX_10),
];

/// Encode an IMEI for `version`; no IMEI encodes as all zeroes
pub fn encode_device_id(imei: Option<&str>, version: SpecVersion) -> [u8; DEVICE_ID_LENGTH] {
    let mut out = [0u8; DEVICE_ID_LENGTH];
    let imei = match imei {
        Some(imei) if !imei.is_empty() => imei,
        _ => return out,
    };

    if version >= SpecVersion::V2_1 {
        let packed = bcd_to_bytes(&format!("{}F", imei));
        copy_truncated(&packed, &mut out);
        out[7] = out[7].rotate_left(4);
    } else {
        copy_truncated(&bcd_to_bytes(imei), &mut out);
    }
    out
}

/// Recover the IMEI digits from an encoded device identifier
pub fn decode_device_id(data: &[u8], version: SpecVersion) -> String {
    let mut bytes = data.to_vec();
    if version >= SpecVersion::V2_1 {
        if let Some(last) = bytes.get_mut(DEVICE_ID_LENGTH - 1) {
            *last = last.rotate_left(4);
        }
        strip_trailing_fs(&bch_to_string(&bytes))
    } else {
        let mut digits = bch_to_string(&bytes);
        digits.truncate(IMEI_DIGITS);
        digits
    }
}

/// Type allocation code: the first four bytes of the encoded IMEI
pub fn tac(device_id: &[u8; DEVICE_ID_LENGTH]) -> [u8; TAC_LENGTH] {
    let mut tac = [0u8; TAC_LENGTH];
    tac.copy_from_slice(&device_id[..TAC_LENGTH]);
    tac
}

/// Build the device capabilities node (`A1`) from "name,version" items
///
/// Unknown names and malformed items are logged and skipped.
pub fn device_capabilities(items: &[String]) -> TLV {
    let mut builder = TLVBuilder::new(tags::CTX_COMP_1);
    for item in items {
        match parse_capability(item) {
            Some((tag, major)) => builder = builder.add_bytes(tag, &[major, 0, 0]),
            None => error!("Invalid device capability: {}", item),
        }
    }
    builder.build()
}

fn parse_capability(item: &str) -> Option<(u32, u8)> {
    let mut parts = item.split(',');
    let (name, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(version), None) => (name.trim(), version.trim()),
        _ => return None,
    };
    let major = version.parse::<u8>().ok()?;
    CAPABILITY_TAGS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, tag)| (*tag, major))
}

fn copy_truncated(src: &[u8], dst: &mut [u8]) {
    let len = src.len().min(dst.len());
    dst[..len].copy_from_slice(&src[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMEI: &str = "358240051111110";

    #[test]
    fn test_device_id_v2_1() {
        let encoded = encode_device_id(Some(IMEI), SpecVersion::V2_1);
        assert_eq!(hex::encode_upper(encoded), "532804501111110F");
        assert_eq!(decode_device_id(&encoded, SpecVersion::V2_1), IMEI);
    }

    #[test]
    fn test_device_id_v2_0() {
        let encoded = encode_device_id(Some(IMEI), SpecVersion::V2_0);
        assert_eq!(hex::encode_upper(encoded), "5328045011111100");
        assert_eq!(decode_device_id(&encoded, SpecVersion::V2_0), IMEI);
    }

    #[test]
    fn test_device_id_versions_differ_in_last_byte() {
        let old = encode_device_id(Some(IMEI), SpecVersion::V2_0);
        let new = encode_device_id(Some(IMEI), SpecVersion::new(2, 2, 0));
        assert_eq!(old[..7], new[..7]);
        assert_ne!(old[7], new[7]);
    }

    #[test]
    fn test_no_device_id() {
        assert_eq!(encode_device_id(None, SpecVersion::V2_1), [0u8; 8]);
        assert_eq!(encode_device_id(Some(""), SpecVersion::V2_0), [0u8; 8]);
    }

    #[test]
    fn test_tac() {
        let encoded = encode_device_id(Some(IMEI), SpecVersion::V2_1);
        assert_eq!(tac(&encoded), [0x53, 0x28, 0x04, 0x50]);
    }

    #[test]
    fn test_device_capabilities() {
        let items: Vec<String> = vec![
            "gsm,11".into(),
            " eutran , 15 ".into(),
            "nr5gc,15".into(),
            "unknown,1".into(),
            "utran".into(),
            "utran,1,2".into(),
            "cdma1x,x".into(),
        ];
        let node = device_capabilities(&items);
        assert_eq!(node.tag, tags::CTX_COMP_1);
        assert_eq!(hex::encode_upper(node.encode()), "A10F80030B000085030F000089030F0000");
    }

    #[test]
    fn test_no_device_capabilities() {
        assert_eq!(device_capabilities(&[]).encode(), vec![0xA1, 0x00]);
    }
}
