//! Packed decimal helpers
//!
//! ICCIDs and IMEIs travel as swapped-nibble BCD: the first digit of each pair
//! sits in the low nibble. ICCIDs are padded to 20 digits with the `F`
//! filler on the wire and stripped of it when read back.

/// Canonical ICCID length in digits
pub const ICCID_LENGTH: usize = 20;

/// Number of clear digits kept by [`printable_iccid`]
const PRINTABLE_ICCID_PREFIX: usize = 9;

fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

/// Pack a digit string into swapped-nibble BCD
///
/// An odd-length input gets a `0` appended first. Non-hex characters pack
/// as zero.
pub fn bcd_to_bytes(digits: &str) -> Vec<u8> {
    let mut chars: Vec<u8> = digits.bytes().collect();
    if chars.len() % 2 != 0 {
        chars.push(b'0');
    }
    chars
        .chunks(2)
        .map(|pair| (nibble(pair[1]) << 4) | nibble(pair[0]))
        .collect()
}

/// Unpack swapped-nibble BCD, low nibble first, as uppercase hex digits
pub fn bch_to_string(data: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(data.len() * 2);
    for &b in data {
        out.push(HEX[(b & 0x0F) as usize] as char);
        out.push(HEX[(b >> 4) as usize] as char);
    }
    out
}

/// Remove trailing `F` fillers (either case)
pub fn strip_trailing_fs(value: &str) -> String {
    value.trim_end_matches(['F', 'f']).to_string()
}

/// Right-pad a non-empty ICCID to 20 digits with `F`
pub fn pad_trailing_fs(iccid: &str) -> String {
    if iccid.is_empty() || iccid.len() >= ICCID_LENGTH {
        return iccid.to_string();
    }
    format!("{:F<width$}", iccid, width = ICCID_LENGTH)
}

/// Encode an ICCID string for a request
pub fn iccid_to_bytes(iccid: &str) -> Vec<u8> {
    bcd_to_bytes(&pad_trailing_fs(iccid))
}

/// Decode an ICCID from its wire form
pub fn iccid_from_bytes(data: &[u8]) -> String {
    strip_trailing_fs(&bch_to_string(data))
}

/// ICCID safe for logs: the issuer prefix in clear, the rest masked
pub fn printable_iccid(iccid: &str) -> String {
    iccid
        .chars()
        .enumerate()
        .map(|(i, c)| if i < PRINTABLE_ICCID_PREFIX { c } else { '*' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcd_to_bytes() {
        assert_eq!(bcd_to_bytes("8901"), vec![0x98, 0x10]);
        assert_eq!(bcd_to_bytes("123"), vec![0x21, 0x03]);
        assert_eq!(bcd_to_bytes("1F"), vec![0xF1]);
        assert!(bcd_to_bytes("").is_empty());
    }

    #[test]
    fn test_bch_to_string() {
        assert_eq!(bch_to_string(&[0x98, 0x10, 0xF1]), "89011F");
    }

    #[test]
    fn test_strip_trailing_fs() {
        assert_eq!(strip_trailing_fs("8901000000000000000F"), "8901000000000000000");
        assert_eq!(strip_trailing_fs("89010fFF"), "89010");
        assert_eq!(strip_trailing_fs("8901"), "8901");
    }

    #[test]
    fn test_pad_trailing_fs() {
        assert_eq!(pad_trailing_fs("8901000000000000000"), "8901000000000000000F");
        assert_eq!(pad_trailing_fs("89"), "89FFFFFFFFFFFFFFFFFF");
        assert_eq!(pad_trailing_fs(""), "");
        assert_eq!(pad_trailing_fs("89010000000000000001"), "89010000000000000001");
    }

    #[test]
    fn test_padding_is_reversible() {
        for iccid in ["", "8", "8901", "8901000000000000000", "89010000000000000001"] {
            assert_eq!(strip_trailing_fs(&pad_trailing_fs(iccid)), iccid);
        }
    }

    #[test]
    fn test_iccid_wire_form() {
        let bytes = iccid_to_bytes("8901000000000000000");
        assert_eq!(hex::encode_upper(&bytes), "981000000000000000F0");
        assert_eq!(iccid_from_bytes(&bytes), "8901000000000000000");
    }

    #[test]
    fn test_printable_iccid() {
        assert_eq!(printable_iccid("89010000000000000001"), "890100000***********");
        assert_eq!(printable_iccid("8901"), "8901");
    }
}
