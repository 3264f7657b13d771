//! TLV (Tag-Length-Value) encoding and decoding
//!
//! Every SGP.22 request and response is a BER-TLV tree. This module decodes
//! element responses into [`TLV`] nodes, encodes request nodes, and exposes the
//! "head only" encoding needed to stream a container's children as separate
//! STORE DATA segments.
//!
//! # Example
//! ```ignore
//! use euicc_lpa::tlv::{decode, tags, TLVBuilder};
//!
//! let request = TLVBuilder::new(tags::GET_EID)
//!     .add_bytes(tags::TAG_LIST, &[0x5A])
//!     .build();
//! let response = decode(&raw)?;
//! let eid = response.child(&[tags::EID])?.as_bytes()?;
//! ```

mod encoder;
mod parser;

pub use encoder::{bits_to_bytes, signed_int_to_bytes, TLVBuilder, TLVEncoder};
pub use parser::{
    decode, decode_all, is_constructed_tag, TLVError, TLVHeader, TLVParser, MAX_NESTING_DEPTH, TLV,
};

/// Convert a byte slice to a spaced hex string for logs
pub fn hexify(value: &[u8]) -> String {
    value.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

/// GSMA SGP.22 tag constants
pub mod tags {
    // Universal
    pub const UNI_2: u32 = 0x02;
    pub const UNI_4: u32 = 0x04;
    pub const SEQUENCE: u32 = 0x30;

    // Context-specific primitives
    pub const CTX_0: u32 = 0x80;
    pub const CTX_1: u32 = 0x81;
    pub const CTX_2: u32 = 0x82;
    pub const CTX_3: u32 = 0x83;
    pub const CTX_4: u32 = 0x84;
    pub const CTX_5: u32 = 0x85;
    pub const CTX_6: u32 = 0x86;
    pub const CTX_7: u32 = 0x87;
    pub const CTX_8: u32 = 0x88;
    pub const CTX_9: u32 = 0x89;
    pub const CTX_10: u32 = 0x8A;

    // Context-specific constructed
    pub const CTX_COMP_0: u32 = 0xA0;
    pub const CTX_COMP_1: u32 = 0xA1;
    pub const CTX_COMP_2: u32 = 0xA2;
    pub const CTX_COMP_3: u32 = 0xA3;

    // ES10x request/response roots
    pub const GET_EUICC_INFO_1: u32 = 0xBF20;
    pub const PREPARE_DOWNLOAD: u32 = 0xBF21;
    pub const GET_EUICC_INFO_2: u32 = 0xBF22;
    pub const INITIALISE_SECURE_CHANNEL: u32 = 0xBF23;
    pub const PROFILE_INSTALLATION_RESULT_DATA: u32 = 0xBF27;
    pub const LIST_NOTIFICATION: u32 = 0xBF28;
    pub const SET_NICKNAME: u32 = 0xBF29;
    pub const RETRIEVE_NOTIFICATIONS_LIST: u32 = 0xBF2B;
    pub const GET_PROFILES: u32 = 0xBF2D;
    pub const GET_EUICC_CHALLENGE: u32 = 0xBF2E;
    pub const NOTIFICATION_METADATA: u32 = 0xBF2F;
    pub const REMOVE_NOTIFICATION_FROM_LIST: u32 = 0xBF30;
    pub const ENABLE_PROFILE: u32 = 0xBF31;
    pub const DISABLE_PROFILE: u32 = 0xBF32;
    pub const DELETE_PROFILE: u32 = 0xBF33;
    pub const EUICC_MEMORY_RESET: u32 = 0xBF34;
    pub const BOUND_PROFILE_PACKAGE: u32 = 0xBF36;
    pub const PROFILE_INSTALLATION_RESULT: u32 = 0xBF37;
    pub const AUTHENTICATE_SERVER: u32 = 0xBF38;
    pub const GET_CONFIGURED_ADDRESSES: u32 = 0xBF3C;
    pub const GET_EID: u32 = 0xBF3E;
    pub const SET_DEFAULT_SMDP_ADDRESS: u32 = 0xBF3F;
    pub const CANCEL_SESSION: u32 = 0xBF41;
    pub const GET_RAT: u32 = 0xBF43;

    // Profile info
    pub const ICCID: u32 = 0x5A;
    pub const TAG_LIST: u32 = 0x5C;
    pub const EID: u32 = 0x5A;
    pub const PROFILE_INFO: u32 = 0xE3;
    pub const NICKNAME: u32 = 0x90;
    pub const SERVICE_PROVIDER_NAME: u32 = 0x91;
    pub const PROFILE_NAME: u32 = 0x92;
    pub const OPERATOR_ID: u32 = 0xB7;
    pub const PROFILE_STATE: u32 = 0x9F70;
    pub const PROFILE_CLASS: u32 = 0x95;
    pub const PROFILE_POLICY_RULE: u32 = 0x99;
    pub const CARRIER_PRIVILEGE_RULES: u32 = 0xBF76;
    pub const PORT: u32 = 0x9F24;

    // Access rules (GlobalPlatform SEAC)
    pub const REF_AR_DO: u32 = 0xE2;
    pub const REF_DO: u32 = 0xE1;
    pub const DEVICE_APP_ID_REF_DO: u32 = 0xC1;
    pub const PKG_REF_DO: u32 = 0xCA;
    pub const AR_DO: u32 = 0xE3;
    pub const PERM_AR_DO: u32 = 0xDB;

    // Notifications
    pub const SEQ: u32 = CTX_0;
    pub const TARGET_ADDR: u32 = 0x0C;
    pub const EVENT: u32 = CTX_1;

    // ISD-R select response
    pub const ISD_R_APP_TEMPLATE: u32 = 0xE0;
    pub const VERSION: u32 = 0x82;

    /// Tag list requested for each profile record
    pub const EUICC_PROFILE_TAGS: &[u8] = &[
        ICCID as u8,
        NICKNAME as u8,
        SERVICE_PROVIDER_NAME as u8,
        PROFILE_NAME as u8,
        OPERATOR_ID as u8,
        (PROFILE_STATE >> 8) as u8,
        PROFILE_STATE as u8,
        PROFILE_CLASS as u8,
        PROFILE_POLICY_RULE as u8,
        (CARRIER_PRIVILEGE_RULES >> 8) as u8,
        CARRIER_PRIVILEGE_RULES as u8,
    ];

    /// Tag list for elements supporting multiple enabled profiles
    pub const EUICC_PROFILE_MEP_TAGS: &[u8] = &[
        ICCID as u8,
        NICKNAME as u8,
        SERVICE_PROVIDER_NAME as u8,
        PROFILE_NAME as u8,
        OPERATOR_ID as u8,
        (PROFILE_STATE >> 8) as u8,
        PROFILE_STATE as u8,
        PROFILE_CLASS as u8,
        PROFILE_POLICY_RULE as u8,
        (CARRIER_PRIVILEGE_RULES >> 8) as u8,
        CARRIER_PRIVILEGE_RULES as u8,
        (PORT >> 8) as u8,
        PORT as u8,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexify() {
        assert_eq!(hexify(&[0xBF, 0x2D, 0x00]), "BF 2D 00");
        assert_eq!(hexify(&[]), "");
    }

    #[test]
    fn test_profile_tag_lists() {
        assert_eq!(hex::encode_upper(tags::EUICC_PROFILE_TAGS), "5A909192B79F709599BF76");
        assert_eq!(
            &tags::EUICC_PROFILE_MEP_TAGS[..tags::EUICC_PROFILE_TAGS.len()],
            tags::EUICC_PROFILE_TAGS
        );
        assert!(tags::EUICC_PROFILE_MEP_TAGS.ends_with(&[0x9F, 0x24]));
    }
}
