//! Profile records and the profile lifecycle operations

use log::{debug, error};
use serde::Serialize;

use super::{
    expect_result, parse_response, parse_simple_result, EuiccPort, CODE_NOTHING_TO_DELETE,
    CODE_OK, CODE_PROFILE_NOT_IN_EXPECTED_STATE,
};
use crate::bcd::{iccid_from_bytes, iccid_to_bytes, printable_iccid};
use crate::channel::{tolerate_refresh, SecureElement};
use crate::error::{EuiccError, Operation, Result};
use crate::tlv::{tags, TLVBuilder, TLV};

/// Profile state as reported by the element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProfileState {
    Disabled,
    Enabled,
    Other(i32),
}

impl From<i32> for ProfileState {
    fn from(code: i32) -> Self {
        match code {
            0 => ProfileState::Disabled,
            1 => ProfileState::Enabled,
            other => ProfileState::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ProfileClass {
    Testing,
    Provisioning,
    #[default]
    Operational,
    Other(i32),
}

impl From<i32> for ProfileClass {
    fn from(code: i32) -> Self {
        match code {
            0 => ProfileClass::Testing,
            1 => ProfileClass::Provisioning,
            2 => ProfileClass::Operational,
            other => ProfileClass::Other(other),
        }
    }
}

/// Profile policy rules bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PolicyRules(pub u32);

impl PolicyRules {
    pub const DO_NOT_DISABLE: u32 = 1;
    pub const DO_NOT_DELETE: u32 = 1 << 1;
    pub const DELETE_AFTER_DISABLING: u32 = 1 << 2;

    pub fn contains(&self, rule: u32) -> bool {
        self.0 & rule == rule
    }
}

/// Options for `reset_memory`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOptions(pub u32);

impl ResetOptions {
    pub const DELETE_OPERATIONAL_PROFILES: u32 = 1;
    pub const DELETE_FIELD_LOADED_TEST_PROFILES: u32 = 1 << 1;
    pub const RESET_DEFAULT_SMDP_ADDRESS: u32 = 1 << 2;
}

/// Operator identity: PLMN plus optional group identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarrierIdentifier {
    pub mcc: String,
    pub mnc: String,
    pub gid1: Option<String>,
    pub gid2: Option<String>,
}

impl CarrierIdentifier {
    /// Decode MCC/MNC from a 3-byte PLMN
    ///
    /// Digits are nibble swapped; a filler `F` shortens the MNC to two digits.
    pub fn from_plmn(plmn: &[u8], gid1: Option<String>, gid2: Option<String>) -> Result<Self> {
        if plmn.len() != 3 {
            return Err(EuiccError::InvalidData(format!(
                "PLMN of {} bytes",
                plmn.len()
            )));
        }
        let h: Vec<char> = hex::encode_upper(plmn).chars().collect();
        let mcc: String = [h[1], h[0], h[3]].iter().collect();
        let mut mnc: String = [h[5], h[4], h[2]].iter().collect();
        if mnc.ends_with('F') {
            mnc.pop();
        }
        Ok(Self {
            mcc,
            mnc,
            gid1,
            gid2,
        })
    }

    /// Decode an operator identifier node: `80` PLMN, `81` GID1, `82` GID2
    pub(crate) fn from_tlv(node: &TLV) -> Result<Self> {
        let gid = |tag| -> Result<Option<String>> {
            match node.find_child(tag) {
                Some(child) => Ok(Some(hex::encode_upper(child.as_bytes()?))),
                None => Ok(None),
            }
        };
        let gid1 = gid(tags::CTX_1)?;
        let gid2 = gid(tags::CTX_2)?;
        Self::from_plmn(node.child(&[tags::CTX_0])?.as_bytes()?, gid1, gid2)
    }
}

/// Carrier privilege rule (GlobalPlatform REF-AR-DO)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessRule {
    /// Hash of the certificate allowed to manage the profile
    pub certificate_hash: Vec<u8>,
    pub package_name: Option<String>,
    pub access_type: i64,
}

impl AccessRule {
    fn from_tlv(node: &TLV) -> Result<Self> {
        let ref_do = node.child(&[tags::REF_DO])?;
        let certificate_hash = ref_do
            .child(&[tags::DEVICE_APP_ID_REF_DO])?
            .as_bytes()?
            .to_vec();
        let package_name = match ref_do.find_child(tags::PKG_REF_DO) {
            Some(pkg) => Some(pkg.as_string()?),
            None => None,
        };
        let access_type = match node.child(&[tags::AR_DO, tags::PERM_AR_DO]) {
            Ok(perm) => perm.as_raw_long()?,
            Err(_) => 0,
        };
        Ok(Self {
            certificate_hash,
            package_name,
            access_type,
        })
    }
}

/// A profile installed on the eUICC
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileInfo {
    pub iccid: String,
    pub nickname: Option<String>,
    pub service_provider_name: Option<String>,
    pub profile_name: Option<String>,
    pub carrier_identifier: Option<CarrierIdentifier>,
    pub state: ProfileState,
    pub profile_class: ProfileClass,
    pub policy_rules: Option<PolicyRules>,
    pub access_rules: Option<Vec<AccessRule>>,
}

impl ProfileInfo {
    /// Build from a `E3` ProfileInfo record
    pub(crate) fn from_tlv(node: &TLV) -> Result<Self> {
        let iccid = iccid_from_bytes(node.child(&[tags::ICCID])?.as_bytes()?);

        let string = |tag| -> Result<Option<String>> {
            match node.find_child(tag) {
                Some(child) => Ok(Some(child.as_string()?)),
                None => Ok(None),
            }
        };

        let carrier_identifier = match node.find_child(tags::OPERATOR_ID) {
            Some(op) => Some(CarrierIdentifier::from_tlv(op)?),
            None => None,
        };

        // On a multiple enabled profiles eUICC, a valid port index marks the
        // profile enabled on that port.
        let state = match node.find_child(tags::PROFILE_STATE) {
            Some(state) => {
                let on_port = match node.find_child(tags::PORT) {
                    Some(port) => port.as_integer()? >= 0,
                    None => false,
                };
                if on_port {
                    ProfileState::Enabled
                } else {
                    ProfileState::from(state.as_integer()?)
                }
            }
            None => ProfileState::Disabled,
        };

        let profile_class = match node.find_child(tags::PROFILE_CLASS) {
            Some(class) => ProfileClass::from(class.as_integer()?),
            None => ProfileClass::Operational,
        };

        let policy_rules = match node.find_child(tags::PROFILE_POLICY_RULE) {
            Some(rules) => Some(PolicyRules(rules.as_bits()?)),
            None => None,
        };

        let access_rules = match node.find_child(tags::CARRIER_PRIVILEGE_RULES) {
            Some(rules) => {
                let parsed = rules
                    .children_with_tag(tags::REF_AR_DO)
                    .into_iter()
                    .map(AccessRule::from_tlv)
                    .collect::<Result<Vec<_>>>()?;
                if parsed.is_empty() {
                    None
                } else {
                    Some(parsed)
                }
            }
            None => None,
        };

        Ok(Self {
            iccid,
            nickname: string(tags::NICKNAME)?,
            service_provider_name: string(tags::SERVICE_PROVIDER_NAME)?,
            profile_name: string(tags::PROFILE_NAME)?,
            carrier_identifier,
            state,
            profile_class,
            policy_rules,
            access_rules,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ProfileState::Enabled
    }
}

impl<E: SecureElement> EuiccPort<E> {
    fn profile_tags(&self) -> &'static [u8] {
        if self.supports_multiple_enabled_profiles() {
            tags::EUICC_PROFILE_MEP_TAGS
        } else {
            tags::EUICC_PROFILE_TAGS
        }
    }

    /// List every profile on the eUICC
    ///
    /// Records without an ICCID are skipped.
    pub async fn get_all_profiles(&self) -> Result<Vec<ProfileInfo>> {
        let request = TLVBuilder::new(tags::GET_PROFILES)
            .add_bytes(tags::TAG_LIST, self.profile_tags())
            .build();

        self.send_request(request, |data| {
            let root = parse_response(data)?;
            let mut profiles = Vec::new();
            for node in root.child(&[tags::CTX_COMP_0])?.children_with_tag(tags::PROFILE_INFO) {
                if !node.has_child(&[tags::ICCID]) {
                    error!("Profile must have an ICCID");
                    continue;
                }
                profiles.push(ProfileInfo::from_tlv(node)?);
            }
            Ok(profiles)
        })
        .await
    }

    /// Get the profile with `iccid`, None when the eUICC has no such profile
    pub async fn get_profile(&self, iccid: &str) -> Result<Option<ProfileInfo>> {
        let request = TLVBuilder::new(tags::GET_PROFILES)
            .add_builder(
                TLVBuilder::new(tags::CTX_COMP_0).add_bytes(tags::ICCID, &iccid_to_bytes(iccid)),
            )
            .add_bytes(tags::TAG_LIST, self.profile_tags())
            .build();

        self.send_request(request, |data| {
            let root = parse_response(data)?;
            let profiles = root.child(&[tags::CTX_COMP_0])?.children_with_tag(tags::PROFILE_INFO);
            match profiles.first() {
                Some(node) => Ok(Some(ProfileInfo::from_tlv(node)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Disable the profile with `iccid`
    ///
    /// Disabling an already disabled profile succeeds.
    pub async fn disable_profile(&self, iccid: &str, refresh: bool) -> Result<()> {
        let request = TLVBuilder::new(tags::DISABLE_PROFILE)
            .add_builder(
                TLVBuilder::new(tags::CTX_COMP_0).add_bytes(tags::ICCID, &iccid_to_bytes(iccid)),
            )
            .add_bool(tags::CTX_1, refresh)
            .build();

        let printable = printable_iccid(iccid);
        let result = self
            .send_request(request, move |data| {
                let code = parse_simple_result(data)?;
                if code == CODE_PROFILE_NOT_IN_EXPECTED_STATE {
                    debug!("Profile is already disabled, iccid: {}", printable);
                }
                expect_result(
                    code,
                    &[CODE_OK, CODE_PROFILE_NOT_IN_EXPECTED_STATE],
                    Operation::DisableProfile,
                )
            })
            .await;
        tolerate_refresh(result)
    }

    /// Enable the profile with `iccid`, disabling the current one
    ///
    /// Switching to the already enabled profile succeeds.
    pub async fn switch_to_profile(&self, iccid: &str, refresh: bool) -> Result<()> {
        let request = TLVBuilder::new(tags::ENABLE_PROFILE)
            .add_builder(
                TLVBuilder::new(tags::CTX_COMP_0).add_bytes(tags::ICCID, &iccid_to_bytes(iccid)),
            )
            .add_bool(tags::CTX_1, refresh)
            .build();

        let printable = printable_iccid(iccid);
        let result = self
            .send_request(request, move |data| {
                let code = parse_simple_result(data)?;
                if code == CODE_PROFILE_NOT_IN_EXPECTED_STATE {
                    debug!("Profile is already enabled, iccid: {}", printable);
                }
                expect_result(
                    code,
                    &[CODE_OK, CODE_PROFILE_NOT_IN_EXPECTED_STATE],
                    Operation::SwitchToProfile,
                )
            })
            .await;
        tolerate_refresh(result)
    }

    pub async fn set_nickname(&self, iccid: &str, nickname: &str) -> Result<()> {
        let request = TLVBuilder::new(tags::SET_NICKNAME)
            .add_bytes(tags::ICCID, &iccid_to_bytes(iccid))
            .add_string(tags::NICKNAME, nickname)
            .build();

        self.send_request(request, |data| {
            expect_result(parse_simple_result(data)?, &[CODE_OK], Operation::SetNickname)
        })
        .await
    }

    pub async fn delete_profile(&self, iccid: &str) -> Result<()> {
        let request = TLVBuilder::new(tags::DELETE_PROFILE)
            .add_bytes(tags::ICCID, &iccid_to_bytes(iccid))
            .build();

        self.send_request(request, |data| {
            expect_result(parse_simple_result(data)?, &[CODE_OK], Operation::DeleteProfile)
        })
        .await
    }

    /// Reset the eUICC memory; `options` is a [`ResetOptions`] bit set
    ///
    /// "Nothing to delete" counts as success.
    pub async fn reset_memory(&self, options: ResetOptions) -> Result<()> {
        let request = TLVBuilder::new(tags::EUICC_MEMORY_RESET)
            .add_bits(tags::CTX_2, options.0)
            .build();

        let result = self
            .send_request(request, |data| {
                expect_result(
                    parse_simple_result(data)?,
                    &[CODE_OK, CODE_NOTHING_TO_DELETE],
                    Operation::ResetMemory,
                )
            })
            .await;
        tolerate_refresh(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::SW;
    use crate::card::SpecVersion;
    use crate::port::tests::port_with;
    use crate::tlv::decode;

    const ICCID: &str = "8901000000000000000";

    // BF2D { A0 { E3 { 5A iccid, 90 "Work", 91 "Carrier", 92 "Profile",
    //   B7 { 80 130014, 81 0A }, 9F70 01, 95 02, 99 0640 } } }
    const PROFILES: &str = "BF2D3DA03BE3395A0A981000000000000000F09004576F726B\
        910743617272696572920750726F66696C65B708800313001481010A9F7001019501029902\
        0640";

    #[test]
    fn test_carrier_identifier() {
        let id = CarrierIdentifier::from_plmn(&[0x13, 0x00, 0x14], None, None).unwrap();
        assert_eq!(id.mcc, "310");
        assert_eq!(id.mnc, "410");

        let id = CarrierIdentifier::from_plmn(&[0x62, 0xF2, 0x10], Some("0A".into()), None).unwrap();
        assert_eq!(id.mcc, "262");
        assert_eq!(id.mnc, "01");
        assert_eq!(id.gid1.as_deref(), Some("0A"));

        assert!(CarrierIdentifier::from_plmn(&[0x13, 0x01], None, None).is_err());
    }

    #[test]
    fn test_profile_from_tlv() {
        let root = decode(&hex::decode(PROFILES).unwrap()).unwrap();
        let node = root.child(&[tags::CTX_COMP_0, tags::PROFILE_INFO]).unwrap();
        let profile = ProfileInfo::from_tlv(node).unwrap();

        assert_eq!(profile.iccid, ICCID);
        assert_eq!(profile.nickname.as_deref(), Some("Work"));
        assert_eq!(profile.service_provider_name.as_deref(), Some("Carrier"));
        assert_eq!(profile.profile_name.as_deref(), Some("Profile"));
        assert_eq!(profile.state, ProfileState::Enabled);
        assert!(profile.is_enabled());
        assert_eq!(profile.profile_class, ProfileClass::Operational);
        assert_eq!(profile.policy_rules, Some(PolicyRules(0x02)));
        assert!(profile.policy_rules.unwrap().contains(PolicyRules::DO_NOT_DELETE));

        let carrier = profile.carrier_identifier.unwrap();
        assert_eq!((carrier.mcc.as_str(), carrier.mnc.as_str()), ("310", "410"));
        assert_eq!(carrier.gid1.as_deref(), Some("0A"));
        assert!(profile.access_rules.is_none());
    }

    #[test]
    fn test_profile_defaults() {
        // E3 { 5A iccid } only
        let node = decode(&hex::decode("E30C5A0A981000000000000000F0").unwrap()).unwrap();
        let profile = ProfileInfo::from_tlv(&node).unwrap();
        assert_eq!(profile.state, ProfileState::Disabled);
        assert_eq!(profile.profile_class, ProfileClass::Operational);
        assert!(profile.nickname.is_none());
        assert!(profile.policy_rules.is_none());
    }

    #[test]
    fn test_profile_enabled_on_port() {
        // State says disabled, but the profile is enabled on port 0
        let node = decode(&hex::decode("E3145A0A981000000000000000F09F7001009F240100").unwrap())
            .unwrap();
        assert_eq!(ProfileInfo::from_tlv(&node).unwrap().state, ProfileState::Enabled);
    }

    #[test]
    fn test_access_rules() {
        // E3 { 5A iccid, BF76 { E2 { E1 { C1 hash, CA "com.a" }, E3 { DB 01 } } } }
        let data = "E3285A0A981000000000000000F0BF7619E217E10CC103AABBCCCA05636F6D2E61E307DB050000000001";
        let node = decode(&hex::decode(data).unwrap()).unwrap();
        let rules = ProfileInfo::from_tlv(&node).unwrap().access_rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].certificate_hash, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(rules[0].package_name.as_deref(), Some("com.a"));
        assert_eq!(rules[0].access_type, 1);
    }

    #[tokio::test]
    async fn test_get_all_profiles_skips_records_without_iccid() {
        let port = port_with(SpecVersion::V2_1);
        // BF2D { A0 { E3 { 90 "x" }, E3 { 5A iccid } } }
        port.element()
            .push_data("BF2D15A013E303900178E30C5A0A981000000000000000F0");

        let profiles = port.get_all_profiles().await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].iccid, ICCID);
        assert_eq!(
            hex::encode_upper(&port.element().sent_payloads()[0]),
            "BF2D0D5C0B5A909192B79F709599BF76"
        );
    }

    #[tokio::test]
    async fn test_get_all_profiles_mep_tags() {
        let port = port_with(SpecVersion::V2_1);
        port.set_supports_multiple_enabled_profiles(true);
        port.element().push_data("BF2D02A000");

        assert!(port.get_all_profiles().await.unwrap().is_empty());
        assert!(hex::encode_upper(&port.element().sent_payloads()[0]).ends_with("BF769F24"));
    }

    #[tokio::test]
    async fn test_get_profile() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data(PROFILES);

        let profile = port.get_profile(ICCID).await.unwrap().unwrap();
        assert_eq!(profile.nickname.as_deref(), Some("Work"));
        let request = hex::encode_upper(&port.element().sent_payloads()[0]);
        assert!(request.starts_with("BF2D1BA00C5A0A981000000000000000F05C0B"));
    }

    #[tokio::test]
    async fn test_get_profile_absent() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF2D02A000");
        assert!(port.get_profile(ICCID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disable_profile() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF3203800100");
        port.disable_profile(ICCID, true).await.unwrap();
        assert_eq!(
            hex::encode_upper(&port.element().sent_payloads()[0]),
            "BF3211A00C5A0A981000000000000000F08101FF"
        );
    }

    #[tokio::test]
    async fn test_disable_already_disabled_is_success() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF3203800102");
        assert!(port.disable_profile(ICCID, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_disable_failure() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF3203800101");
        let err = port.disable_profile(ICCID, false).await.unwrap_err();
        assert_eq!(err.operation_code(), Some((Operation::DisableProfile, 1)));
    }

    #[tokio::test]
    async fn test_disable_survives_refresh() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_status(SW::UNKNOWN_ERROR);
        assert!(port.disable_profile(ICCID, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_switch_to_profile() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF3103800102");
        port.switch_to_profile(ICCID, false).await.unwrap();
        assert!(hex::encode_upper(&port.element().sent_payloads()[0]).starts_with("BF3111A00C"));

        port.element().push_status(SW::UNKNOWN_ERROR);
        assert!(port.switch_to_profile(ICCID, true).await.is_ok());

        port.element().push_status(SW::WRONG_DATA);
        assert!(matches!(
            port.switch_to_profile(ICCID, true).await,
            Err(EuiccError::CommandFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_set_nickname() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF2903800100");
        port.set_nickname(ICCID, "Work").await.unwrap();
        assert_eq!(
            hex::encode_upper(&port.element().sent_payloads()[0]),
            "BF29125A0A981000000000000000F09004576F726B"
        );

        port.element().push_data("BF2903800101");
        let err = port.set_nickname(ICCID, "Work").await.unwrap_err();
        assert_eq!(err.operation_code(), Some((Operation::SetNickname, 1)));
    }

    #[tokio::test]
    async fn test_delete_profile() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF3303800100");
        port.delete_profile(ICCID).await.unwrap();
        assert_eq!(
            hex::encode_upper(&port.element().sent_payloads()[0]),
            "BF330C5A0A981000000000000000F0"
        );

        port.element().push_data("BF3303800102");
        let err = port.delete_profile(ICCID).await.unwrap_err();
        assert_eq!(err.operation_code(), Some((Operation::DeleteProfile, 2)));
    }

    #[tokio::test]
    async fn test_reset_memory_nothing_to_delete() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF3403800101");
        port.reset_memory(ResetOptions(ResetOptions::DELETE_OPERATIONAL_PROFILES))
            .await
            .unwrap();
        assert_eq!(
            hex::encode_upper(&port.element().sent_payloads()[0]),
            "BF340482020780"
        );
    }

    #[tokio::test]
    async fn test_reset_memory_failure_and_refresh() {
        let port = port_with(SpecVersion::V2_1);
        port.element().push_data("BF3403800105");
        let err = port.reset_memory(ResetOptions(7)).await.unwrap_err();
        assert_eq!(err.operation_code(), Some((Operation::ResetMemory, 5)));

        port.element().push_status(SW::UNKNOWN_ERROR);
        assert!(port.reset_memory(ResetOptions(7)).await.is_ok());
    }
}
