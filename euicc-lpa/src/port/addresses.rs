//! Configured server addresses and the Rules Authorisation Table

use serde::Serialize;

use super::{
    expect_result, parse_response, parse_simple_result, CarrierIdentifier, EuiccPort, CODE_OK,
};
use crate::channel::SecureElement;
use crate::error::{Operation, Result};
use crate::tlv::{tags, TLVBuilder, TLV};

/// One RAT entry: which operators may set which policy rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulesAuthTableEntry {
    pub policy_rules: u32,
    pub carrier_identifiers: Vec<CarrierIdentifier>,
    pub policy_rule_flags: u32,
}

/// Rules Authorisation Table of the eUICC
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RulesAuthTable {
    pub entries: Vec<RulesAuthTableEntry>,
}

impl RulesAuthTable {
    fn from_tlv(root: &TLV) -> Result<Self> {
        let mut entries = Vec::new();
        for node in root.children_with_tag(tags::CTX_COMP_0) {
            let rule = node.child(&[tags::SEQUENCE])?;
            let carrier_identifiers = rule
                .child(&[tags::CTX_COMP_1])?
                .children()
                .iter()
                .map(CarrierIdentifier::from_tlv)
                .collect::<Result<Vec<_>>>()?;
            entries.push(RulesAuthTableEntry {
                policy_rules: rule.child(&[tags::CTX_0])?.as_bits()?,
                carrier_identifiers,
                policy_rule_flags: rule.child(&[tags::CTX_2])?.as_bits()?,
            });
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E: SecureElement> EuiccPort<E> {
    async fn configured_address(&self, tag: u32) -> Result<String> {
        let request = TLVBuilder::new(tags::GET_CONFIGURED_ADDRESSES).build();
        self.send_request(request, move |data| {
            Ok(parse_response(data)?.child(&[tag])?.as_string()?)
        })
        .await
    }

    /// Default SM-DP+ address configured on the eUICC
    pub async fn get_default_smdp_address(&self) -> Result<String> {
        self.configured_address(tags::CTX_0).await
    }

    /// Root SM-DS address configured on the eUICC
    pub async fn get_smds_address(&self) -> Result<String> {
        self.configured_address(tags::CTX_1).await
    }

    pub async fn set_default_smdp_address(&self, address: &str) -> Result<()> {
        let request = TLVBuilder::new(tags::SET_DEFAULT_SMDP_ADDRESS)
            .add_string(tags::CTX_0, address)
            .build();

        self.send_request(request, |data| {
            expect_result(
                parse_simple_result(data)?,
                &[CODE_OK],
                Operation::SetDefaultSmdpAddress,
            )
        })
        .await
    }

    pub async fn get_rules_auth_table(&self) -> Result<RulesAuthTable> {
        let request = TLVBuilder::new(tags::GET_RAT).build();
        self.send_request(request, |data| RulesAuthTable::from_tlv(&parse_response(data)?))
            .await
    }
}
