//! eUICC port: the SGP.22 ES10 operation set
//!
//! Every operation encodes one request node, runs it through the
//! [`ApduSender`] and interprets the response. Element-reported codes that
//! mean "already done" are folded into success; other codes become
//! [`EuiccError::OperationFailed`].

mod addresses;
mod bpp;
mod device;
mod notification;
mod profile;
mod provisioning;

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use once_cell::sync::OnceCell;

pub use addresses::{RulesAuthTable, RulesAuthTableEntry};
pub use bpp::BoundProfilePackage;
pub use device::{decode_device_id, device_capabilities, encode_device_id, tac};
pub use notification::{Notification, NotificationEvents};
pub use profile::{
    AccessRule, CarrierIdentifier, PolicyRules, ProfileClass, ProfileInfo, ProfileState,
    ResetOptions,
};
pub use provisioning::CancelReason;

use crate::apdu::RequestBuilder;
use crate::card::SpecVersion;
use crate::channel::{ApduSender, IntermediatePredicate, SecureElement};
use crate::config::LpaConfig;
use crate::error::{EuiccError, Operation, Result};
use crate::tlv::{decode, tags, TLVBuilder, TLV};

/// Element code for success
pub(crate) const CODE_OK: i32 = 0;
/// Element code for "profile already in the requested state"
pub(crate) const CODE_PROFILE_NOT_IN_EXPECTED_STATE: i32 = 2;
/// Element code for "nothing to delete"
pub(crate) const CODE_NOTHING_TO_DELETE: i32 = 1;
/// Element code for "no result available"
pub(crate) const CODE_NO_RESULT_AVAILABLE: i32 = 1;

/// The ISD-R of one eUICC port
pub struct EuiccPort<E> {
    sender: ApduSender<E>,
    config: LpaConfig,
    eid: OnceCell<String>,
    multiple_enabled_profiles: AtomicBool,
    device_id: Option<String>,
}

impl<E: SecureElement> EuiccPort<E> {
    /// Create a port driving `element`
    ///
    /// `eid` is the identifier already known from the card status, if any.
    pub fn new(element: E, config: LpaConfig, eid: Option<&str>) -> Result<Self> {
        let aid = config.isd_r_aid_bytes()?;
        let sender = ApduSender::new(
            element,
            aid,
            config.extended_apdu,
            config.min_spec_version,
            config.max_spec_version,
        );
        let port = Self {
            sender,
            multiple_enabled_profiles: AtomicBool::new(config.supports_multiple_enabled_profiles),
            config,
            eid: OnceCell::new(),
            device_id: None,
        };
        match eid {
            Some(eid) if !eid.is_empty() => port.update_eid(eid),
            _ => warn!("No EID given for the eUICC port"),
        }
        Ok(port)
    }

    /// Set the device IMEI reported during server authentication
    pub fn with_device_id(mut self, imei: impl Into<String>) -> Self {
        self.device_id = Some(imei.into());
        self
    }

    pub fn config(&self) -> &LpaConfig {
        &self.config
    }

    /// Cached EID, None until resolved
    pub fn eid(&self) -> Option<String> {
        self.eid.get().cloned()
    }

    /// Record the EID reported by a card status refresh
    ///
    /// Empty values are ignored. The first EID stored wins.
    pub fn update_eid(&self, eid: &str) {
        if eid.is_empty() {
            return;
        }
        if let Err(rejected) = self.eid.set(eid.to_string()) {
            if self.eid.get() != Some(&rejected) {
                warn!("Ignoring EID update, the EID is already resolved");
            }
        }
    }

    pub fn supports_multiple_enabled_profiles(&self) -> bool {
        self.multiple_enabled_profiles.load(Ordering::Relaxed)
    }

    /// Update the multiple enabled profiles flag after creation
    pub fn set_supports_multiple_enabled_profiles(&self, supported: bool) {
        debug!("Multiple enabled profiles support: {}", supported);
        self.multiple_enabled_profiles.store(supported, Ordering::Relaxed);
    }

    /// Version detected so far, without touching the element
    pub fn spec_version(&self) -> Option<SpecVersion> {
        self.sender.spec_version()
    }

    /// SGP.22 version of the eUICC, opening a channel if not known yet
    pub async fn get_spec_version(&self) -> Result<SpecVersion> {
        if let Some(version) = self.sender.spec_version() {
            return Ok(version);
        }
        self.sender.send(|_, _| Ok(()), |_| Ok(()), None).await?;
        self.sender
            .spec_version()
            .ok_or(EuiccError::CannotDetermineVersion)
    }

    /// EID of the eUICC, read from the element when not cached
    pub async fn get_eid(&self) -> Result<String> {
        if let Some(eid) = self.eid() {
            return Ok(eid);
        }
        let request = TLVBuilder::new(tags::GET_EID)
            .add_bytes(tags::TAG_LIST, &[tags::EID as u8])
            .build();
        let eid = self
            .send_request(request, |data| {
                let root = parse_response(data)?;
                Ok(hex::encode_upper(root.child(&[tags::EID])?.as_bytes()?))
            })
            .await?;
        self.update_eid(&eid);
        Ok(self.eid().unwrap_or(eid))
    }

    /// Diagnostic snapshot for operational tooling
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "EuiccPort:");
        let _ = writeln!(out, "  eid={}", self.eid().unwrap_or_default());
        let _ = writeln!(
            out,
            "  specVersion={}",
            self.spec_version()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        let _ = writeln!(
            out,
            "  supportsMultipleEnabledProfiles={}",
            self.supports_multiple_enabled_profiles()
        );
        out
    }

    /// Send a single request node and parse the response data
    pub(crate) async fn send_request<T, P>(&self, request: TLV, parse: P) -> Result<T>
    where
        P: FnOnce(&[u8]) -> Result<T> + Send,
        T: Send,
    {
        let payload = request.encode();
        self.sender
            .send(
                move |_, builder: &mut RequestBuilder| {
                    builder.add_store_data(&payload);
                    Ok(())
                },
                parse,
                None,
            )
            .await
    }

    /// Send a request whose content depends on the detected version
    pub(crate) async fn send_with<T, B, P>(
        &self,
        build: B,
        parse: P,
        intermediate: Option<IntermediatePredicate>,
    ) -> Result<T>
    where
        B: FnOnce(SpecVersion, &mut RequestBuilder) -> Result<()> + Send,
        P: FnOnce(&[u8]) -> Result<T> + Send,
        T: Send,
    {
        self.sender.send(build, parse, intermediate).await
    }

    #[cfg(test)]
    pub(crate) fn element(&self) -> &E {
        self.sender.element()
    }
}

/// Decode the root node of a response
pub(crate) fn parse_response(data: &[u8]) -> Result<TLV> {
    if data.is_empty() {
        return Err(EuiccError::EmptyResponse);
    }
    Ok(decode(data)?)
}

/// Read the result code under tag `80`
pub(crate) fn parse_simple_result(data: &[u8]) -> Result<i32> {
    let root = parse_response(data)?;
    Ok(root.child(&[tags::CTX_0])?.as_integer()?)
}

/// Fail with the code under tag `81` when the element reports one
pub(crate) fn check_simple_error(root: &TLV, operation: Operation) -> Result<()> {
    if let Some(error) = root.find_child(tags::CTX_1) {
        return Err(EuiccError::operation_failed(operation, error.as_integer()?));
    }
    Ok(())
}

/// Map a simple result to success when it is one of `accepted`
pub(crate) fn expect_result(code: i32, accepted: &[i32], operation: Operation) -> Result<()> {
    if accepted.contains(&code) {
        Ok(())
    } else {
        Err(EuiccError::operation_failed(operation, code))
    }
}
