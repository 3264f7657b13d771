//! Bound profile package segmentation
//!
//! A BPP (`BF36`) carries, in order: the secure channel initialisation
//! (`BF23`), the ISD-P configuration (`A0`), the metadata records (`A1` of
//! `88`), optional replacement session keys (`A2`) and the profile elements
//! (`A3` of `86`). It is sent to the eUICC as one STORE DATA payload per
//! segment, with the `A1` and `A3` containers split into their header and
//! one payload per record.

use log::debug;

use crate::card::SpecVersion;
use crate::error::{EuiccError, Result};
use crate::tlv::{decode, tags, TLVParser, TLV};

#[derive(Debug, Clone)]
pub struct BoundProfilePackage {
    /// Root tag and length as received
    head: Vec<u8>,
    declared_len: usize,
    initialise_secure_channel: TLV,
    configure_isdp: TLV,
    store_metadata: TLV,
    replace_session_keys: Option<TLV>,
    profile_elements: TLV,
}

impl BoundProfilePackage {
    /// Split a package into its segments
    ///
    /// A missing mandatory segment makes the package malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = TLVParser::parse_header(data).map_err(malformed)?;
        let root = decode(data).map_err(malformed)?;
        if root.tag != tags::BOUND_PROFILE_PACKAGE {
            return Err(EuiccError::MalformedPackage(format!(
                "unexpected root tag 0x{:X}",
                root.tag
            )));
        }

        let segment = |tag: u32| -> Result<TLV> {
            root.find_child(tag).cloned().ok_or_else(|| {
                EuiccError::MalformedPackage(format!("missing segment 0x{:X}", tag))
            })
        };

        Ok(Self {
            head: data[..header.header_len].to_vec(),
            declared_len: header.value_len,
            initialise_secure_channel: segment(tags::INITIALISE_SECURE_CHANNEL)?,
            configure_isdp: segment(tags::CTX_COMP_0)?,
            store_metadata: segment(tags::CTX_COMP_1)?,
            replace_session_keys: root.find_child(tags::CTX_COMP_2).cloned(),
            profile_elements: segment(tags::CTX_COMP_3)?,
        })
    }

    /// Length of the root value as declared in its header
    pub fn declared_len(&self) -> usize {
        self.declared_len
    }

    /// Sum of the received lengths of the known segments
    pub fn segmented_len(&self) -> usize {
        self.initialise_secure_channel.raw_len()
            + self.configure_isdp.raw_len()
            + self.store_metadata.raw_len()
            + self.replace_session_keys.as_ref().map_or(0, TLV::raw_len)
            + self.profile_elements.raw_len()
    }

    fn metadata(&self) -> Vec<&TLV> {
        self.store_metadata.children_with_tag(tags::CTX_8)
    }

    fn elements(&self) -> Vec<&TLV> {
        self.profile_elements.children_with_tag(tags::CTX_6)
    }

    /// Check the segmentation rules that apply from SGP.22 2.1 on
    ///
    /// The package must carry at least one profile element and nothing
    /// besides the known segments.
    pub fn validate(&self, version: SpecVersion) -> Result<()> {
        if version < SpecVersion::V2_1 {
            return Ok(());
        }
        if self.elements().is_empty() {
            return Err(EuiccError::MalformedPackage("no profile elements".to_string()));
        }
        let segmented = self.segmented_len();
        if segmented != self.declared_len {
            return Err(EuiccError::MalformedPackage(format!(
                "declared length {} does not match segmented length {}",
                self.declared_len, segmented
            )));
        }
        Ok(())
    }

    /// STORE DATA payloads in transmission order
    ///
    /// Segments are sent exactly as received from the SM-DP+.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();

        let mut first = self.head.clone();
        first.extend_from_slice(&self.initialise_secure_channel.raw());
        payloads.push(first);

        payloads.push(self.configure_isdp.raw().into_owned());

        payloads.push(self.store_metadata.raw_head());
        payloads.extend(self.metadata().into_iter().map(|m| m.raw().into_owned()));

        if let Some(keys) = &self.replace_session_keys {
            payloads.push(keys.raw().into_owned());
        }

        payloads.push(self.profile_elements.raw_head());
        payloads.extend(self.elements().into_iter().map(|e| e.raw().into_owned()));

        debug!(
            "BPP segmented into {} payloads ({} metadata, {} elements)",
            payloads.len(),
            self.metadata().len(),
            self.elements().len()
        );
        payloads
    }
}

fn malformed(err: crate::tlv::TLVError) -> EuiccError {
    EuiccError::MalformedPackage(err.to_string())
}
