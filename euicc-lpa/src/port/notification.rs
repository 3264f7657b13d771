//! Pending notifications and their retrieval

use log::debug;
use serde::Serialize;

use super::{
    check_simple_error, expect_result, parse_response, parse_simple_result, EuiccPort,
    CODE_NOTHING_TO_DELETE, CODE_NO_RESULT_AVAILABLE, CODE_OK,
};
use crate::channel::SecureElement;
use crate::error::{EuiccError, Operation, Result};
use crate::tlv::{tags, TLVBuilder, TLV};

/// Notification event bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NotificationEvents(pub u32);

impl NotificationEvents {
    pub const INSTALL: u32 = 1;
    pub const ENABLE: u32 = 1 << 1;
    pub const DISABLE: u32 = 1 << 2;
    pub const DELETE: u32 = 1 << 3;
    pub const ALL: u32 = Self::INSTALL | Self::ENABLE | Self::DISABLE | Self::DELETE;

    pub fn contains(&self, event: u32) -> bool {
        self.0 & event == event
    }
}

/// A notification pending on the eUICC
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub seq: i32,
    /// SM-DP+ address the notification goes to
    pub target_address: String,
    pub events: NotificationEvents,
    /// Complete signed notification, None for bare metadata
    pub data: Option<Vec<u8>>,
}

impl Notification {
    /// Build from a metadata node (`BF2F`), an install result (`BF37`) or
    /// another signed notification wrapping the metadata
    pub(crate) fn from_tlv(node: &TLV) -> Result<Self> {
        let metadata = match node.tag {
            tags::NOTIFICATION_METADATA => node,
            tags::PROFILE_INSTALLATION_RESULT => node.child(&[
                tags::PROFILE_INSTALLATION_RESULT_DATA,
                tags::NOTIFICATION_METADATA,
            ])?,
            _ => node.child(&[tags::NOTIFICATION_METADATA])?,
        };

        let data = if node.tag == tags::NOTIFICATION_METADATA {
            None
        } else {
            Some(node.raw().into_owned())
        };

        Ok(Self {
            seq: metadata.child(&[tags::SEQ])?.as_integer()?,
            target_address: metadata.child(&[tags::TARGET_ADDR])?.as_string()?,
            events: NotificationEvents(metadata.child(&[tags::EVENT])?.as_bits()?),
            data,
        })
    }
}

impl<E: SecureElement> EuiccPort<E> {
    /// Metadata of the notifications matching `events`
    pub async fn list_notifications(
        &self,
        events: NotificationEvents,
    ) -> Result<Vec<Notification>> {
        let request = TLVBuilder::new(tags::LIST_NOTIFICATION)
            .add_bits(tags::EVENT, events.0)
            .build();

        self.send_request(request, |data| {
            let root = parse_response(data)?;
            check_simple_error(&root, Operation::ListNotifications)?;
            root.child(&[tags::CTX_COMP_0])?
                .children()
                .iter()
                .map(Notification::from_tlv)
                .collect()
        })
        .await
    }

    /// Signed notifications matching `events`
    ///
    /// An element with nothing to report yields an empty list.
    pub async fn retrieve_notification_list(
        &self,
        events: NotificationEvents,
    ) -> Result<Vec<Notification>> {
        let request = TLVBuilder::new(tags::RETRIEVE_NOTIFICATIONS_LIST)
            .add_builder(TLVBuilder::new(tags::CTX_COMP_0).add_bits(tags::EVENT, events.0))
            .build();

        self.send_request(request, |data| {
            let root = parse_response(data)?;
            if let Some(error) = root.find_child(tags::CTX_1) {
                let code = error.as_integer()?;
                if code == CODE_NO_RESULT_AVAILABLE {
                    debug!("No notifications available");
                    return Ok(Vec::new());
                }
                return Err(EuiccError::operation_failed(
                    Operation::RetrieveNotification,
                    code,
                ));
            }
            root.child(&[tags::CTX_COMP_0])?
                .children()
                .iter()
                .map(Notification::from_tlv)
                .collect()
        })
        .await
    }

    /// The signed notification with sequence number `seq`
    pub async fn retrieve_notification(&self, seq: i32) -> Result<Option<Notification>> {
        let request = TLVBuilder::new(tags::RETRIEVE_NOTIFICATIONS_LIST)
            .add_builder(TLVBuilder::new(tags::CTX_COMP_0).add_integer(tags::SEQ, seq))
            .build();

        self.send_request(request, |data| {
            let root = parse_response(data)?;
            check_simple_error(&root, Operation::RetrieveNotification)?;
            match root.child(&[tags::CTX_COMP_0])?.children().first() {
                Some(node) => Ok(Some(Notification::from_tlv(node)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Drop the notification `seq` once it was delivered
    ///
    /// Removing an unknown sequence number succeeds.
    pub async fn remove_notification_from_list(&self, seq: i32) -> Result<()> {
        let request = TLVBuilder::new(tags::REMOVE_NOTIFICATION_FROM_LIST)
            .add_integer(tags::SEQ, seq)
            .build();

        self.send_request(request, |data| {
            expect_result(
                parse_simple_result(data)?,
                &[CODE_OK, CODE_NOTHING_TO_DELETE],
                Operation::RemoveNotificationFromList,
            )
        })
        .await
    }
}
