//! Command channel to the ISD-R
//!
//! [`SecureElement`] is the seam to the platform transport (modem, PC/SC
//! reader). [`ApduSender`] runs one logical exchange at a time on top of it:
//! open a logical channel, detect the SGP.22 version from the SELECT
//! response, transmit every STORE DATA block (following `61xx` with GET
//! RESPONSE), close the channel and hand the final response to a parser.

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::apdu::{RequestBuilder, Response, APDU, SW};
use crate::card::SpecVersion;
use crate::error::{EuiccError, Result};
use crate::tlv::hexify;

/// Transport level failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("APDU failed with status {0:04X}")]
    Status(u16),

    #[error("Logical channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Response still incomplete after {0} GET RESPONSE commands")]
    ResponseTooLong(usize),
}

/// Most `61xx` continuations followed for one APDU
pub const MAX_GET_RESPONSE: usize = 1024;

/// An open logical channel and the response to the SELECT that opened it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalChannel {
    pub channel: u8,
    pub select_response: Vec<u8>,
}

/// Request/response primitive provided by the platform
///
/// Implementations are shared with background tasks, for closing channels
/// of cancelled exchanges, hence the `'static` bound.
#[async_trait]
pub trait SecureElement: Send + Sync + 'static {
    /// Open a logical channel and SELECT `aid` on it
    async fn open_logical_channel(&self, aid: &[u8]) -> std::result::Result<LogicalChannel, ChannelError>;

    /// Send one APDU on `channel`
    async fn transmit(&self, channel: u8, apdu: &APDU) -> std::result::Result<Response, ChannelError>;

    async fn close_logical_channel(&self, channel: u8) -> std::result::Result<(), ChannelError>;
}

#[async_trait]
impl<T: SecureElement + ?Sized> SecureElement for Arc<T> {
    async fn open_logical_channel(&self, aid: &[u8]) -> std::result::Result<LogicalChannel, ChannelError> {
        (**self).open_logical_channel(aid).await
    }

    async fn transmit(&self, channel: u8, apdu: &APDU) -> std::result::Result<Response, ChannelError> {
        (**self).transmit(channel, apdu).await
    }

    async fn close_logical_channel(&self, channel: u8) -> std::result::Result<(), ChannelError> {
        (**self).close_logical_channel(channel).await
    }
}

/// Decides after each intermediate response whether to keep sending
pub type IntermediatePredicate = fn(&Response) -> bool;

/// Map the refresh status to success
///
/// Disabling, switching and resetting may make the element refresh before
/// it answers, in which case the modem reports `6F00` instead of a response.
pub fn tolerate_refresh(result: Result<()>) -> Result<()> {
    match result {
        Err(EuiccError::CommandFailed(ChannelError::Status(SW::UNKNOWN_ERROR))) => {
            info!("eUICC refreshed before responding, treating as success");
            Ok(())
        }
        other => other,
    }
}

/// A logical channel closed on drop if the exchange did not close it
///
/// Dropping happens when the caller abandons the exchange, for example
/// through a timeout. The close then runs on the current tokio runtime.
struct ChannelGuard<E: SecureElement> {
    element: Arc<E>,
    channel: u8,
    open: bool,
}

impl<E: SecureElement> ChannelGuard<E> {
    async fn close(mut self) {
        self.open = false;
        match self.element.close_logical_channel(self.channel).await {
            Ok(()) => debug!("Closed logical channel {}", self.channel),
            Err(e) => warn!("Failed to close logical channel {}: {}", self.channel, e),
        }
    }
}

impl<E: SecureElement> Drop for ChannelGuard<E> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let channel = self.channel;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Exchange abandoned, closing logical channel {} in the background",
                    channel
                );
                let element = Arc::clone(&self.element);
                handle.spawn(async move {
                    if let Err(e) = element.close_logical_channel(channel).await {
                        warn!("Failed to close logical channel {}: {}", channel, e);
                    }
                });
            }
            Err(_) => error!(
                "Exchange abandoned outside a runtime, logical channel {} left open",
                channel
            ),
        }
    }
}

/// Serializes logical exchanges with the ISD-R
pub struct ApduSender<E> {
    element: Arc<E>,
    aid: Vec<u8>,
    extended_apdu: bool,
    min_version: SpecVersion,
    max_version: Option<SpecVersion>,
    version: OnceCell<SpecVersion>,
    exchange: Mutex<()>,
}

impl<E: SecureElement> ApduSender<E> {
    pub fn new(
        element: E,
        aid: Vec<u8>,
        extended_apdu: bool,
        min_version: SpecVersion,
        max_version: Option<SpecVersion>,
    ) -> Self {
        Self {
            element: Arc::new(element),
            aid,
            extended_apdu,
            min_version,
            max_version,
            version: OnceCell::new(),
            exchange: Mutex::new(()),
        }
    }

    /// The transport this sender drives
    pub fn element(&self) -> &E {
        &self.element
    }

    /// Version detected by an earlier exchange, if any
    pub fn spec_version(&self) -> Option<SpecVersion> {
        self.version.get().copied()
    }

    /// Run one logical exchange
    ///
    /// `build` receives the detected version and fills the request; its
    /// errors abort the exchange before anything is transmitted. `parse`
    /// receives the data of the final response once the channel is closed.
    /// When given, `intermediate` sees every response but the last and may
    /// stop the exchange early, its response then becoming the final one.
    pub async fn send<T, B, P>(
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
        let _exchange = self.exchange.lock().await;

        let opened = self.element.open_logical_channel(&self.aid).await?;
        debug!("Opened logical channel {}", opened.channel);
        let guard = ChannelGuard {
            element: Arc::clone(&self.element),
            channel: opened.channel,
            open: true,
        };

        let outcome = self.run_exchange(&opened, build, intermediate).await;
        guard.close().await;

        let data = outcome?;
        parse(&data)
    }

    async fn run_exchange<B>(
        &self,
        opened: &LogicalChannel,
        build: B,
        intermediate: Option<IntermediatePredicate>,
    ) -> Result<Vec<u8>>
    where
        B: FnOnce(SpecVersion, &mut RequestBuilder) -> Result<()> + Send,
    {
        let version = self.resolve_version(&opened.select_response)?;

        let mut request = RequestBuilder::new(self.extended_apdu);
        build(version, &mut request)?;
        let apdus = request.into_apdus();
        if apdus.is_empty() {
            return Ok(Vec::new());
        }

        let last = apdus.len() - 1;
        for (index, apdu) in apdus.iter().enumerate() {
            let response = self.transmit_complete(opened.channel, apdu).await?;

            if index == last || !response.is_okay() {
                return Self::finish(response);
            }
            if let Some(should_continue) = intermediate {
                if !should_continue(&response) {
                    debug!("Exchange stopped after {} of {} APDUs", index + 1, apdus.len());
                    return Self::finish(response);
                }
            }
        }
        Ok(Vec::new())
    }

    fn finish(response: Response) -> Result<Vec<u8>> {
        if response.is_okay() {
            Ok(response.data)
        } else {
            Err(ChannelError::Status(response.sw()).into())
        }
    }

    fn resolve_version(&self, select_response: &[u8]) -> Result<SpecVersion> {
        let version = match self.version.get() {
            Some(version) => *version,
            None => {
                let detected = SpecVersion::from_open_channel_response(select_response)
                    .ok_or(EuiccError::CannotDetermineVersion)?;
                let cached = *self.version.get_or_init(|| detected);
                debug!("eUICC SGP.22 version {}", cached);
                cached
            }
        };

        let too_new = self.max_version.map_or(false, |max| version > max);
        if version < self.min_version || too_new {
            return Err(EuiccError::UnsupportedVersion(version));
        }
        Ok(version)
    }

    /// Transmit one APDU and collect every `61xx` continuation
    async fn transmit_complete(&self, channel: u8, apdu: &APDU) -> Result<Response> {
        debug!("APDU >> {}", hexify(&apdu.to_bytes()));
        let mut response = self.element.transmit(channel, apdu).await?;
        let mut data = std::mem::take(&mut response.data);

        let mut continuations = 0;
        while let Some(available) = response.available_response() {
            continuations += 1;
            if continuations > MAX_GET_RESPONSE {
                return Err(ChannelError::ResponseTooLong(MAX_GET_RESPONSE).into());
            }
            let next = self
                .element
                .transmit(channel, &APDU::get_response(apdu.cla, available))
                .await?;
            data.extend_from_slice(&next.data);
            response = next;
        }

        response.data = data;
        debug!("APDU << {} {:04X}", hexify(&response.data), response.sw());
        Ok(response)
    }
}
