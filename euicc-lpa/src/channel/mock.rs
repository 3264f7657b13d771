//! Scripted in-memory secure element for tests

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChannelError, LogicalChannel, SecureElement};
use crate::apdu::{ins, Response, APDU, STORE_DATA_P1_MORE};
use crate::card::SpecVersion;

#[derive(Default)]
struct Script {
    select_response: Vec<u8>,
    responses: VecDeque<Result<Response, ChannelError>>,
    sent: Vec<APDU>,
    open_error: Option<ChannelError>,
    opened: usize,
    closed: usize,
    open_now: usize,
    max_open: usize,
    hang: bool,
}

/// Replays queued responses and records every APDU sent
///
/// STORE DATA blocks announcing more blocks (P1 `11`) are answered with a
/// bare `9000` without consuming the script.
pub struct ScriptedElement {
    script: Mutex<Script>,
}

impl ScriptedElement {
    /// Element whose SELECT response announces `version`
    pub fn new(version: SpecVersion) -> Self {
        Self::with_select_response(vec![
            0xE0,
            0x05,
            0x82,
            0x03,
            version.major,
            version.minor,
            version.patch,
        ])
    }

    pub fn with_select_response(select_response: Vec<u8>) -> Self {
        Self {
            script: Mutex::new(Script {
                select_response,
                ..Script::default()
            }),
        }
    }

    pub fn push_response(&self, response: Response) {
        self.script.lock().responses.push_back(Ok(response));
    }

    /// Queue a `9000` response carrying hex `data`
    pub fn push_data(&self, data: &str) {
        let data = hex::decode(data).expect("fixture hex");
        self.push_response(Response::success(data));
    }

    pub fn push_status(&self, sw: u16) {
        self.push_response(Response::error(sw));
    }

    pub fn push_fault(&self, error: ChannelError) {
        self.script.lock().responses.push_back(Err(error));
    }

    /// Never answer any further APDU
    pub fn hang(&self) {
        self.script.lock().hang = true;
    }

    pub fn fail_open(&self, error: ChannelError) {
        self.script.lock().open_error = Some(error);
    }

    /// Every APDU transmitted so far
    pub fn sent(&self) -> Vec<APDU> {
        self.script.lock().sent.clone()
    }

    /// STORE DATA payloads reassembled from their blocks
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        let mut current = Vec::new();
        for apdu in self.sent().iter().filter(|a| a.ins == ins::STORE_DATA) {
            current.extend_from_slice(&apdu.data);
            if apdu.is_last_block() {
                payloads.push(std::mem::take(&mut current));
            }
        }
        payloads
    }

    pub fn opened(&self) -> usize {
        self.script.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.script.lock().closed
    }

    /// Highest number of channels open at the same time
    pub fn max_open_channels(&self) -> usize {
        self.script.lock().max_open
    }
}

#[async_trait]
impl SecureElement for ScriptedElement {
    async fn open_logical_channel(&self, _aid: &[u8]) -> Result<LogicalChannel, ChannelError> {
        let mut script = self.script.lock();
        if let Some(error) = script.open_error.clone() {
            return Err(error);
        }
        script.opened += 1;
        script.open_now += 1;
        script.max_open = script.max_open.max(script.open_now);
        Ok(LogicalChannel {
            channel: 1,
            select_response: script.select_response.clone(),
        })
    }

    async fn transmit(&self, _channel: u8, apdu: &APDU) -> Result<Response, ChannelError> {
        let response = {
            let mut script = self.script.lock();
            script.sent.push(apdu.clone());
            if script.hang {
                None
            } else if apdu.ins == ins::STORE_DATA && apdu.p1 == STORE_DATA_P1_MORE {
                Some(Ok(Response::success(Vec::new())))
            } else {
                Some(script.responses.pop_front().unwrap_or_else(|| {
                    Err(ChannelError::Transport("no scripted response".into()))
                }))
            }
        };
        let Some(response) = response else {
            return std::future::pending().await;
        };
        // Let other exchanges run between APDUs
        tokio::task::yield_now().await;
        response
    }

    async fn close_logical_channel(&self, _channel: u8) -> Result<(), ChannelError> {
        let mut script = self.script.lock();
        script.closed += 1;
        script.open_now -= 1;
        Ok(())
    }
}
