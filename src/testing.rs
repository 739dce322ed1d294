//! In-memory stand-ins for the agent's collaborators.
//!
//! Each fake is a cheap handle over shared state so a test can keep one copy
//! for assertions while the component under test owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{FetchError, LinkError, StorageError, TransportError};
use crate::net::{FirmwareBody, FirmwareResponse, FirmwareSource, Link, LinkInfo};
use crate::storage::FlashWriter;
use crate::system::SystemProbe;
use crate::transport::{InboundMessage, Transport};

#[derive(Default)]
struct BrokerState {
    connected: bool,
    failing_connects: u32,
    connect_attempts: u32,
    subscriptions: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
    inbound: VecDeque<InboundMessage>,
}

/// Broker fake. Like a broker without subscription dedup, it delivers one
/// copy of a message per matching subscription it holds.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<BrokerState>>,
}

impl MockTransport {
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.lock().connected = true;
        transport
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Simulates the broker dropping a clean session.
    pub fn drop_session(&self) {
        let mut state = self.lock();
        state.connected = false;
        state.subscriptions.clear();
    }

    pub fn restore_session(&self) {
        self.lock().connected = true;
    }

    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        self.lock().inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<serde_json::Value> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }

    pub fn clear_published(&self) {
        self.lock().published.clear();
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.lock().connected
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }

    async fn pump(&mut self, _window: Duration) -> Vec<InboundMessage> {
        let mut state = self.lock();
        if !state.connected {
            return Vec::new();
        }
        let mut delivered = Vec::new();
        while let Some(message) = state.inbound.pop_front() {
            let copies = state
                .subscriptions
                .iter()
                .filter(|s| **s == message.topic)
                .count()
                // unsubscribed topics still arrive once, as on a shared connection
                .max(1);
            for _ in 0..copies {
                delivered.push(message.clone());
            }
        }
        delivered
    }
}

pub struct MockLink {
    fail: bool,
}

impl MockLink {
    pub fn up() -> Self {
        Self { fail: false }
    }

    pub fn down() -> Self {
        Self { fail: true }
    }
}

impl Link for MockLink {
    async fn associate(&mut self) -> Result<LinkInfo, LinkError> {
        if self.fail {
            return Err(LinkError::NoRoute("broker:1883".to_string()));
        }
        Ok(LinkInfo {
            address: "10.0.0.7".to_string(),
            signal_level: -61,
        })
    }
}

/// Firmware server fake serving one image.
#[derive(Clone)]
pub struct MockSource {
    status: u16,
    declared: Option<u64>,
    image: Vec<u8>,
    chunk_size: usize,
    stall: bool,
    unanswered: bool,
}

impl MockSource {
    pub fn ok(image: Vec<u8>) -> Self {
        Self {
            status: 200,
            declared: Some(image.len() as u64),
            image,
            chunk_size: 256,
            stall: false,
            unanswered: false,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn declaring(mut self, declared: Option<u64>) -> Self {
        self.declared = declared;
        self
    }

    pub fn chunked(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Never signals end of body after the image is sent.
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Accepts the request but never sends a response.
    pub fn unanswered(mut self) -> Self {
        self.unanswered = true;
        self
    }
}

pub struct MockBody {
    chunks: VecDeque<Vec<u8>>,
    stall: bool,
}

impl FirmwareBody for MockBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None if self.stall => std::future::pending().await,
            None => Ok(None),
        }
    }
}

impl FirmwareSource for MockSource {
    type Body = MockBody;

    async fn fetch(&self, _url: &str) -> Result<FirmwareResponse<MockBody>, FetchError> {
        if self.unanswered {
            return std::future::pending().await;
        }
        Ok(FirmwareResponse {
            status: self.status,
            content_length: self.declared,
            body: MockBody {
                chunks: self.image.chunks(self.chunk_size).map(<[u8]>::to_vec).collect(),
                stall: self.stall,
            },
        })
    }
}

#[derive(Default)]
struct FlashState {
    capacity: Option<u64>,
    begun: Option<u64>,
    image: Vec<u8>,
    session_open: bool,
    ended: bool,
    finalized: bool,
    fail_finalize: bool,
    aborts: u32,
}

#[derive(Clone, Default)]
pub struct MockFlash {
    state: Arc<Mutex<FlashState>>,
}

impl MockFlash {
    pub fn with_capacity(capacity: u64) -> Self {
        let flash = Self::default();
        flash.lock().capacity = Some(capacity);
        flash
    }

    fn lock(&self) -> MutexGuard<'_, FlashState> {
        self.state.lock().unwrap()
    }

    /// `end` succeeds but the image never reports as valid.
    pub fn fail_finalize(&self) {
        self.lock().fail_finalize = true;
    }

    pub fn begun(&self) -> Option<u64> {
        self.lock().begun
    }

    pub fn image(&self) -> Vec<u8> {
        self.lock().image.clone()
    }

    pub fn ended(&self) -> bool {
        self.lock().ended
    }

    pub fn aborts(&self) -> u32 {
        self.lock().aborts
    }
}

impl FlashWriter for MockFlash {
    fn begin(&mut self, size: u64) -> Result<(), StorageError> {
        let mut state = self.lock();
        if let Some(capacity) = state.capacity {
            if size > capacity {
                return Err(StorageError::InsufficientSpace {
                    required: size,
                    available: capacity,
                });
            }
        }
        state.begun = Some(size);
        state.session_open = true;
        state.image.clear();
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize, StorageError> {
        let mut state = self.lock();
        if !state.session_open {
            return Err(StorageError::NoSession);
        }
        state.image.extend_from_slice(chunk);
        Ok(chunk.len())
    }

    fn end(&mut self) -> Result<(), StorageError> {
        let mut state = self.lock();
        if !state.session_open {
            return Err(StorageError::NoSession);
        }
        state.session_open = false;
        state.ended = true;
        state.finalized = !state.fail_finalize;
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    fn abort(&mut self) {
        let mut state = self.lock();
        state.session_open = false;
        state.finalized = false;
        state.aborts += 1;
    }
}

pub struct FixedProbe(pub u64);

impl SystemProbe for FixedProbe {
    fn free_memory(&self) -> u64 {
        self.0
    }
}
