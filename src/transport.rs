//! Broker connection.
//!
//! [`Transport`] is the seam the rest of the agent talks to; [`MqttTransport`]
//! backs it with `rumqttc`. Delivery is pull-based: nothing arrives until the
//! owner calls [`Transport::pump`], which keeps dispatch on the agent's own
//! cycle.

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::TransportError;

const REQUEST_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Opens a broker session. Returns once the broker acknowledged it.
    async fn connect(&mut self) -> Result<(), TransportError>;

    fn connected(&self) -> bool;

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Drives the connection for up to `window` and returns what arrived.
    /// A dropped session is reported through [`Transport::connected`].
    async fn pump(&mut self, window: Duration) -> Vec<InboundMessage>;
}

pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: bool,
    connect_timeout: Duration,
}

impl MqttTransport {
    pub fn new(config: &Config) -> Self {
        let mut options = MqttOptions::new(&config.device_id, &config.mqtt_host, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs));
        options.set_clean_session(true);
        options.set_max_packet_size(config.mqtt_max_packet_bytes, config.mqtt_max_packet_bytes);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        Self {
            client,
            eventloop,
            connected: false,
            connect_timeout: Duration::from_secs(config.mqtt_keep_alive_secs.max(5)),
        }
    }
}

impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        let deadline = Instant::now() + self.connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.eventloop.poll()).await {
                Err(_) => return Err(TransportError::Timeout(self.connect_timeout)),
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Connect(format!("{:?}", ack.code)));
                    }
                    info!(session_present = ack.session_present, "Broker session established");
                    self.connected = true;
                    return Ok(());
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            }
        }
    }

    fn connected(&self) -> bool {
        self.connected
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn pump(&mut self, window: Duration) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();
        if !self.connected {
            return inbound;
        }

        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    debug!(topic = %publish.topic, bytes = publish.payload.len(), "Inbound message");
                    inbound.push(InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    warn!("Broker sent disconnect");
                    self.connected = false;
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Broker session dropped");
                    self.connected = false;
                    break;
                }
            }
        }
        inbound
    }
}
