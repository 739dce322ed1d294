//! Device identity, the topic names derived from it, and the router that maps
//! inbound topics to the component that owns them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::error::{IdentityError, TransportError};
use crate::transport::Transport;

/// Provisioned device token. Never empty and safe to embed in a topic level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdentityError::Empty);
        }
        if id.contains(['/', '+', '#']) {
            return Err(IdentityError::InvalidCharacter(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every topic the agent uses, built once at start-up.
#[derive(Debug, Clone)]
pub struct Topics {
    device_id: String,
    namespace: String,
    pub request: String,
    pub response: String,
    pub cmd: String,
    pub ack: String,
    pub status: String,
    pub logs: String,
}

impl Topics {
    pub fn new(prefix: &str, identity: &DeviceIdentity) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let id = identity.as_str();
        Self {
            device_id: id.to_string(),
            namespace: format!("{prefix}/"),
            request: format!("{prefix}/request"),
            response: format!("{prefix}/response/{id}"),
            cmd: format!("{prefix}/cmd/{id}"),
            ack: format!("{prefix}/ack/{id}"),
            status: format!("{prefix}/status/{id}"),
            logs: format!("{prefix}/logs/{id}"),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The five topics scoped to this device, in subscription order.
    pub fn device_scoped(&self) -> [&str; 5] {
        [&self.response, &self.cmd, &self.status, &self.ack, &self.logs]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loopback {
    Status,
    Ack,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    FirmwareLocation,
    Command,
    /// Our own outbound records echoed back by the broker.
    Loopback(Loopback),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Routed(Route),
    /// Inside the reserved namespace but not one of ours.
    Unmatched,
    /// Outside the reserved namespace; belongs to whoever shares the connection.
    Foreign,
}

pub struct TopicRouter {
    topics: Topics,
    routes: HashMap<String, Route>,
    subscribed: HashSet<String>,
}

impl TopicRouter {
    pub fn new(topics: Topics) -> Self {
        let routes = HashMap::from([
            (topics.response.clone(), Route::FirmwareLocation),
            (topics.cmd.clone(), Route::Command),
            (topics.status.clone(), Route::Loopback(Loopback::Status)),
            (topics.ack.clone(), Route::Loopback(Loopback::Ack)),
            (topics.logs.clone(), Route::Loopback(Loopback::Log)),
        ]);
        Self {
            topics,
            routes,
            subscribed: HashSet::new(),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn is_owned_topic(&self, topic: &str) -> bool {
        topic.starts_with(&self.topics.namespace)
    }

    pub fn route(&self, topic: &str) -> Dispatch {
        if !self.is_owned_topic(topic) {
            return Dispatch::Foreign;
        }
        match self.routes.get(topic) {
            Some(route) => Dispatch::Routed(*route),
            None => {
                warn!(topic, "Unknown internal topic, dropping");
                Dispatch::Unmatched
            }
        }
    }

    /// Subscribes every device topic not yet subscribed in this session.
    /// Returns how many subscriptions were issued.
    pub async fn subscribe_all<T: Transport>(
        &mut self,
        transport: &mut T,
    ) -> Result<usize, TransportError> {
        let mut issued = 0;
        for topic in self.topics.device_scoped() {
            if self.subscribed.contains(topic) {
                continue;
            }
            transport.subscribe(topic).await?;
            debug!(topic, "Subscribed");
            self.subscribed.insert(topic.to_string());
            issued += 1;
        }
        Ok(issued)
    }

    /// Forgets session subscriptions; the next session starts clean.
    pub fn reset_session(&mut self) {
        self.subscribed.clear();
    }
}
