//! Link and broker-session lifecycle.
//!
//! The supervisor owns the transport. It reports what happened to the session
//! and leaves reacting to it (status transitions, resubscription, update
//! checks) to the agent.

use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{LinkError, TransportError};
use crate::net::{Link, LinkInfo};
use crate::transport::{InboundMessage, Transport};

/// How long one cycle lets the transport deliver inbound traffic.
pub const PUMP_WINDOW: Duration = Duration::from_millis(100);

/// Retry schedule for broker connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Duration,
    /// Upper bound of a random delay added to each backoff.
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn fixed(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
            jitter: Duration::ZERO,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.session_max_attempts,
            backoff: Duration::from_millis(config.session_backoff_ms),
            jitter: Duration::from_millis(config.session_backoff_jitter_ms),
        }
    }

    /// Whether another attempt may follow `failed` consecutive failures.
    pub fn allows(&self, failed: u32) -> bool {
        self.max_attempts.map_or(true, |max| failed < max)
    }

    pub fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.backoff;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.backoff + Duration::from_millis(extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(5_000))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Maintained {
    /// Session up; these messages arrived during the pump.
    Delivered(Vec<InboundMessage>),
    /// Session was up on the previous cycle and is now gone.
    Lost,
    /// Session re-established on this cycle.
    Reconnected,
    /// Session down and the backoff window has not elapsed.
    Waiting,
}

pub struct ConnectionSupervisor<T, L> {
    transport: T,
    link: L,
    policy: RetryPolicy,
    pump_window: Duration,
    link_info: LinkInfo,
    session_up: bool,
    last_attempt: Option<Instant>,
}

impl<T: Transport, L: Link> ConnectionSupervisor<T, L> {
    pub fn new(transport: T, link: L, policy: RetryPolicy) -> Self {
        Self {
            transport,
            link,
            policy,
            pump_window: PUMP_WINDOW,
            link_info: LinkInfo::default(),
            session_up: false,
            last_attempt: None,
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn link_info(&self) -> &LinkInfo {
        &self.link_info
    }

    pub fn session_up(&self) -> bool {
        self.session_up
    }

    /// Network association. Not retried here; failure is the caller's cue to
    /// restart.
    pub async fn ensure_link(&mut self) -> Result<&LinkInfo, LinkError> {
        self.link_info = self.link.associate().await?;
        Ok(&self.link_info)
    }

    /// Connects to the broker, sleeping the policy's backoff between failed
    /// attempts. Only returns an error once the policy's attempts run out.
    pub async fn ensure_session(&mut self) -> Result<(), TransportError> {
        info!("Connecting to broker");
        let mut failed = 0u32;
        loop {
            self.last_attempt = Some(Instant::now());
            match self.transport.connect().await {
                Ok(()) => {
                    self.session_up = true;
                    return Ok(());
                }
                Err(e) => {
                    failed += 1;
                    if !self.policy.allows(failed) {
                        warn!(attempts = failed, error = %e, "Giving up on broker for now");
                        return Err(e);
                    }
                    let delay = self.policy.delay();
                    warn!(attempt = failed, error = %e, "Broker connect failed, retrying in {:?}", delay);
                    sleep(delay).await;
                }
            }
        }
    }

    /// One supervision step. Reconnects at most once per backoff window.
    pub async fn maintain(&mut self) -> Maintained {
        if self.session_up {
            if self.transport.connected() {
                return Maintained::Delivered(self.transport.pump(self.pump_window).await);
            }
            self.session_up = false;
            return Maintained::Lost;
        }

        let gate_open = self
            .last_attempt
            .map_or(true, |last| last.elapsed() >= self.policy.backoff);
        if !gate_open {
            sleep(self.pump_window).await;
            return Maintained::Waiting;
        }

        match self.ensure_session().await {
            Ok(()) => Maintained::Reconnected,
            Err(_) => Maintained::Waiting,
        }
    }

    /// Gives queued outbound records a chance to leave before a restart.
    /// Anything that arrives meanwhile is dropped.
    pub async fn flush(&mut self, window: Duration) {
        let dropped = self.transport.pump(window).await;
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Dropped inbound messages while flushing");
        }
    }
}
