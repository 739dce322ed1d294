//! The agent context: owns every component and runs the cooperative cycle.
//!
//! One cycle services the connection supervisor, dispatches whatever arrived
//! (each message fully handled before the next), checks the heartbeat and then
//! runs externally registered periodic work. A firmware transfer runs inline,
//! so nothing else happens while it streams.

use chrono::Utc;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::command::{CommandAction, CommandHandler};
use crate::config::Config;
use crate::heartbeat::HeartbeatScheduler;
use crate::net::{FirmwareSource, Link};
use crate::ota::{LocationDecision, Updater};
use crate::status::{ConnectionState, StatusEvent, StatusMachine};
use crate::supervisor::{ConnectionSupervisor, Maintained};
use crate::system::SystemProbe;
use crate::telemetry::TelemetryPublisher;
use crate::topics::{Dispatch, Route, TopicRouter, Topics};
use crate::transport::{InboundMessage, Transport};
use crate::types::{LogLevel, TelemetrySnapshot, UpdateOutcome};

pub type PeriodicHook = Box<dyn FnMut() + Send>;
pub type ForeignHandler = Box<dyn FnMut(&InboundMessage) + Send>;
pub type ReadyHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    LinkFailure,
    UpdateApplied,
    Commanded,
}

#[derive(Debug, Clone, Copy)]
pub struct AgentSettings {
    pub heartbeat_interval: Duration,
    pub link_grace: Duration,
    pub flush_window: Duration,
}

impl From<&Config> for AgentSettings {
    fn from(config: &Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            link_grace: config.link_grace(),
            flush_window: config.flush_window(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(30_000),
            link_grace: Duration::from_millis(3_000),
            flush_window: Duration::from_millis(500),
        }
    }
}

pub struct Agent<T, L, S> {
    status: StatusMachine,
    supervisor: ConnectionSupervisor<T, L>,
    router: TopicRouter,
    telemetry: TelemetryPublisher,
    updater: Updater<S>,
    commands: CommandHandler,
    heartbeat: HeartbeatScheduler,
    probe: Box<dyn SystemProbe + Send>,
    settings: AgentSettings,
    booted_at: Instant,
    ready: Option<ReadyHook>,
    periodic: Vec<PeriodicHook>,
    foreign: Option<ForeignHandler>,
}

impl<T: Transport, L: Link, S: FirmwareSource> Agent<T, L, S> {
    pub fn new(
        topics: Topics,
        supervisor: ConnectionSupervisor<T, L>,
        updater: Updater<S>,
        probe: Box<dyn SystemProbe + Send>,
        settings: AgentSettings,
    ) -> Self {
        let booted_at = Instant::now();
        let topics = Arc::new(topics);
        Self {
            status: StatusMachine::new(),
            supervisor,
            router: TopicRouter::new(topics.as_ref().clone()),
            telemetry: TelemetryPublisher::new(topics),
            updater,
            commands: CommandHandler,
            heartbeat: HeartbeatScheduler::new(settings.heartbeat_interval, booted_at),
            probe,
            settings,
            booted_at,
            ready: None,
            periodic: Vec::new(),
            foreign: None,
        }
    }

    /// Runs once, right after the first broker session is up and the device
    /// topics are subscribed.
    pub fn on_ready(&mut self, hook: ReadyHook) {
        self.ready = Some(hook);
    }

    /// Registers work to run once per cycle after the agent's own duties.
    pub fn on_cycle(&mut self, hook: PeriodicHook) {
        self.periodic.push(hook);
    }

    /// Receives inbound messages outside the agent's reserved namespace.
    pub fn on_foreign_message(&mut self, handler: ForeignHandler) {
        self.foreign = Some(handler);
    }

    pub fn state(&self) -> ConnectionState {
        self.status.current()
    }

    pub fn is_owned_topic(&self, topic: &str) -> bool {
        self.router.is_owned_topic(topic)
    }

    pub async fn run(mut self) -> RestartReason {
        if let ControlFlow::Break(reason) = self.boot().await {
            return reason;
        }
        loop {
            if let ControlFlow::Break(reason) = self.cycle().await {
                return reason;
            }
        }
    }

    /// Link, then session. A link failure ends the agent after the grace delay.
    pub async fn boot(&mut self) -> ControlFlow<RestartReason> {
        info!(uptime_ms = self.uptime_ms(), "Booting agent");

        if let Err(e) = self.supervisor.ensure_link().await {
            error!(error = %e, "Network association failed, restarting");
            self.transition(StatusEvent::Fault).await;
            sleep(self.settings.link_grace).await;
            return ControlFlow::Break(RestartReason::LinkFailure);
        }
        self.transition(StatusEvent::LinkEstablished).await;

        match self.supervisor.ensure_session().await {
            Ok(()) => self.on_session_established().await,
            Err(e) => warn!(error = %e, "No broker session yet, will keep trying"),
        }
        ControlFlow::Continue(())
    }

    pub async fn cycle(&mut self) -> ControlFlow<RestartReason> {
        match self.supervisor.maintain().await {
            Maintained::Delivered(messages) => {
                for message in messages {
                    self.dispatch(message).await?;
                }
            }
            Maintained::Lost => {
                warn!("Broker session lost");
                self.router.reset_session();
                self.updater.on_session_lost();
                self.transition(StatusEvent::SessionLost).await;
            }
            Maintained::Reconnected => self.on_session_established().await,
            Maintained::Waiting => {}
        }

        if self.heartbeat.due(Instant::now()) {
            self.publish_heartbeat().await;
        }

        for hook in &mut self.periodic {
            hook();
        }
        ControlFlow::Continue(())
    }

    pub async fn dispatch(&mut self, message: InboundMessage) -> ControlFlow<RestartReason> {
        match self.router.route(&message.topic) {
            Dispatch::Routed(Route::FirmwareLocation) => {
                return self.handle_firmware_location(&message.payload).await;
            }
            Dispatch::Routed(Route::Command) => return self.handle_command(&message.payload).await,
            Dispatch::Routed(Route::Loopback(kind)) => {
                trace!(?kind, "Own record echoed by broker");
            }
            Dispatch::Unmatched => {}
            Dispatch::Foreign => match self.foreign.as_mut() {
                Some(handler) => handler(&message),
                None => debug!(topic = %message.topic, "No handler for foreign topic"),
            },
        }
        ControlFlow::Continue(())
    }

    async fn on_session_established(&mut self) {
        let released = self
            .telemetry
            .release_held(self.supervisor.transport_mut())
            .await;
        if released > 0 {
            debug!(released, "Sent log lines held while offline");
        }
        self.transition(StatusEvent::SessionEstablished).await;

        let transport = self.supervisor.transport_mut();
        match self.router.subscribe_all(transport).await {
            Ok(issued) => info!(issued, "Device topics subscribed"),
            Err(e) => warn!(error = %e, "Subscription failed"),
        }
        self.request_update_check().await;

        if let Some(hook) = self.ready.take() {
            hook();
        }
    }

    async fn request_update_check(&mut self) {
        if !self.updater.request_check() {
            return;
        }
        let ip = self.supervisor.link_info().address.clone();
        let state = self.status.current();
        self.telemetry
            .update_check(self.supervisor.transport_mut(), &ip, state)
            .await;
    }

    async fn handle_firmware_location(&mut self, payload: &[u8]) -> ControlFlow<RestartReason> {
        let request = match self.updater.on_firmware_location(payload) {
            LocationDecision::Ignored => return ControlFlow::Continue(()),
            LocationDecision::Rejected(reason) => {
                self.log(LogLevel::Error, reason).await;
                self.ack(false, reason).await;
                return ControlFlow::Continue(());
            }
            LocationDecision::Accepted(request) => request,
        };

        self.transition(StatusEvent::UpdateAccepted).await;
        self.log(LogLevel::Info, "Starting OTA...").await;
        self.ack(false, "Starting OTA").await;

        let outcome = self.updater.apply(request).await;
        self.report_outcome(outcome).await
    }

    async fn report_outcome(&mut self, outcome: UpdateOutcome) -> ControlFlow<RestartReason> {
        if outcome.succeeded {
            self.ack(true, &outcome.detail).await;
            self.log(LogLevel::Info, "OTA success").await;
            self.supervisor.flush(self.settings.flush_window).await;
            return ControlFlow::Break(RestartReason::UpdateApplied);
        }

        self.ack(false, &outcome.detail).await;
        let line = format!(
            "{} ({} of {} bytes)",
            outcome.detail, outcome.bytes_written, outcome.bytes_expected
        );
        self.log(LogLevel::Error, &line).await;
        self.transition(StatusEvent::UpdateFinished).await;
        ControlFlow::Continue(())
    }

    async fn handle_command(&mut self, payload: &[u8]) -> ControlFlow<RestartReason> {
        match self.commands.handle(payload) {
            Some(CommandAction::Restart) => {
                self.log(LogLevel::Info, "Device restarting...").await;
                self.supervisor.flush(self.settings.flush_window).await;
                return ControlFlow::Break(RestartReason::Commanded);
            }
            Some(CommandAction::PublishTelemetry) => self.publish_heartbeat().await,
            Some(CommandAction::RequestUpdateCheck) => self.request_update_check().await,
            None => {}
        }
        ControlFlow::Continue(())
    }

    /// Transition lines raised without a session go out after the next one
    /// is established.
    async fn transition(&mut self, event: StatusEvent) {
        if let Some(transition) = self.status.apply(event) {
            let state = self.status.current();
            self.telemetry
                .log_or_hold(
                    self.supervisor.transport_mut(),
                    LogLevel::Info,
                    &transition.to_string(),
                    state,
                )
                .await;
        }
    }

    async fn publish_heartbeat(&mut self) {
        let link = self.supervisor.link_info();
        let snapshot = TelemetrySnapshot {
            device_id: self.router.topics().device_id().to_string(),
            link_address: link.address.clone(),
            signal_level: link.signal_level,
            free_memory: self.probe.free_memory(),
            uptime_ms: self.uptime_ms(),
            state: self.status.current(),
            timestamp: Utc::now(),
        };
        self.telemetry
            .heartbeat(self.supervisor.transport_mut(), snapshot)
            .await;
    }

    async fn log(&mut self, level: LogLevel, message: &str) {
        let state = self.status.current();
        self.telemetry
            .log(self.supervisor.transport_mut(), level, message, state)
            .await;
    }

    async fn ack(&mut self, success: bool, message: &str) {
        let state = self.status.current();
        self.telemetry
            .ack(self.supervisor.transport_mut(), success, message, state)
            .await;
    }

    fn uptime_ms(&self) -> u64 {
        self.booted_at.elapsed().as_millis() as u64
    }
}
