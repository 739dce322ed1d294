use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod agent;
mod command;
mod config;
mod error;
mod heartbeat;
mod net;
mod ota;
mod status;
mod storage;
mod supervisor;
mod system;
mod telemetry;
mod topics;
mod transport;
mod types;

#[cfg(test)]
mod testing;

use agent::{Agent, AgentSettings, RestartReason};
use config::Config;
use net::{HostLink, HttpFirmwareSource};
use ota::Updater;
use storage::FileFlash;
use supervisor::{ConnectionSupervisor, RetryPolicy};
use system::HostProbe;
use topics::{DeviceIdentity, Topics};
use transport::MqttTransport;

/// Exit code asking the process supervisor for a restart (EX_TEMPFAIL).
const RESTART_EXIT_CODE: i32 = 75;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT").map_or(false, |format| format == "json");
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::load_or_provision()?;
    info!(?config, "Device starting");

    let identity = DeviceIdentity::new(config.device_id.clone())?;
    let topics = Topics::new(&config.topic_prefix, &identity);

    let supervisor = ConnectionSupervisor::new(
        MqttTransport::new(&config),
        HostLink::new(&config.mqtt_host, config.mqtt_port),
        RetryPolicy::from_config(&config),
    );
    let source = HttpFirmwareSource::new(std::time::Duration::from_secs(
        config.http_connect_timeout_secs,
    ))?;
    let flash = FileFlash::new(&config.firmware_dir, config.flash_capacity_bytes);
    let updater = Updater::new(source, Box::new(flash), config.stall_timeout());

    let agent = Agent::new(
        topics,
        supervisor,
        updater,
        Box::new(HostProbe::default()),
        AgentSettings::from(&config),
    );

    let reason = agent.run().await;
    match reason {
        RestartReason::LinkFailure => error!("Restarting after network failure"),
        RestartReason::UpdateApplied => info!("Update success. Rebooting..."),
        RestartReason::Commanded => info!("Restarting on command"),
    }
    std::process::exit(RESTART_EXIT_CODE);
}
