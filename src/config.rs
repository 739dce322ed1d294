use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub device_id: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_keep_alive_secs: u64,
    pub mqtt_max_packet_bytes: usize,
    pub topic_prefix: String,
    pub heartbeat_interval_ms: u64,
    pub session_backoff_ms: u64,
    pub session_backoff_jitter_ms: u64,
    pub session_max_attempts: Option<u32>, // None retries forever
    pub link_grace_ms: u64,
    pub transfer_stall_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
    pub flush_window_ms: u64,
    pub firmware_dir: PathBuf,
    pub flash_capacity_bytes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let device_id = env::var("DEVICE_ID").unwrap_or_else(|_| Uuid::new_v4().to_string());
        let mqtt_host = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = get_env_var_u64("MQTT_PORT", 1883)
            .try_into()
            .context("MQTT_PORT out of range")?;
        let topic_prefix = env::var("TOPIC_PREFIX").unwrap_or_else(|_| "roidota".to_string());
        let firmware_dir = env::var("FIRMWARE_DIR").unwrap_or_else(|_| "./firmware".to_string());

        let session_max_attempts = env::var("SESSION_MAX_ATTEMPTS")
            .ok()
            .and_then(|val| val.parse().ok());

        Ok(Config {
            device_id,
            mqtt_host,
            mqtt_port,
            mqtt_keep_alive_secs: get_env_var_u64("MQTT_KEEP_ALIVE_SECS", 15),
            mqtt_max_packet_bytes: get_env_var_u64("MQTT_MAX_PACKET_BYTES", 512) as usize,
            topic_prefix,
            heartbeat_interval_ms: get_env_var_u64("HEARTBEAT_INTERVAL_MS", 30_000),
            session_backoff_ms: get_env_var_u64("SESSION_BACKOFF_MS", 5_000),
            session_backoff_jitter_ms: get_env_var_u64("SESSION_BACKOFF_JITTER_MS", 0),
            session_max_attempts,
            link_grace_ms: get_env_var_u64("LINK_GRACE_MS", 3_000),
            transfer_stall_timeout_secs: get_env_var_u64("TRANSFER_STALL_TIMEOUT_SECS", 30),
            http_connect_timeout_secs: get_env_var_u64("HTTP_CONNECT_TIMEOUT_SECS", 10),
            flush_window_ms: get_env_var_u64("FLUSH_WINDOW_MS", 500),
            firmware_dir: PathBuf::from(firmware_dir),
            flash_capacity_bytes: get_env_var_u64("FLASH_CAPACITY_BYTES", 4 * 1024 * 1024),
        })
    }

    fn get_config_file_path() -> PathBuf {
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(config_dir).join("device_config.json")
    }

    /// Loads the persisted config, falling back to the environment on first boot.
    /// The result is written back so a generated device id survives restarts.
    pub fn load_or_provision() -> Result<Self> {
        let config = match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                tracing::info!(error = %e, "No persisted config, provisioning from environment");
                let config = Self::from_env()?;
                config.save_to_file()?;
                config
            }
        };
        Ok(config)
    }

    pub fn load_from_file() -> Result<Self> {
        let config_file_path = Self::get_config_file_path();
        let contents = fs::read_to_string(&config_file_path)
            .with_context(|| format!("reading {}", config_file_path.display()))?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file(&self) -> Result<()> {
        let config_file_path = Self::get_config_file_path();
        if let Some(parent) = config_file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        let mut file = fs::File::create(&config_file_path)?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn link_grace(&self) -> Duration {
        Duration::from_millis(self.link_grace_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_stall_timeout_secs)
    }

    pub fn flush_window(&self) -> Duration {
        Duration::from_millis(self.flush_window_ms)
    }
}

fn get_env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}
