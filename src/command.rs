use tracing::{debug, warn};

use crate::error::CommandError;
use crate::types::CommandPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    Restart,
    ReportStatus,
    ForceHeartbeat,
    CheckUpdate,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub name: CommandName,
    pub raw: String,
}

impl Command {
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        let parsed: CommandPayload = serde_json::from_slice(payload)?;
        let name = match parsed.command.as_str() {
            "restart" => CommandName::Restart,
            "status" => CommandName::ReportStatus,
            "heartbeat" => CommandName::ForceHeartbeat,
            "update" => CommandName::CheckUpdate,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Self {
            name,
            raw: String::from_utf8_lossy(payload).into_owned(),
        })
    }
}

/// What the agent should do in response to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Restart,
    PublishTelemetry,
    RequestUpdateCheck,
}

#[derive(Debug, Default)]
pub struct CommandHandler;

impl CommandHandler {
    /// Malformed and unknown commands are logged and yield `None`.
    pub fn handle(&self, payload: &[u8]) -> Option<CommandAction> {
        let command = match Command::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Dropping command");
                return None;
            }
        };
        debug!(raw = %command.raw, name = ?command.name, "Command received");

        let action = match command.name {
            CommandName::Restart => CommandAction::Restart,
            // status and heartbeat both answer with a fresh snapshot
            CommandName::ReportStatus | CommandName::ForceHeartbeat => {
                CommandAction::PublishTelemetry
            }
            CommandName::CheckUpdate => CommandAction::RequestUpdateCheck,
        };
        Some(action)
    }
}
