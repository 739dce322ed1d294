//! Firmware update pipeline.
//!
//! An attempt starts only from [`UpdateStage::Requested`], i.e. after this
//! device asked for an update and the control plane answered. The transfer
//! streams the HTTP body straight into the [`FlashWriter`]; there is no local
//! copy and no undo. Every exit path releases the write session.

use chrono::Utc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::UpdateFailure;
use crate::net::{FirmwareBody, FirmwareSource};
use crate::storage::FlashWriter;
use crate::types::{FirmwareLocation, UpdateOutcome, UpdateRequest};

const NULL_LOCATION: &str = "null";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Idle,
    Requested,
    Fetching,
    Writing,
    Verifying,
    Succeeded,
    Failed,
}

#[derive(Debug)]
pub enum LocationDecision {
    Accepted(UpdateRequest),
    /// Malformed answer; the check is over and the updater is idle again.
    Rejected(&'static str),
    /// Not waiting for an answer.
    Ignored,
}

#[derive(Debug, Default)]
struct Progress {
    expected: u64,
    written: u64,
    session_open: bool,
}

pub struct Updater<S> {
    stage: UpdateStage,
    source: S,
    flash: Box<dyn FlashWriter + Send>,
    stall_timeout: Duration,
}

impl<S: FirmwareSource> Updater<S> {
    pub fn new(source: S, flash: Box<dyn FlashWriter + Send>, stall_timeout: Duration) -> Self {
        Self {
            stage: UpdateStage::Idle,
            source,
            flash,
            stall_timeout,
        }
    }

    pub fn stage(&self) -> UpdateStage {
        self.stage
    }

    /// Moves Idle → Requested. Returns whether the caller should publish the
    /// update-check.
    pub fn request_check(&mut self) -> bool {
        if self.stage != UpdateStage::Idle {
            debug!(stage = ?self.stage, "Update check already pending or running");
            return false;
        }
        self.stage = UpdateStage::Requested;
        true
    }

    /// A pending check cannot be answered on a session that is gone.
    pub fn on_session_lost(&mut self) {
        if self.stage == UpdateStage::Requested {
            self.stage = UpdateStage::Idle;
        }
    }

    pub fn on_firmware_location(&mut self, payload: &[u8]) -> LocationDecision {
        if self.stage != UpdateStage::Requested {
            info!(stage = ?self.stage, "Ignoring firmware location");
            return LocationDecision::Ignored;
        }

        let location: FirmwareLocation = match serde_json::from_slice(payload) {
            Ok(location) => location,
            Err(e) => {
                warn!(error = %e, "Malformed firmware location");
                self.stage = UpdateStage::Idle;
                return LocationDecision::Rejected("Malformed update response");
            }
        };

        match location.firmware_url.map(|url| url.trim().to_string()) {
            Some(url) if !url.is_empty() && url != NULL_LOCATION => {
                self.stage = UpdateStage::Fetching;
                LocationDecision::Accepted(UpdateRequest {
                    source_location: url,
                    issued_at: Utc::now(),
                })
            }
            _ => {
                self.stage = UpdateStage::Idle;
                LocationDecision::Rejected("No firmware URL in update response")
            }
        }
    }

    /// Runs one attempt to completion. The updater is Idle afterwards.
    pub async fn apply(&mut self, request: UpdateRequest) -> UpdateOutcome {
        info!(url = %request.source_location, issued_at = %request.issued_at, "Starting OTA");
        let mut progress = Progress::default();

        let result = self.transfer(&request, &mut progress).await;
        let outcome = match result {
            Ok(()) => {
                self.stage = UpdateStage::Succeeded;
                UpdateOutcome {
                    succeeded: true,
                    detail: "Update success. Rebooting...".to_string(),
                    bytes_written: progress.written,
                    bytes_expected: progress.expected,
                }
            }
            Err(failure) => {
                self.stage = UpdateStage::Failed;
                if progress.session_open {
                    self.flash.abort();
                }
                warn!(
                    reason = failure.as_label(),
                    written = progress.written,
                    expected = progress.expected,
                    "{}",
                    failure
                );
                UpdateOutcome {
                    succeeded: false,
                    detail: failure.to_string(),
                    bytes_written: progress.written,
                    bytes_expected: progress.expected,
                }
            }
        };

        self.stage = UpdateStage::Idle;
        outcome
    }

    async fn transfer(
        &mut self,
        request: &UpdateRequest,
        progress: &mut Progress,
    ) -> Result<(), UpdateFailure> {
        self.stage = UpdateStage::Fetching;
        // a server that accepts the connection but never answers counts as a stall
        let response = timeout(self.stall_timeout, self.source.fetch(&request.source_location))
            .await
            .map_err(|_| UpdateFailure::Stalled(self.stall_timeout))?
            .map_err(|e| UpdateFailure::Fetch(e.to_string()))?;

        if !(200..300).contains(&response.status) {
            return Err(UpdateFailure::HttpStatus(response.status));
        }
        progress.expected = match response.content_length {
            Some(len) if len > 0 => len,
            _ => return Err(UpdateFailure::UnknownLength),
        };

        self.stage = UpdateStage::Writing;
        self.flash
            .begin(progress.expected)
            .map_err(UpdateFailure::NoSpace)?;
        progress.session_open = true;

        let mut body = response.body;
        loop {
            let chunk = match timeout(self.stall_timeout, body.next_chunk()).await {
                Err(_) => return Err(UpdateFailure::Stalled(self.stall_timeout)),
                Ok(Err(e)) => return Err(UpdateFailure::Body(e.to_string())),
                Ok(Ok(None)) => break,
                Ok(Ok(Some(chunk))) => chunk,
            };
            let accepted = self.flash.write(&chunk).map_err(UpdateFailure::Write)?;
            progress.written += accepted as u64;
            if accepted < chunk.len() {
                warn!(accepted, offered = chunk.len(), "Flash refused part of a chunk");
                break;
            }
        }

        self.stage = UpdateStage::Verifying;
        if progress.written != progress.expected {
            return Err(UpdateFailure::ShortWrite {
                written: progress.written,
                expected: progress.expected,
            });
        }
        self.flash
            .end()
            .map_err(|e| UpdateFailure::Finalize(e.to_string()))?;
        if !self.flash.is_finalized() {
            return Err(UpdateFailure::Finalize("image not valid".to_string()));
        }
        progress.session_open = false;
        Ok(())
    }
}
