//! Content management batches executed on the secure side

use super::channel::{ChannelOptions, SecureChannel};
use super::cmp::{self, CmpRequest, CMD_GET_SUID, CMD_GET_VERSION};
use super::driver::{SessionTarget, TeeDriver};
use crate::device::{Suid, TeeVersion};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{CommandFailure, CommandResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Answers to one executed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// One result per answered request, in request order. May be shorter
    /// than the request list when the secure side stopped early.
    pub results: Vec<CommandResult>,
    /// Secure-side internal error, `0` when none
    pub internal_error: u32,
}

/// Executes content management messages on the secure side.
///
/// `Err` means the batch as a whole could not run; per-message failures
/// are reported inside [`BatchOutcome::results`].
#[async_trait]
pub trait ContentManager: Send + Sync {
    async fn execute(&self, requests: &[CmpRequest]) -> Result<BatchOutcome>;

    /// Ask the secure side for its version information.
    async fn get_version(&self) -> Result<TeeVersion> {
        let payload = self.execute_single(CMD_GET_VERSION).await?;
        cmp::parse_version_response(&payload)
    }

    /// Ask the secure side for the SUID.
    async fn get_suid(&self) -> Result<Suid> {
        let payload = self.execute_single(CMD_GET_SUID).await?;
        cmp::parse_suid_response(&payload)
    }

    /// Execute one single-word command and return the answer's payload.
    async fn execute_single(&self, command_id: u32) -> Result<Vec<u8>> {
        let request = CmpRequest {
            id: command_id,
            ignore_error: false,
            payload: cmp::simple_command(command_id),
        };
        let outcome = self.execute(std::slice::from_ref(&request)).await?;
        if outcome.internal_error != 0 {
            return Err(Error::Internal(format!(
                "Secure side internal error 0x{:x} for command {}",
                outcome.internal_error, command_id
            )));
        }
        match outcome.results.into_iter().next() {
            Some(CommandResult { outcome: Ok(payload), .. }) => Ok(payload),
            Some(CommandResult { outcome: Err(failure), .. }) => Err(Error::from_kind(
                failure.kind,
                format!("command {} failed, detail {}", command_id, failure.detail),
            )),
            None => Err(Error::Internal(format!("No answer to command {}", command_id))),
        }
    }
}

/// [`ContentManager`] over a [`TeeDriver`]. Every batch runs in its own
/// channel session.
pub struct TeeContentManager {
    driver: Arc<dyn TeeDriver>,
    target: SessionTarget,
    options: ChannelOptions,
}

impl TeeContentManager {
    pub fn new(driver: Arc<dyn TeeDriver>, options: ChannelOptions) -> Self {
        Self {
            driver,
            target: SessionTarget::default(),
            options,
        }
    }

    /// Talk to a different trusted application.
    pub fn with_target(mut self, target: SessionTarget) -> Self {
        self.target = target;
        self
    }
}

#[async_trait]
impl ContentManager for TeeContentManager {
    async fn execute(&self, requests: &[CmpRequest]) -> Result<BatchOutcome> {
        if requests.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut channel = SecureChannel::open(Arc::clone(&self.driver), &self.target, &self.options)?;
        let batch = channel.execute(requests).await?;
        channel.close();

        if batch.responses.len() > requests.len() {
            return Err(Error::CommandExecution(format!(
                "{} answers to {} commands",
                batch.responses.len(),
                requests.len()
            )));
        }

        if let Some((request, response)) = requests
            .iter()
            .zip(&batch.responses)
            .find(|(request, response)| response.id != request.id)
        {
            return Err(Error::CommandExecution(format!(
                "answer for command {} found where command {} was expected",
                response.id, request.id
            )));
        }

        let results = requests
            .iter()
            .zip(batch.responses)
            .map(|(request, response)| {
                if response.status == 0 {
                    return CommandResult::success(request.id, request.ignore_error, response.payload);
                }
                let kind = ErrorKind::from_code(response.status).unwrap_or(ErrorKind::CommandExecution);
                CommandResult {
                    id: request.id,
                    ignore_error: request.ignore_error,
                    outcome: Err(CommandFailure {
                        kind,
                        detail: response.detail,
                        response: (!response.payload.is_empty()).then_some(response.payload),
                    }),
                }
            })
            .collect();

        if batch.internal_error != 0 {
            tracing::warn!(internal_error = batch.internal_error, "Secure side reported an internal error");
        }

        Ok(BatchOutcome {
            results,
            internal_error: batch.internal_error,
        })
    }
}
