//! Command dispatch
//!
//! Walks a decoded command batch in document order. Consecutive protocol
//! commands run together in one secure-side batch; object uploads go to the
//! registry; trustlet uploads go to the caller. The first failure whose
//! errors are not ignored ends the batch: nothing after it runs and no
//! result after it is reported.
//!
//! Each run of consecutive protocol commands opens its own secure session,
//! so a batch such as `[CMP, SO_UPLOAD, CMP]` opens two.

use crate::codec::{build_result_document, parse_commands};
use crate::config::ResultOrder;
use crate::error::ErrorKind;
use crate::protocol::{
    Command, CommandResult, CommandSlot, CommandType, ProvisioningState, StateCallback, UPLOAD_OK,
};
use crate::registry::Registry;
use crate::tee::{CmpRequest, ContentManager};
use std::sync::Arc;

/// Results of one dispatched batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub results: Vec<CommandResult>,
    /// Batch-level failure: the secure side could not run a protocol batch
    pub error: Option<ErrorKind>,
}

/// A command document turned into its result document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandledDocument {
    /// Result document to send, `None` when none could be produced
    pub response: Option<Vec<u8>>,
    /// Failure to report to the caller
    pub error: Option<ErrorKind>,
}

impl HandledDocument {
    fn failed(kind: ErrorKind) -> Self {
        Self {
            response: None,
            error: Some(kind),
        }
    }
}

/// Executes server commands.
pub struct Dispatcher {
    executor: Arc<dyn ContentManager>,
    registry: Arc<dyn Registry>,
    callback: Option<StateCallback>,
    order: ResultOrder,
}

/// Accumulates results and remembers where the batch stopped.
#[derive(Default)]
struct Collector {
    protocol: Vec<(usize, CommandResult)>,
    uploads: Vec<(usize, CommandResult)>,
    pending: Vec<(usize, CmpRequest)>,
    stop_at: Option<usize>,
    error: Option<ErrorKind>,
}

impl Collector {
    fn record(&mut self, position: usize, command_type: CommandType, result: CommandResult) {
        if result.stops_batch() && self.stop_at.is_none() {
            self.stop_at = Some(position);
        }
        match command_type {
            CommandType::Protocol => self.protocol.push((position, result)),
            _ => self.uploads.push((position, result)),
        }
    }

    fn stopped(&self) -> bool {
        self.stop_at.is_some()
    }

    fn finish(self, order: ResultOrder) -> DispatchOutcome {
        let limit = self.stop_at.unwrap_or(usize::MAX);
        let keep = |entries: Vec<(usize, CommandResult)>| {
            let mut entries: Vec<_> = entries.into_iter().filter(|(p, _)| *p <= limit).collect();
            entries.sort_by_key(|(p, _)| *p);
            entries
        };

        let protocol = keep(self.protocol);
        let uploads = keep(self.uploads);
        let ordered: Vec<_> = match order {
            ResultOrder::Grouped => protocol.into_iter().chain(uploads).collect(),
            ResultOrder::Interleaved => {
                let mut all = protocol;
                all.extend(uploads);
                all.sort_by_key(|(p, _)| *p);
                all
            }
        };

        DispatchOutcome {
            results: ordered.into_iter().map(|(_, r)| r).collect(),
            error: self.error,
        }
    }
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn ContentManager>, registry: Arc<dyn Registry>) -> Self {
        Self {
            executor,
            registry,
            callback: None,
            order: ResultOrder::default(),
        }
    }

    /// Callback that receives trustlet uploads.
    pub fn with_callback(mut self, callback: StateCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_order(mut self, order: ResultOrder) -> Self {
        self.order = order;
        self
    }

    /// Decode a command document, run it, and build the result document.
    pub async fn handle_document(&self, body: Option<&[u8]>) -> HandledDocument {
        let Some(body) = body else {
            tracing::error!("Command result requested without a command document");
            return HandledDocument::failed(ErrorKind::IllegalArgument);
        };

        let batch = match parse_commands(body) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!("Failed to decode command document: {}", e);
                return HandledDocument::failed(e.kind());
            }
        };

        let mut error = (!batch.is_valid()).then_some(ErrorKind::Xml);
        let outcome = self.dispatch(batch.slots).await;
        if outcome.error.is_some() {
            error = outcome.error;
        }

        match build_result_document(&outcome.results) {
            Ok(document) => HandledDocument {
                response: Some(document),
                error,
            },
            Err(e) => {
                tracing::error!("Failed to build result document: {}", e);
                HandledDocument::failed(e.kind())
            }
        }
    }

    /// Run decoded commands and collect their results.
    pub async fn dispatch(&self, slots: Vec<CommandSlot>) -> DispatchOutcome {
        let mut collector = Collector::default();

        for (position, slot) in slots.into_iter().enumerate() {
            match slot {
                Ok(Command {
                    id,
                    command_type: CommandType::Protocol,
                    ignore_error,
                    payload,
                }) => collector.pending.push((
                    position,
                    CmpRequest {
                        id,
                        ignore_error,
                        payload,
                    },
                )),
                Ok(command) => {
                    self.flush(&mut collector).await;
                    if collector.stopped() {
                        break;
                    }
                    let command_type = command.command_type;
                    let result = self.upload(command).await;
                    collector.record(position, command_type, result);
                }
                Err(rejected) => {
                    if !rejected.ignore_error {
                        self.flush(&mut collector).await;
                        if collector.stopped() {
                            break;
                        }
                    }
                    let result = CommandResult::failure(
                        rejected.id,
                        rejected.ignore_error,
                        rejected.kind,
                        0,
                    );
                    collector.record(position, rejected.command_type, result);
                }
            }
            if collector.stopped() {
                break;
            }
        }

        if !collector.stopped() {
            self.flush(&mut collector).await;
        }

        collector.finish(self.order)
    }

    /// Run the pending protocol commands as one batch.
    async fn flush(&self, collector: &mut Collector) {
        if collector.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut collector.pending);
        let requests: Vec<CmpRequest> = pending.iter().map(|(_, r)| r.clone()).collect();

        match self.executor.execute(&requests).await {
            Ok(outcome) => {
                let mut answers = outcome.results.into_iter();
                for (position, request) in pending {
                    if collector.stopped() {
                        break;
                    }
                    let result = answers.next().unwrap_or_else(|| {
                        tracing::warn!(id = request.id, "Secure side left command unanswered");
                        CommandResult::failure(
                            request.id,
                            request.ignore_error,
                            ErrorKind::CommandExecution,
                            0,
                        )
                    });
                    collector.record(position, CommandType::Protocol, result);
                }
            }
            Err(e) => {
                tracing::warn!(
                    commands = requests.len(),
                    "Secure side batch failed, reporting it per command: {}",
                    e
                );
                let kind = e.kind();
                collector.error = Some(kind);
                for (position, request) in pending {
                    let result =
                        CommandResult::failure(request.id, request.ignore_error, kind, 0);
                    collector.record(position, CommandType::Protocol, result);
                }
            }
        }
    }

    async fn upload(&self, command: Command) -> CommandResult {
        let Command {
            id,
            command_type,
            ignore_error,
            payload,
        } = command;

        match command_type {
            CommandType::ObjectUpload => match self.registry.store_secure_object(&payload).await {
                Ok(()) => CommandResult::success(id, ignore_error, UPLOAD_OK.to_vec()),
                Err(e) => {
                    tracing::warn!(id, "Failed to store secure object: {}", e);
                    CommandResult::failure(id, ignore_error, e.kind(), 0)
                }
            },
            CommandType::TrustletUpload => match &self.callback {
                Some(callback) => {
                    callback(ProvisioningState::InstallingTrustlet(payload));
                    CommandResult::success(id, ignore_error, UPLOAD_OK.to_vec())
                }
                None => {
                    tracing::warn!(id, "No receiver for trustlet upload");
                    CommandResult::failure(id, ignore_error, ErrorKind::CommandNotSupported, 0)
                }
            },
            CommandType::Protocol => {
                CommandResult::failure(id, ignore_error, ErrorKind::Internal, 0)
            }
        }
    }
}
