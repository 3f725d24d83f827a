//! Provisioning protocol data model
//!
//! Commands received from the server, the results sent back, the link
//! relations that drive the session loop, and the states reported to the
//! caller while a session runs.

use crate::error::ErrorKind;
use std::fmt;
use std::sync::Arc;

/// Command identifier used when a command carries no `id` attribute.
pub const UNKNOWN_COMMAND_ID: u32 = 0xFFFF_FFFF;

/// Payload returned for a successful object or trustlet upload: one zero byte.
pub const UPLOAD_OK: [u8; 1] = [0];

/// Kind of a server command, as named by its `type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// Opaque message for the secure side (`CMP`)
    Protocol,
    /// Secure object to persist in the registry (`SO_UPLOAD`)
    ObjectUpload,
    /// Trustlet binary handed to the caller (`TLT_UPLOAD`)
    TrustletUpload,
}

impl CommandType {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "CMP" => Some(CommandType::Protocol),
            "SO_UPLOAD" => Some(CommandType::ObjectUpload),
            "TLT_UPLOAD" => Some(CommandType::TrustletUpload),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            CommandType::Protocol => "CMP",
            CommandType::ObjectUpload => "SO_UPLOAD",
            CommandType::TrustletUpload => "TLT_UPLOAD",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A decoded server command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: u32,
    pub command_type: CommandType,
    /// Continue with later commands even if this one fails
    pub ignore_error: bool,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(id: u32, command_type: CommandType, payload: Vec<u8>) -> Self {
        Self {
            id,
            command_type,
            ignore_error: false,
            payload,
        }
    }

    pub fn ignoring_errors(mut self) -> Self {
        self.ignore_error = true;
        self
    }
}

/// A command that could not be decoded. It still gets a result slot so the
/// server learns about the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCommand {
    pub id: u32,
    pub command_type: CommandType,
    pub ignore_error: bool,
    pub kind: ErrorKind,
    pub reason: String,
}

/// One position of a decoded command document.
pub type CommandSlot = std::result::Result<Command, RejectedCommand>;

/// Failure details attached to a command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub kind: ErrorKind,
    /// Secure-side detail code, `0` when none
    pub detail: u32,
    /// Response bytes the secure side produced alongside the failure
    pub response: Option<Vec<u8>>,
}

impl CommandFailure {
    pub fn new(kind: ErrorKind, detail: u32) -> Self {
        Self {
            kind,
            detail,
            response: None,
        }
    }
}

/// Outcome of one command, reported back to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub id: u32,
    pub ignore_error: bool,
    pub outcome: std::result::Result<Vec<u8>, CommandFailure>,
}

impl CommandResult {
    pub fn success(id: u32, ignore_error: bool, payload: Vec<u8>) -> Self {
        Self {
            id,
            ignore_error,
            outcome: Ok(payload),
        }
    }

    pub fn failure(id: u32, ignore_error: bool, kind: ErrorKind, detail: u32) -> Self {
        Self {
            id,
            ignore_error,
            outcome: Err(CommandFailure::new(kind, detail)),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }

    /// A failed command whose errors are not ignored ends the batch.
    pub fn stops_batch(&self) -> bool {
        self.is_failure() && !self.ignore_error
    }
}

// Relation markers, matched by substring.
const REL_SELF: &str = "relation/self";
const REL_SYSTEM_INFO: &str = "relation/system_info";
const REL_INITIAL_DELETE: &str = "initial_delete";
const REL_INITIAL_POST: &str = "initial_post";
const REL_COMMAND_RESULT: &str = "relation/command_result";
const REL_NEXT: &str = "relation/next";

/// What the session loop must do with the current exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// Resend the previously performed request
    Repeat,
    /// PUT the device system information
    SystemInfo,
    /// Execute the received commands and POST their results
    CommandResult,
    /// GET the next document
    Next,
    /// First request of a session: POST
    InitialPost,
    /// First request of an unregistration: DELETE
    InitialDelete,
    /// Relation this agent does not understand
    Unknown(String),
    /// No relation: the session is over
    End,
}

impl Relation {
    /// Classify a relation value received from the server.
    pub fn parse(value: Option<&str>) -> Self {
        let value = match value.map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => return Relation::End,
        };

        if value.contains(REL_SELF) {
            Relation::Repeat
        } else if value.contains(REL_SYSTEM_INFO) {
            Relation::SystemInfo
        } else if value.contains(REL_INITIAL_DELETE) {
            Relation::InitialDelete
        } else if value.contains(REL_INITIAL_POST) {
            Relation::InitialPost
        } else if value.contains(REL_COMMAND_RESULT) {
            Relation::CommandResult
        } else if value.contains(REL_NEXT) {
            Relation::Next
        } else {
            Relation::Unknown(value.to_string())
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Relation::Repeat => REL_SELF,
            Relation::SystemInfo => REL_SYSTEM_INFO,
            Relation::CommandResult => REL_COMMAND_RESULT,
            Relation::Next => REL_NEXT,
            Relation::InitialPost => REL_INITIAL_POST,
            Relation::InitialDelete => REL_INITIAL_DELETE,
            Relation::Unknown(value) => value,
            Relation::End => "",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::End => f.write_str("<end>"),
            other => f.write_str(other.as_wire()),
        }
    }
}

/// One step of the conversation: where to go, why, and what the server sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub link: Option<String>,
    pub relation: Relation,
    pub body: Option<Vec<u8>>,
}

impl Exchange {
    pub fn new(link: impl Into<String>, relation: Relation, body: Option<Vec<u8>>) -> Self {
        Self {
            link: Some(link.into()),
            relation,
            body,
        }
    }

    /// An exchange with no further relation.
    pub fn end() -> Self {
        Self {
            link: None,
            relation: Relation::End,
            body: None,
        }
    }
}

/// Progress reported to the caller of a provisioning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    /// The session is about to contact the server
    Connecting,
    /// The server sent a trustlet binary; the caller installs it
    InstallingTrustlet(Vec<u8>),
    /// The server ended the session normally
    Finished,
    /// A failure occurred
    Error(ErrorKind),
    /// The session task is about to end; always the last callback
    ThreadExiting,
}

/// Caller-supplied progress callback. Invoked from the session task.
pub type StateCallback = Arc<dyn Fn(ProvisioningState) + Send + Sync>;
