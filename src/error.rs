//! trustprov error types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error kinds shared by callers, the server protocol and the TEE side.
///
/// The numeric codes are the status values exchanged with callers and the
/// secure side; [`ErrorKind::wire_name`] is the string placed in a
/// `resultError@errorCode` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unsupported command, or one that cannot run through this interface
    CommandNotSupported,
    /// Another provisioning session holds the agent
    Lock,
    /// The secure side reported a failure for a specific command
    CommandExecution,
    /// Container write failure
    Registry,
    /// Failure talking to the secure side
    MobicoreConnection,
    /// Normal or secure world ran out of memory
    OutOfMemory,
    /// Unexpected or logic error
    Internal,
    /// Argument not allowed
    IllegalArgument,
    /// Network failure
    Network,
    /// XML build, parse or validation failure
    Xml,
    /// Container read failure, usually because it does not exist
    RegistryObjectNotAvailable,
    /// Server does not support the device's CMP version
    SeCmpVersionUnsupported,
    /// Server-side preconditions for the request are not met
    SePreconditionNotMet,
    /// Requested container does not exist. Never surfaced to callers.
    NoContainer,
}

impl ErrorKind {
    /// Numeric status code of this kind.
    pub fn code(self) -> u32 {
        match self {
            ErrorKind::CommandNotSupported => 0x01,
            ErrorKind::Lock => 0x02,
            ErrorKind::CommandExecution => 0x03,
            ErrorKind::Registry => 0x04,
            ErrorKind::MobicoreConnection => 0x05,
            ErrorKind::OutOfMemory => 0x06,
            ErrorKind::Internal => 0x07,
            ErrorKind::IllegalArgument => 0x08,
            ErrorKind::Network => 0x09,
            ErrorKind::Xml => 0x0A,
            ErrorKind::RegistryObjectNotAvailable => 0x0B,
            ErrorKind::SeCmpVersionUnsupported => 0x0C,
            ErrorKind::SePreconditionNotMet => 0x0D,
            ErrorKind::NoContainer => 0x30,
        }
    }

    /// Map a numeric status code back to its kind. `0` (success) and
    /// unknown codes yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            0x01 => ErrorKind::CommandNotSupported,
            0x02 => ErrorKind::Lock,
            0x03 => ErrorKind::CommandExecution,
            0x04 => ErrorKind::Registry,
            0x05 => ErrorKind::MobicoreConnection,
            0x06 => ErrorKind::OutOfMemory,
            0x07 => ErrorKind::Internal,
            0x08 => ErrorKind::IllegalArgument,
            0x09 => ErrorKind::Network,
            0x0A => ErrorKind::Xml,
            0x0B => ErrorKind::RegistryObjectNotAvailable,
            0x0C => ErrorKind::SeCmpVersionUnsupported,
            0x0D => ErrorKind::SePreconditionNotMet,
            0x30 => ErrorKind::NoContainer,
            _ => return None,
        };
        Some(kind)
    }

    /// Error code string understood by the server.
    ///
    /// Kinds the server has no name for are reported as `INTERNAL_ERROR`.
    /// That includes `CommandExecution`.
    pub fn wire_name(self) -> &'static str {
        match self {
            ErrorKind::CommandNotSupported => "COMMAND_NOT_SUPPORTED_ERROR",
            ErrorKind::Lock => "BUSY_ERROR",
            ErrorKind::Registry => "REGISTRY_ERROR",
            ErrorKind::MobicoreConnection => "MOBICORE_CONNECTION_ERROR",
            ErrorKind::OutOfMemory => "OUT_OF_MEMORY_ERROR",
            ErrorKind::Xml => "XML_ERROR",
            ErrorKind::RegistryObjectNotAvailable => "REGISTRY_OBJECT_NOT_AVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Inverse of [`ErrorKind::wire_name`].
    pub fn from_wire_name(name: &str) -> Option<Self> {
        let kind = match name {
            "COMMAND_NOT_SUPPORTED_ERROR" => ErrorKind::CommandNotSupported,
            "BUSY_ERROR" => ErrorKind::Lock,
            "COMMAND_EXECUTION_ERROR" => ErrorKind::CommandExecution,
            "REGISTRY_ERROR" => ErrorKind::Registry,
            "MOBICORE_CONNECTION_ERROR" => ErrorKind::MobicoreConnection,
            "OUT_OF_MEMORY_ERROR" => ErrorKind::OutOfMemory,
            "INTERNAL_ERROR" => ErrorKind::Internal,
            "XML_ERROR" => ErrorKind::Xml,
            "REGISTRY_OBJECT_NOT_AVAILABLE" => ErrorKind::RegistryObjectNotAvailable,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02x})", self, self.code())
    }
}

/// trustprov error type
#[derive(Error, Debug)]
pub enum Error {
    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(String),

    /// Session busy
    #[error("Provisioning agent busy: {0}")]
    Lock(String),

    /// Secure side command failure
    #[error("Command execution error: {0}")]
    CommandExecution(String),

    /// Registry write failure
    #[error("Registry error: {0}")]
    Registry(String),

    /// Secure channel failure
    #[error("TEE connection error: {0}")]
    MobicoreConnection(String),

    /// Out of memory
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Illegal argument
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// XML error
    #[error("XML error: {0}")]
    Xml(String),

    /// Registry object missing
    #[error("Registry object not available: {0}")]
    RegistryObjectNotAvailable(String),

    /// Server rejected the CMP version
    #[error("CMP version not supported by server: {0}")]
    SeCmpVersionUnsupported(String),

    /// Server precondition failure
    #[error("Server precondition not met: {0}")]
    SePreconditionNotMet(String),

    /// Container does not exist
    #[error("No container: {0}")]
    NoContainer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build an error of the given kind.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::CommandNotSupported => Error::CommandNotSupported(message),
            ErrorKind::Lock => Error::Lock(message),
            ErrorKind::CommandExecution => Error::CommandExecution(message),
            ErrorKind::Registry => Error::Registry(message),
            ErrorKind::MobicoreConnection => Error::MobicoreConnection(message),
            ErrorKind::OutOfMemory => Error::OutOfMemory(message),
            ErrorKind::Internal => Error::Internal(message),
            ErrorKind::IllegalArgument => Error::IllegalArgument(message),
            ErrorKind::Network => Error::Network(message),
            ErrorKind::Xml => Error::Xml(message),
            ErrorKind::RegistryObjectNotAvailable => Error::RegistryObjectNotAvailable(message),
            ErrorKind::SeCmpVersionUnsupported => Error::SeCmpVersionUnsupported(message),
            ErrorKind::SePreconditionNotMet => Error::SePreconditionNotMet(message),
            ErrorKind::NoContainer => Error::NoContainer(message),
        }
    }

    /// The kind reported to callers and the server.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CommandNotSupported(_) => ErrorKind::CommandNotSupported,
            Error::Lock(_) => ErrorKind::Lock,
            Error::CommandExecution(_) => ErrorKind::CommandExecution,
            Error::Registry(_) => ErrorKind::Registry,
            Error::MobicoreConnection(_) => ErrorKind::MobicoreConnection,
            Error::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Error::Internal(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Internal,
            Error::IllegalArgument(_) | Error::Config(_) => ErrorKind::IllegalArgument,
            Error::Network(_) => ErrorKind::Network,
            Error::Xml(_) => ErrorKind::Xml,
            Error::RegistryObjectNotAvailable(_) => ErrorKind::RegistryObjectNotAvailable,
            Error::SeCmpVersionUnsupported(_) => ErrorKind::SeCmpVersionUnsupported,
            Error::SePreconditionNotMet(_) => ErrorKind::SePreconditionNotMet,
            Error::NoContainer(_) => ErrorKind::NoContainer,
        }
    }
}

/// Result type alias for trustprov operations
pub type Result<T> = std::result::Result<T, Error>;
