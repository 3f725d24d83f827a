//! Command document decoding

use super::schema;
use super::tree::{self, XmlElement};
use super::decode_b64;
use crate::error::{ErrorKind, Result};
use crate::protocol::{Command, CommandSlot, CommandType, RejectedCommand, UNKNOWN_COMMAND_ID};

/// Decoded command document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    /// One slot per recognised command, in document order
    pub slots: Vec<CommandSlot>,
    /// Structural problems found in the document. Decoding continues
    /// past them, but the batch as a whole is reported as an XML error.
    pub violations: Vec<String>,
}

impl CommandBatch {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Decode a command document.
///
/// Only a document that cannot be parsed at all is an error. Commands with
/// an unknown type are skipped; commands with a missing or undecodable
/// value occupy a rejected slot.
pub fn parse_commands(body: &[u8]) -> Result<CommandBatch> {
    let root = tree::parse(body)?;

    let violations = schema::validate_command_document(&root);
    if !violations.is_empty() {
        tracing::warn!(
            count = violations.len(),
            first = %violations[0],
            "Command document failed validation"
        );
    }

    let mut slots = Vec::new();
    if let Some(commands) = root.child("commands") {
        for node in commands.children_named("command") {
            if let Some(slot) = parse_command(node) {
                slots.push(slot);
            }
        }
    }

    tracing::debug!(commands = slots.len(), "Decoded command document");
    Ok(CommandBatch { slots, violations })
}

fn parse_command(node: &XmlElement) -> Option<CommandSlot> {
    let type_name = node.attribute("type").unwrap_or_default();
    let Some(command_type) = CommandType::from_wire(type_name) else {
        tracing::warn!(command_type = %type_name, "Skipping command of unknown type");
        return None;
    };

    let id = node
        .attribute("id")
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(UNKNOWN_COMMAND_ID);
    let ignore_error = node.attribute("ignoreError") == Some("true");

    let reject = |reason: String| -> CommandSlot {
        tracing::warn!(id, %command_type, "Rejecting command: {}", reason);
        Err(RejectedCommand {
            id,
            command_type,
            ignore_error,
            kind: ErrorKind::Xml,
            reason,
        })
    };

    let Some(value) = node.child("commandValue") else {
        return Some(reject("missing commandValue".to_string()));
    };
    let payload = match decode_b64(&value.text) {
        Ok(payload) if payload.is_empty() => {
            return Some(reject("empty commandValue".to_string()))
        }
        Ok(payload) => payload,
        Err(e) => return Some(reject(e.to_string())),
    };

    Some(Ok(Command {
        id,
        command_type,
        ignore_error,
        payload,
    }))
}
