//! Command result documents

use super::schema;
use super::tree;
use super::{decode_b64, encode_b64, ResponseWriter};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{CommandFailure, CommandResult, UNKNOWN_COMMAND_ID};
use quick_xml::events::BytesStart;

/// Build the `commandResultList` document for a batch of results.
///
/// A secure-side execution failure that still produced response bytes is
/// sent as a value: the server reads the failure out of the response.
pub fn build_result_document(results: &[CommandResult]) -> Result<Vec<u8>> {
    let mut doc = ResponseWriter::begin()?;
    doc.start(BytesStart::new("commandResultList"))?;

    for result in results {
        let id = result.id.to_string();
        let mut element = BytesStart::new("commandResult");
        element.push_attribute(("id", id.as_str()));
        doc.start(element)?;

        match &result.outcome {
            Ok(value) => doc.text_element("resultValue", &encode_b64(value))?,
            Err(CommandFailure {
                kind: ErrorKind::CommandExecution,
                response: Some(response),
                ..
            }) => doc.text_element("resultValue", &encode_b64(response))?,
            Err(failure) => {
                let detail = failure.detail.to_string();
                let mut error = BytesStart::new("resultError");
                error.push_attribute(("errorCode", failure.kind.wire_name()));
                if failure.detail != 0 {
                    error.push_attribute(("errorDetail", detail.as_str()));
                }
                doc.empty(error)?;
            }
        }

        doc.end("commandResult")?;
    }

    doc.end("commandResultList")?;
    let document = doc.finish()?;
    schema::check_outgoing(&document);
    Ok(document)
}

/// Read a result document back into results.
///
/// `ignoreError` is not carried on the wire, so every result comes back
/// with it unset.
pub fn parse_result_document(body: &[u8]) -> Result<Vec<CommandResult>> {
    let root = tree::parse(body)?;
    let list = root
        .child("commandResultList")
        .ok_or_else(|| Error::Xml("missing commandResultList".to_string()))?;

    let mut results = Vec::new();
    for node in list.children_named("commandResult") {
        let id = node
            .attribute("id")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(UNKNOWN_COMMAND_ID);

        let outcome = if let Some(value) = node.child("resultValue") {
            Ok(decode_b64(&value.text)?)
        } else if let Some(error) = node.child("resultError") {
            let code = error.attribute("errorCode").unwrap_or_default();
            let kind = ErrorKind::from_wire_name(code)
                .ok_or_else(|| Error::Xml(format!("unknown errorCode '{}'", code)))?;
            let detail = match error.attribute("errorDetail") {
                Some(d) => d
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| Error::Xml(format!("bad errorDetail '{}'", d)))?,
                None => 0,
            };
            Err(CommandFailure::new(kind, detail))
        } else {
            return Err(Error::Xml(format!("commandResult {} has no outcome", id)));
        };

        results.push(CommandResult {
            id,
            ignore_error: false,
            outcome,
        });
    }

    Ok(results)
}
