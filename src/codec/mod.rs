//! XML documents exchanged with the server
//!
//! Incoming: the command document (`commands/command`).
//! Outgoing: command results, system information and trustlet
//! installation requests, all rooted at `ContentManagementResponse`.
//! Binary values travel as base64 text.

mod commands;
mod documents;
mod results;
mod schema;
mod tree;

pub use commands::{parse_commands, CommandBatch};
pub use documents::{
    build_system_info_document, build_trustlet_request_document, MemoryType, TrustletInstallationRequest,
    TrustletPayload,
};
pub use results::{build_result_document, parse_result_document};

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

/// Default namespace of every document.
pub const ENROLLMENT_NS: &str = "http://www.mcore.gi-de.com/2012/04/schema/EnrollmentService";
/// Namespace of the platform types (`mcpt:` prefix).
pub const PLATFORM_TYPES_NS: &str = "http://www.mcore.gi-de.com/2012/02/schema/MCPlatformTypes";

pub(crate) const RESPONSE_ROOT: &str = "ContentManagementResponse";
pub(crate) const COMMAND_ROOT: &str = "ContentManagementCommand";

pub(crate) fn encode_b64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64 text, ignoring embedded whitespace and line breaks.
pub(crate) fn decode_b64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::Xml(format!("Invalid base64 content: {}", e)))
}

fn xml_error(e: impl std::fmt::Display) -> Error {
    Error::Xml(format!("Failed to write document: {}", e))
}

/// Writer for `ContentManagementResponse` documents.
pub(crate) struct ResponseWriter {
    writer: Writer<Vec<u8>>,
}

impl ResponseWriter {
    /// Start a document and open the root element.
    pub fn begin() -> Result<Self> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(xml_error)?;

        let mut root = BytesStart::new(RESPONSE_ROOT);
        root.push_attribute(("xmlns", ENROLLMENT_NS));
        root.push_attribute(("xmlns:mcpt", PLATFORM_TYPES_NS));
        writer.write_event(Event::Start(root)).map_err(xml_error)?;

        Ok(Self { writer })
    }

    pub fn start(&mut self, element: BytesStart<'_>) -> Result<()> {
        self.writer
            .write_event(Event::Start(element))
            .map_err(xml_error)
    }

    pub fn end(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_error)
    }

    pub fn empty(&mut self, element: BytesStart<'_>) -> Result<()> {
        self.writer
            .write_event(Event::Empty(element))
            .map_err(xml_error)
    }

    pub fn text(&mut self, text: &str) -> Result<()> {
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_error)
    }

    /// Write `<name>text</name>`.
    pub fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(BytesStart::new(name))?;
        self.text(text)?;
        self.end(name)
    }

    /// Close the root element and return the document bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.end(RESPONSE_ROOT)?;
        Ok(self.writer.into_inner())
    }
}
