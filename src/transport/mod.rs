//! Transport to the provisioning server
//!
//! The session loop only sees [`Transport`]: perform a verb on a link,
//! optionally with a document, and get back the next exchange.

mod http;

pub use http::HttpTransport;

use crate::error::Result;
use crate::protocol::Exchange;
use async_trait::async_trait;
use std::fmt;

/// HTTP verb of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Put,
    Post,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Get => "GET",
            Verb::Put => "PUT",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Connection to the provisioning server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare for a session.
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Release whatever [`Transport::open`] acquired.
    async fn close(&self) {}

    /// Perform one request. The answer names the next link, its relation
    /// and the server's document, each of which may be absent.
    async fn perform(&self, verb: Verb, link: &str, body: Option<&[u8]>) -> Result<Exchange>;
}
