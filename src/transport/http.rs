//! HTTP transport
//!
//! Sends XML documents to the server and reads JSON answers of the form
//! `{"links": [{"rel": "...", "href": "..."}], "content": "<xml/>"}`.
//! The first link names the next step. An empty answer ends the session.

use super::{Transport, Verb};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol::{Exchange, Relation};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    links: Vec<EnvelopeLink>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeLink {
    rel: String,
    href: String,
}

/// [`Transport`] over HTTPS using reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    content_type: String,
    accept: String,
}

impl HttpTransport {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            content_type: config.content_type.clone(),
            accept: config.accept.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(&self, verb: Verb, link: &str, body: Option<&[u8]>) -> Result<Exchange> {
        let method = match verb {
            Verb::Get => Method::GET,
            Verb::Put => Method::PUT,
            Verb::Post => Method::POST,
            Verb::Delete => Method::DELETE,
        };

        let mut request = self
            .client
            .request(method, link)
            .header(ACCEPT, self.accept.as_str());
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, self.content_type.as_str())
                .body(body.to_vec());
        }

        tracing::debug!(%verb, link, bytes = body.map_or(0, <[u8]>::len), "Sending request");

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} {} failed: {}", verb, link, e)))?;
        check_status(response.status(), verb, link)?;

        let answer = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read answer to {} {}: {}", verb, link, e)))?;
        parse_envelope(&answer)
    }
}

/// Map an HTTP status to the session outcome.
fn check_status(status: StatusCode, verb: Verb, link: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("{} {} returned {}", verb, link, status);
    tracing::warn!("{}", message);
    match status {
        StatusCode::PRECONDITION_FAILED => Err(Error::SePreconditionNotMet(message)),
        StatusCode::HTTP_VERSION_NOT_SUPPORTED => Err(Error::SeCmpVersionUnsupported(message)),
        _ => Err(Error::Network(message)),
    }
}

/// Turn a server answer into the next exchange.
fn parse_envelope(answer: &[u8]) -> Result<Exchange> {
    if answer.iter().all(u8::is_ascii_whitespace) {
        return Ok(Exchange::end());
    }

    let envelope: Envelope = serde_json::from_slice(answer)
        .map_err(|e| Error::Network(format!("Malformed server answer: {}", e)))?;

    let body = envelope
        .content
        .filter(|c| !c.trim().is_empty())
        .map(String::into_bytes);

    let exchange = match envelope.links.into_iter().next() {
        Some(link) => Exchange {
            link: Some(link.href),
            relation: Relation::parse(Some(&link.rel)),
            body,
        },
        None => Exchange {
            body,
            ..Exchange::end()
        },
    };
    Ok(exchange)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_empty_answer_ends_session() {
        assert_eq!(parse_envelope(b"").unwrap(), Exchange::end());
        assert_eq!(parse_envelope(b" \n").unwrap(), Exchange::end());
        assert_eq!(parse_envelope(b"{}").unwrap(), Exchange::end());
    }

    #[test]
    fn test_first_link_wins() {
        let answer = br#"{
            "links": [
                {"rel": "http://x/relation/command_result", "href": "https://se/enrollment/1"},
                {"rel": "relation/next", "href": "https://se/other"}
            ],
            "content": "<ContentManagementCommand/>"
        }"#;
        let exchange = parse_envelope(answer).unwrap();
        assert_eq!(exchange.link.as_deref(), Some("https://se/enrollment/1"));
        assert_eq!(exchange.relation, Relation::CommandResult);
        assert_eq!(exchange.body, Some(b"<ContentManagementCommand/>".to_vec()));
    }

    #[test]
    fn test_malformed_answer() {
        let err = parse_envelope(b"<html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[test]
    fn test_status_mapping() {
        assert!(check_status(StatusCode::OK, Verb::Get, "l").is_ok());
        assert!(check_status(StatusCode::CREATED, Verb::Post, "l").is_ok());
        assert_eq!(
            check_status(StatusCode::PRECONDITION_FAILED, Verb::Put, "l")
                .unwrap_err()
                .kind(),
            ErrorKind::SePreconditionNotMet
        );
        assert_eq!(
            check_status(StatusCode::HTTP_VERSION_NOT_SUPPORTED, Verb::Put, "l")
                .unwrap_err()
                .kind(),
            ErrorKind::SeCmpVersionUnsupported
        );
        assert_eq!(
            check_status(StatusCode::INTERNAL_SERVER_ERROR, Verb::Get, "l")
                .unwrap_err()
                .kind(),
            ErrorKind::Network
        );
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let config = ServerConfig {
            request_timeout_secs: 2,
            ..Default::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let err = transport
            .perform(Verb::Get, "http://127.0.0.1:1/enrollment", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
