//! Shared-buffer layout of content management batches.
//!
//! All integers are little endian.
//!
//! Request batch:
//! ```text
//! count:u32 | { id:u32 | flags:u32 | len:u32 | payload[len] } * count
//! ```
//! Response batch:
//! ```text
//! count:u32 | internal_error:u32 | { id:u32 | status:u32 | detail:u32 | len:u32 | payload[len] } * count
//! ```
//! The secure side may answer fewer commands than requested; it stops at
//! the first failing command whose errors are not ignored.

use crate::device::{Suid, TeeVersion, SUID_LEN};
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Content management command: report the TEE version.
pub const CMD_GET_VERSION: u32 = 0x0000_0009;
/// Content management command: report the SUID.
pub const CMD_GET_SUID: u32 = 0x0000_000A;
/// Marks a response identifier.
pub const RSP_ID_MASK: u32 = 1 << 31;
/// The only version layout this agent understands.
pub const VERSION_TAG2: u32 = 2;

const FLAG_IGNORE_ERROR: u32 = 0x1;
const PRODUCT_ID_LEN: usize = 64;
const RSP_HEADER_LEN: usize = 8;
const VERSION_RSP_LEN: usize = RSP_HEADER_LEN + 4 + PRODUCT_ID_LEN + 8 * 4;
const SUID_RSP_LEN: usize = RSP_HEADER_LEN + SUID_LEN;

/// One message for the secure side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmpRequest {
    pub id: u32,
    pub ignore_error: bool,
    pub payload: Vec<u8>,
}

/// The secure side's answer to one message. `status` 0 means success,
/// anything else is an error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmpResponse {
    pub id: u32,
    pub status: u32,
    pub detail: u32,
    pub payload: Vec<u8>,
}

/// Decoded response batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmpBatchResponse {
    pub responses: Vec<CmpResponse>,
    /// Secure-side internal error, `0` when none
    pub internal_error: u32,
}

/// Encode a request batch. Fails when it does not fit in `capacity` bytes.
pub fn encode_requests(requests: &[CmpRequest], capacity: usize) -> Result<BytesMut> {
    let needed = 4 + requests.iter().map(|r| 12 + r.payload.len()).sum::<usize>();
    if needed > capacity {
        return Err(Error::OutOfMemory(format!(
            "Command batch needs {} bytes, shared buffer holds {}",
            needed, capacity
        )));
    }

    let mut buf = BytesMut::with_capacity(needed);
    buf.put_u32_le(requests.len() as u32);
    for request in requests {
        buf.put_u32_le(request.id);
        buf.put_u32_le(if request.ignore_error { FLAG_IGNORE_ERROR } else { 0 });
        buf.put_u32_le(request.payload.len() as u32);
        buf.put_slice(&request.payload);
    }
    Ok(buf)
}

/// Decode a response batch written by the secure side.
pub fn decode_responses(mut buf: &[u8]) -> Result<CmpBatchResponse> {
    if buf.remaining() < 8 {
        return Err(Error::CommandExecution("Response batch truncated".to_string()));
    }
    let count = buf.get_u32_le() as usize;
    let internal_error = buf.get_u32_le();

    let mut responses = Vec::new();
    for index in 0..count {
        if buf.remaining() < 16 {
            return Err(Error::CommandExecution(format!(
                "Response {} of {} truncated",
                index + 1,
                count
            )));
        }
        let id = buf.get_u32_le();
        let status = buf.get_u32_le();
        let detail = buf.get_u32_le();
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(Error::CommandExecution(format!(
                "Response {} claims {} bytes, {} left",
                index + 1,
                len,
                buf.remaining()
            )));
        }
        let payload = buf[..len].to_vec();
        buf.advance(len);
        responses.push(CmpResponse {
            id,
            status,
            detail,
            payload,
        });
    }

    Ok(CmpBatchResponse {
        responses,
        internal_error,
    })
}

/// Payload of a single-word command such as [`CMD_GET_VERSION`].
pub fn simple_command(command_id: u32) -> Vec<u8> {
    command_id.to_le_bytes().to_vec()
}

/// Parse a GET_VERSION response. Only the tag-2 layout is accepted.
pub fn parse_version_response(payload: &[u8]) -> Result<TeeVersion> {
    if payload.len() != VERSION_RSP_LEN {
        return Err(Error::Internal(format!(
            "GET_VERSION response is {} bytes, expected {}",
            payload.len(),
            VERSION_RSP_LEN
        )));
    }
    let mut buf = &payload[RSP_HEADER_LEN..];
    let tag = buf.get_u32_le();
    if tag != VERSION_TAG2 {
        return Err(Error::Internal(format!("Unsupported version tag {}", tag)));
    }

    let raw_id = &buf[..PRODUCT_ID_LEN];
    let end = raw_id.iter().position(|b| *b == 0).unwrap_or(PRODUCT_ID_LEN);
    let product_id = String::from_utf8_lossy(&raw_id[..end]).into_owned();
    buf.advance(PRODUCT_ID_LEN);

    Ok(TeeVersion {
        product_id,
        mci: buf.get_u32_le(),
        so: buf.get_u32_le(),
        mclf: buf.get_u32_le(),
        container: buf.get_u32_le(),
        mc_config: buf.get_u32_le(),
        tl_api: buf.get_u32_le(),
        dr_api: buf.get_u32_le(),
        cmp: buf.get_u32_le(),
    })
}

/// Parse a GET_SUID response.
pub fn parse_suid_response(payload: &[u8]) -> Result<Suid> {
    if payload.len() != SUID_RSP_LEN {
        return Err(Error::Internal(format!(
            "GET_SUID response is {} bytes, expected {}",
            payload.len(),
            SUID_RSP_LEN
        )));
    }
    Suid::from_slice(&payload[RSP_HEADER_LEN..])
}

#[cfg(test)]
pub(crate) fn version_response(version: &TeeVersion) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32_le(CMD_GET_VERSION | RSP_ID_MASK);
    buf.put_u32_le(0);
    buf.put_u32_le(VERSION_TAG2);
    let mut product = [0u8; PRODUCT_ID_LEN];
    let id = version.product_id.as_bytes();
    product[..id.len()].copy_from_slice(id);
    buf.put_slice(&product);
    for value in [
        version.mci,
        version.so,
        version.mclf,
        version.container,
        version.mc_config,
        version.tl_api,
        version.dr_api,
        version.cmp,
    ] {
        buf.put_u32_le(value);
    }
    buf.to_vec()
}

#[cfg(test)]
pub(crate) fn suid_response(suid: &Suid) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32_le(CMD_GET_SUID | RSP_ID_MASK);
    buf.put_u32_le(0);
    buf.put_slice(&suid.0);
    buf.to_vec()
}

#[cfg(test)]
pub(crate) fn decode_requests(mut buf: &[u8]) -> Vec<CmpRequest> {
    let count = buf.get_u32_le();
    (0..count)
        .map(|_| {
            let id = buf.get_u32_le();
            let flags = buf.get_u32_le();
            let len = buf.get_u32_le() as usize;
            let payload = buf[..len].to_vec();
            buf.advance(len);
            CmpRequest {
                id,
                ignore_error: flags & FLAG_IGNORE_ERROR != 0,
                payload,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn encode_responses(batch: &CmpBatchResponse) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32_le(batch.responses.len() as u32);
    buf.put_u32_le(batch.internal_error);
    for response in &batch.responses {
        buf.put_u32_le(response.id);
        buf.put_u32_le(response.status);
        buf.put_u32_le(response.detail);
        buf.put_u32_le(response.payload.len() as u32);
        buf.put_slice(&response.payload);
    }
    buf.to_vec()
}
