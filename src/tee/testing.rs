//! Scripted driver for unit tests.

use super::cmp::{self, CmpBatchResponse, CmpRequest, CmpResponse};
use super::driver::{SessionHandle, SessionTarget, SharedBuffer, TeeDriver};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailAt {
    Nothing,
    OpenDevice,
    Allocate,
    OpenSession,
    Notify,
    Hang,
}

type Responder = Box<dyn Fn(&[CmpRequest]) -> CmpBatchResponse + Send + Sync>;

#[derive(Default)]
struct DriverState {
    device_open: bool,
    buffers: usize,
    sessions: usize,
    targets: Vec<SessionTarget>,
    batches: Vec<Vec<CmpRequest>>,
}

pub(crate) struct ScriptedDriver {
    fail_at: FailAt,
    responder: Responder,
    state: Mutex<DriverState>,
}

impl ScriptedDriver {
    pub fn with_responder(
        responder: impl Fn(&[CmpRequest]) -> CmpBatchResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            fail_at: FailAt::Nothing,
            responder: Box::new(responder),
            state: Mutex::new(DriverState::default()),
        }
    }

    /// Answers every request with its own payload.
    pub fn echo() -> Self {
        Self::with_responder(|requests| CmpBatchResponse {
            responses: requests
                .iter()
                .map(|r| CmpResponse {
                    id: r.id,
                    status: 0,
                    detail: 0,
                    payload: r.payload.clone(),
                })
                .collect(),
            internal_error: 0,
        })
    }

    pub fn failing(fail_at: FailAt) -> Self {
        Self {
            fail_at,
            ..Self::echo()
        }
    }

    pub fn is_released(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.device_open && state.buffers == 0 && state.sessions == 0
    }

    pub fn batches(&self) -> Vec<Vec<CmpRequest>> {
        self.state.lock().unwrap().batches.clone()
    }

    pub fn targets(&self) -> Vec<SessionTarget> {
        self.state.lock().unwrap().targets.clone()
    }

    fn check(&self, stage: FailAt) -> Result<()> {
        if self.fail_at == stage {
            return Err(Error::Internal(format!("scripted failure at {:?}", stage)));
        }
        Ok(())
    }
}

#[async_trait]
impl TeeDriver for ScriptedDriver {
    fn open_device(&self) -> Result<()> {
        self.check(FailAt::OpenDevice)?;
        self.state.lock().unwrap().device_open = true;
        Ok(())
    }

    fn close_device(&self) -> Result<()> {
        self.state.lock().unwrap().device_open = false;
        Ok(())
    }

    fn allocate_buffer(&self, len: usize) -> Result<SharedBuffer> {
        self.check(FailAt::Allocate)?;
        self.state.lock().unwrap().buffers += 1;
        Ok(SharedBuffer::new(len))
    }

    fn free_buffer(&self, _buffer: SharedBuffer) {
        self.state.lock().unwrap().buffers -= 1;
    }

    fn open_session(&self, target: &SessionTarget, _buffer: &SharedBuffer) -> Result<SessionHandle> {
        self.check(FailAt::OpenSession)?;
        let mut state = self.state.lock().unwrap();
        state.sessions += 1;
        state.targets.push(target.clone());
        Ok(SessionHandle(state.sessions as u32))
    }

    fn close_session(&self, _session: SessionHandle) -> Result<()> {
        self.state.lock().unwrap().sessions -= 1;
        Ok(())
    }

    async fn notify(&self, _session: SessionHandle, buffer: &SharedBuffer) -> Result<()> {
        self.check(FailAt::Notify)?;
        let requests = cmp::decode_requests(buffer.as_slice());
        self.state.lock().unwrap().batches.push(requests);
        Ok(())
    }

    async fn wait_notification(&self, _session: SessionHandle, buffer: &mut SharedBuffer) -> Result<()> {
        if self.fail_at == FailAt::Hang {
            std::future::pending::<()>().await;
        }
        let requests = self
            .state
            .lock()
            .unwrap()
            .batches
            .last()
            .cloned()
            .unwrap_or_default();
        let encoded = cmp::encode_responses(&(self.responder)(&requests));
        buffer.as_mut_slice()[..encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }
}
