//! TEE (Trusted Execution Environment) integration
//!
//! Runs content management batches on the secure side through a driver
//! session with a trusted application.

mod channel;
pub mod cmp;
mod content;
mod driver;
mod stub;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelOptions, SecureChannel};
pub use cmp::{CmpRequest, CmpResponse};
pub use content::{BatchOutcome, ContentManager, TeeContentManager};
pub use driver::{SessionHandle, SessionTarget, SharedBuffer, TeeDriver, CONTENT_MANAGER_UUID};
pub use stub::UnavailableDriver;
