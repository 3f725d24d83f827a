//! trustprov - TEE Content Management Provisioning Agent
//!
//! trustprov runs the device side of a provisioning conversation with a
//! remote enrollment server. The server sends batches of content
//! management commands as XML; the agent executes them on the TEE's
//! content manager or stores uploaded objects in the container registry,
//! and posts the results back until the server has nothing left to ask.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      ProvisioningAgent                            │
//! │   provision / install_trustlet / unregister_root_container        │
//! │   container queries, direct CMP execution, server address         │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ one background session at a time
//! ┌───────────────────────────────▼──────────────────────────────────┐
//! │                     ProvisioningSession                           │
//! │   relation state machine: system_info, command_result, next,     │
//! │   self, initial_post, initial_delete                             │
//! └───────┬────────────────────────┬─────────────────────────┬───────┘
//!         │                        │                         │
//! ┌───────▼────────┐      ┌────────▼─────────┐      ┌────────▼───────┐
//! │   Transport     │      │    Dispatcher     │      │  Device info   │
//! │  HTTP + JSON    │      │  codec (XML) ◄──► │      │  OS + TEE      │
//! │  envelopes      │      │  batching, order  │      │  version       │
//! └────────────────┘      └───┬───────────┬───┘      └────────────────┘
//!                             │           │
//!                   ┌─────────▼──┐   ┌────▼─────────┐
//!                   │ TEE channel │   │   Registry    │
//!                   │ CMP batches │   │  containers   │
//!                   └────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`provisioner`]: Public agent API
//! - [`engine`]: Session state machine and link construction
//! - [`dispatch`]: Command batching and result collection
//! - [`codec`]: XML command and result documents
//! - [`transport`]: Server connection
//! - [`tee`]: Secure channel and content manager
//! - [`registry`]: Container registry
//! - [`device`]: Device identity and platform information
//! - [`config`]: Configuration management

pub mod codec;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod provisioner;
pub mod registry;
pub mod tee;
pub mod transport;

pub use config::ProvisionerConfig;
pub use error::{Error, ErrorKind, Result};
pub use protocol::{ProvisioningState, StateCallback};
pub use provisioner::{ProvisioningAgent, ProvisioningAgentBuilder, SpContainerStructure};
