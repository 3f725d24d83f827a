//! Provisioning engine: link construction and the session loop

mod links;
mod session;

pub use links::{validate_base_url, LinkBuilder, MAX_BASE_URL_LEN};
pub use session::{ProvisioningSession, SessionContext, SessionKind, SessionRequest};
