//! Admission tokens and the arbiter that hands them out.
//!
//! - [`AdmissionManager`]: handle to the single task that owns admission state
//! - [`Token`]: one granted unit of admission
//! - [`AdmissionGuard`]: a token tied to its issuing manager, released exactly once

mod guard;
mod manager;
mod token;

pub use guard::AdmissionGuard;
pub use manager::{AcquireError, AdmissionManager, ConfigError, ManagerStats};
pub use token::{Token, TokenId};
