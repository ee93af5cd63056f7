//! gatekeeper: bounded-concurrency admission control with overload-driven
//! load shedding.

pub mod config;
pub mod gate;
pub mod permit;
pub mod service;
pub mod transport;
mod version;

pub use config::{ArgsError, Config};
pub use gate::{GateDecision, OverloadGate, Sampler, ThreadRngSampler};
pub use permit::{
    AcquireError, AdmissionGuard, AdmissionManager, ConfigError, ManagerStats, Token, TokenId,
};
pub use service::{AdmissionService, AdmitError, HealthSnapshot, HealthStatus};
pub use version::{GATEKEEPER_VERSION, VersionInfo};
