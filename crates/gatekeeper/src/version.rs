//! Version information for gatekeeper.

/// Gatekeeper version from Cargo.toml
pub const GATEKEEPER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub gatekeeper: &'static str,
    /// Build identifier injected at deploy time, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            gatekeeper: GATEKEEPER_VERSION,
            build: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build(mut self, build: String) -> Self {
        self.build = Some(build);
        self
    }

    /// Version info with the build id taken from `GATEKEEPER_BUILD`, when set.
    pub fn from_env() -> Self {
        match std::env::var("GATEKEEPER_BUILD") {
            Ok(build) if !build.is_empty() => Self::new().with_build(build),
            _ => Self::new(),
        }
    }
}
