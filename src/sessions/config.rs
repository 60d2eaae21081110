//! Operator-level runtime configuration.
//!
//! These are the settings the surrounding application feeds the session at
//! startup: the STUN URL used during the manual signaling ceremony, the
//! diagnostic log filter, and the fallback asset paths used when the
//! operator has not picked files. None of them affect simulation; they are
//! carried here so the whole configuration surface lives in one place.
//!
//! # Forward Compatibility
//!
//! New fields may be added to these structs. Construct them with struct
//! update syntax so your code keeps compiling:
//!
//! ```
//! use ringside::RuntimeConfig;
//!
//! let config = RuntimeConfig {
//!     log_filter: Some("ringside=debug".to_owned()),
//!     ..RuntimeConfig::default()
//! };
//! ```

/// Default STUN server for session establishment.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Fallback asset paths for the "no file selected" case.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DefaultAssetPaths {
    /// Default mesh bundle path.
    pub mesh: Option<String>,
    /// Default sprite sheet path.
    pub sprite: Option<String>,
    /// Default sprite atlas path.
    pub atlas: Option<String>,
}

/// Runtime configuration consumed by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// STUN URL handed to the connection layer during signaling.
    pub stun_url: String,
    /// Log level / namespace filter, e.g. `"ringside=debug"`. Diagnostics
    /// only; `None` leaves the subscriber's default in place.
    pub log_filter: Option<String>,
    /// Fallback asset paths.
    pub default_assets: DefaultAssetPaths,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stun_url: DEFAULT_STUN_URL.to_owned(),
            log_filter: None,
            default_assets: DefaultAssetPaths::default(),
        }
    }
}

// #########
// # TESTS #
// #########
