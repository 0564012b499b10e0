//! Error taxonomy for the Comfort Cloud client.
//!
//! - `Configuration`: bad or missing setup (credentials, device id); never
//!   retried, requires user action.
//! - `Authentication`: login or token exchange failure.
//! - `Communication`: transport or envelope-level failure; retried by the
//!   poller with backoff.
//! - `AppVersionOutdated`: vendor error code 4106; retrying cannot succeed
//!   until the configured app version is bumped.

/// Vendor error code signalling that the configured mobile-app version string
/// is no longer accepted by the service.
pub const ERROR_CODE_UPDATE_VERSION: i64 = 4106;

#[derive(Debug)]
pub enum ApiError {
    Configuration(String),
    Authentication(String),
    Communication(String),
    AppVersionOutdated { configured_version: String },
}

impl core::fmt::Display for ApiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ApiError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            ApiError::Authentication(msg) => write!(f, "authentication error: {}", msg),
            ApiError::Communication(msg) => write!(f, "communication error: {}", msg),
            ApiError::AppVersionOutdated { configured_version } => write!(
                f,
                "New app version published - check the version number of your mobile app \
                 and update the appVersion setting (currently using {})",
                configured_version
            ),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Map a vendor error envelope to the matching error kind. Code 4106 is
    /// reserved for the stale-app-version condition.
    pub fn from_envelope(code: i64, message: &str, http_status: u16, app_version: &str) -> ApiError {
        if code == ERROR_CODE_UPDATE_VERSION {
            ApiError::AppVersionOutdated {
                configured_version: app_version.to_string(),
            }
        } else {
            ApiError::Communication(format!(
                "request failed: http status {}, code {}, message {}",
                http_status, code, message
            ))
        }
    }
}
