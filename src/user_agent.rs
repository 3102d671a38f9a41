//! Shared User-Agent string for API and media requests.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/chanfetch";

/// Default User-Agent for every request the engine sends.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("chanfetch/{version} (media-archiver; +{PROJECT_UA_URL})")
}
