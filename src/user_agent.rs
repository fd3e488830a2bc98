//! Shared User-Agent string for carrier and webhook HTTP clients.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/podfetch/podfetch";

/// Default User-Agent for outbound requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("podfetch/{version} (pod-acquisition; +{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_version_and_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL));
        assert_eq!(
            ua.strip_prefix("podfetch/")
                .and_then(|s| s.split(' ').next()),
            Some(env!("CARGO_PKG_VERSION"))
        );
    }
}
