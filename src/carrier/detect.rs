//! Carrier detection from tracking number formats.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Two-letter prefix used by postal (UPU S10-style) tracking numbers.
#[allow(clippy::expect_used)]
static TWO_LETTER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}").expect("prefix regex is valid"));

/// Guesses the carrier from a tracking number's shape.
///
/// Rules are checked in order; the first match wins:
///
/// | Format | Carrier |
/// |--------|---------|
/// | starts with `FR`, or 13 chars starting with two letters | colissimo |
/// | starts with `CH` or `XP` | chronopost |
/// | `1Z` + 16 chars | ups |
/// | 12 or 15 digits | fedex |
/// | 10 digits | dhl |
///
/// # Examples
///
/// ```
/// use podfetch_core::carrier::detect_carrier_from_tracking;
///
/// assert_eq!(detect_carrier_from_tracking("1Z999AA10123456784"), Some("ups"));
/// assert_eq!(detect_carrier_from_tracking("unknown"), None);
/// ```
#[must_use]
pub fn detect_carrier_from_tracking(tracking_number: &str) -> Option<&'static str> {
    let tracking = tracking_number.trim().to_ascii_uppercase();
    let all_digits = !tracking.is_empty() && tracking.bytes().all(|b| b.is_ascii_digit());
    let two_letters = TWO_LETTER_PREFIX.is_match(&tracking);

    let carrier = if tracking.starts_with("FR") || (tracking.len() == 13 && two_letters) {
        Some("colissimo")
    } else if tracking.starts_with("CH") || tracking.starts_with("XP") {
        Some("chronopost")
    } else if tracking.starts_with("1Z") && tracking.len() == 18 {
        Some("ups")
    } else if all_digits && matches!(tracking.len(), 12 | 15) {
        Some("fedex")
    } else if all_digits && tracking.len() == 10 {
        Some("dhl")
    } else {
        None
    };

    if carrier.is_none() {
        debug!(tracking = %tracking_number, "could not detect carrier");
    }
    carrier
}
