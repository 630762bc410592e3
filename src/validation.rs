use url::Url;

use crate::model::ShortCode;

/// Validity applied when the user leaves the minutes field empty.
pub const DEFAULT_VALIDITY_MINUTES: u64 = 30;

/// Whether `value` is an absolute `http` or `https` URL.
#[must_use]
pub fn is_valid_url(value: &str) -> bool {
    Url::parse(value).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

#[must_use]
pub fn is_valid_shortcode(code: &str) -> bool {
    ShortCode::validate(code).is_ok()
}

/// Parses the validity field of a shorten request.
///
/// An absent or empty value means [`DEFAULT_VALIDITY_MINUTES`].
/// Anything else must be a positive integer (surrounding whitespace is ignored),
/// otherwise [`None`] is returned.
#[must_use]
pub fn parse_validity_minutes(value: Option<&str>) -> Option<u64> {
    match value {
        None | Some("") => Some(DEFAULT_VALIDITY_MINUTES),
        Some(value) => value.trim().parse::<u64>().ok().filter(|&minutes| minutes > 0),
    }
}
