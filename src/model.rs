use std::{borrow::Borrow, collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use url::Url;

/// The persisted mapping table, keyed by short code.
pub type Mappings = BTreeMap<ShortCode, UrlRecord>;

/// A validated short code: 3 to 15 ASCII alphanumeric characters.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShortCode(String);

pub const SHORT_CODE_MIN_LEN: usize = 3;
pub const SHORT_CODE_MAX_LEN: usize = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code must be at least {SHORT_CODE_MIN_LEN} characters, got {len}")]
    TooShort { len: usize },
    #[error("short code must be at most {SHORT_CODE_MAX_LEN} characters, got {len}")]
    TooLong { len: usize },
    #[error("short code must be alphanumeric, found {invalid_chars:?}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortCode {
    /// # Errors
    /// Will return [`Err`] if `code` is not 3 to 15 ASCII alphanumeric characters.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        Self::validate(&code)?;
        Ok(Self(code))
    }

    /// # Errors
    /// Will return [`Err`] describing why `code` is not a valid short code.
    pub fn validate(code: &str) -> Result<(), ShortCodeValidationError> {
        let invalid_chars: String = code
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric())
            .collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }

        // all characters are ASCII at this point, so bytes == chars
        match code.len() {
            len if len < SHORT_CODE_MIN_LEN => Err(ShortCodeValidationError::TooShort { len }),
            len if len > SHORT_CODE_MAX_LEN => Err(ShortCodeValidationError::TooLong { len }),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ShortCode {
    type Error = ShortCodeValidationError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Self::new(code)
    }
}

impl From<ShortCode> for String {
    fn from(code: ShortCode) -> Self {
        code.0
    }
}

impl Borrow<str> for ShortCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single redirect traversal, persisted as an RFC 3339 string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClickTime(#[serde(with = "time::serde::rfc3339")] pub OffsetDateTime);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRecord {
    /// Kept in the URL parser's normalized form: a bare host gains a trailing `/`
    /// and the scheme and host are lowercased.
    pub long_url: Url,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Persisted as milliseconds since the Unix epoch.
    #[serde(with = "epoch_millis")]
    pub expiry: OffsetDateTime,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default)]
    pub click_history: Vec<ClickTime>,
}

impl UrlRecord {
    /// A fresh record with no clicks that expires `validity` after `created_at`.
    ///
    /// Returns [`None`] when the expiry is not representable.
    #[must_use]
    pub fn new(long_url: Url, created_at: OffsetDateTime, validity: Duration) -> Option<Self> {
        let expiry = created_at.checked_add(validity)?;
        Some(Self {
            long_url,
            created_at,
            expiry: truncate_to_millis(expiry),
            clicks: 0,
            click_history: Vec::new(),
        })
    }

    /// Expiry is inclusive: a record is still live at exactly its expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expiry
    }

    pub fn record_click(&mut self, at: OffsetDateTime) {
        self.clicks = self.clicks.saturating_add(1);
        self.click_history.push(ClickTime(at));
    }
}

/// Drops sub-millisecond precision, matching what [`epoch_millis`] can persist.
#[must_use]
pub fn truncate_to_millis(time: OffsetDateTime) -> OffsetDateTime {
    time - Duration::nanoseconds(i64::from(time.nanosecond() % 1_000_000))
}

mod epoch_millis {
    use serde::{Deserialize, Deserializer, Serializer, de, ser};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(
        time: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let millis = i64::try_from(time.unix_timestamp_nanos() / 1_000_000)
            .map_err(|_| <S::Error as ser::Error>::custom("timestamp out of range"))?;
        serializer.serialize_i64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .map_err(<D::Error as de::Error>::custom)
    }
}
