use std::sync::Arc;

use anyhow::Context;
use rearch::CapsuleHandle;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};
use url::Url;

use crate::{
    code_gen::generate_unique_code,
    event_log::{EventKind, EventLog, event_log_capsule},
    mapping_store::{MappingStore, mapping_store_capsule},
    model::{ClickTime, ShortCode, ShortCodeValidationError, UrlRecord},
    validation::{is_valid_url, parse_validity_minutes},
};

/// Most rows accepted in one shorten batch.
pub const MAX_BATCH_ROWS: usize = 5;

/// One row of the create form, exactly as the user typed it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortenRequest {
    pub long_url: String,
    #[serde(default)]
    pub minutes: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortenedUrl {
    pub short_code: ShortCode,
    pub long_url: Url,
    pub expiry: OffsetDateTime,
}

#[derive(Debug)]
pub struct Redirect {
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStats {
    pub short_code: ShortCode,
    pub long_url: Url,
    pub created_at: OffsetDateTime,
    pub expiry: OffsetDateTime,
    pub expired: bool,
    pub clicks: u64,
    /// Newest first.
    pub click_history: Vec<ClickTime>,
}

pub fn url_service_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn UrlService> {
    let mappings = Arc::clone(get.as_ref(mapping_store_capsule));
    let events = Arc::clone(get.as_ref(event_log_capsule));
    Arc::new(UrlServiceImpl { mappings, events })
}

pub trait UrlService: Send + Sync {
    fn shorten(&self, request: &ShortenRequest) -> Result<ShortenedUrl, ShortenError>;

    /// Shortens each row independently; the result at index `i` belongs to `requests[i]`.
    fn shorten_batch(
        &self,
        requests: &[ShortenRequest],
    ) -> Result<Vec<Result<ShortenedUrl, ShortenError>>, BatchTooLarge>;

    /// Looks up `code` and, if it is live, counts a click and returns where to go.
    fn resolve(&self, code: &str) -> Result<Redirect, RedirectError>;

    fn stats(&self) -> anyhow::Result<Vec<LinkStats>>;

    /// Returns whether a mapping was removed.
    fn remove(&self, code: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("invalid URL format: {0:?}")]
    InvalidUrl(String),
    #[error("validity must be a positive integer number of minutes, got {0:?}")]
    InvalidValidityValue(String),
    #[error("invalid custom shortcode: {0}")]
    InvalidShortcodeFormat(#[from] ShortCodeValidationError),
    #[error("shortcode {0} already exists")]
    ShortcodeCollision(ShortCode),
    #[error("internal/storage error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("at most {MAX_BATCH_ROWS} URLs can be shortened at a time, got {submitted}")]
pub struct BatchTooLarge {
    pub submitted: usize,
}

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("short link not found")]
    NotFound,
    #[error("short link expired at {expired_at}")]
    Expired { expired_at: OffsetDateTime },
    #[error("internal/storage error: {0}")]
    Internal(anyhow::Error),
}

struct UrlServiceImpl {
    mappings: Arc<dyn MappingStore>,
    events: Arc<dyn EventLog>,
}

impl UrlServiceImpl {
    /// Event log failures are reported but never fail the operation being logged.
    fn record_event(&self, kind: EventKind, message: &str, details: serde_json::Value) {
        if let Err(err) = self.events.log_event(kind, message, details) {
            warn!(?err, event_message = message, "Failed to append to event log");
        }
    }

    fn shorten_row(&self, request: &ShortenRequest) -> Result<ShortenedUrl, ShortenError> {
        let ShortenRequest {
            long_url,
            minutes,
            code,
        } = request;

        if !is_valid_url(long_url) {
            return Err(ShortenError::InvalidUrl(long_url.clone()));
        }
        let long_url = Url::parse(long_url)
            .context("Failed to parse a URL that passed validation")
            .map_err(ShortenError::Internal)?;

        let invalid_validity =
            || ShortenError::InvalidValidityValue(minutes.clone().unwrap_or_default());
        let validity = parse_validity_minutes(minutes.as_deref())
            .and_then(|minutes| i64::try_from(minutes).ok())
            .and_then(|minutes| minutes.checked_mul(60))
            .map(Duration::seconds)
            .ok_or_else(invalid_validity)?;

        let short_code = match code.as_deref().map(str::trim).filter(|code| !code.is_empty()) {
            Some(custom_code) => {
                let custom_code = ShortCode::new(custom_code.to_owned())?;
                if self
                    .mappings
                    .exists(custom_code.as_str())
                    .map_err(ShortenError::Internal)?
                {
                    return Err(ShortenError::ShortcodeCollision(custom_code));
                }
                custom_code
            }
            None => generate_unique_code(self.mappings.as_ref()).map_err(ShortenError::Internal)?,
        };

        let record = UrlRecord::new(long_url, OffsetDateTime::now_utc(), validity)
            .ok_or_else(invalid_validity)?;
        let shortened_url = ShortenedUrl {
            short_code: short_code.clone(),
            long_url: record.long_url.clone(),
            expiry: record.expiry,
        };

        self.mappings
            .save(&short_code, record)
            .map_err(ShortenError::Internal)?;
        Ok(shortened_url)
    }

    fn shorten_and_log(
        &self,
        row: usize,
        request: &ShortenRequest,
    ) -> Result<ShortenedUrl, ShortenError> {
        let result = self.shorten_row(request);
        match &result {
            Ok(ShortenedUrl {
                short_code,
                long_url,
                expiry,
            }) => {
                info!(%short_code, %long_url, "Shortened URL created");
                self.record_event(
                    EventKind::Info,
                    "Shortened URL created",
                    json!({
                        "code": short_code.as_str(),
                        "longUrl": long_url.as_str(),
                        "expiry": unix_millis(*expiry),
                    }),
                );
            }
            Err(err) => {
                info!(row, ?err, "Rejected shorten request");
                let (message, details) = match err {
                    ShortenError::InvalidUrl(long_url) => {
                        ("Invalid URL provided", json!({ "row": row, "longUrl": long_url }))
                    }
                    ShortenError::InvalidValidityValue(minutes) => {
                        ("Invalid validity", json!({ "row": row, "minutes": minutes }))
                    }
                    ShortenError::InvalidShortcodeFormat(_) => (
                        "Invalid shortcode format",
                        json!({ "row": row, "code": request.code.as_deref().map(str::trim) }),
                    ),
                    ShortenError::ShortcodeCollision(code) => {
                        ("Shortcode collision", json!({ "row": row, "code": code.as_str() }))
                    }
                    ShortenError::Internal(err) => (
                        "Failed to shorten URL",
                        json!({ "row": row, "error": err.to_string() }),
                    ),
                };
                self.record_event(EventKind::Error, message, details);
            }
        }
        result
    }
}

impl UrlService for UrlServiceImpl {
    #[instrument(skip(self))]
    fn shorten(&self, request: &ShortenRequest) -> Result<ShortenedUrl, ShortenError> {
        self.shorten_and_log(1, request)
    }

    #[instrument(skip(self))]
    fn shorten_batch(
        &self,
        requests: &[ShortenRequest],
    ) -> Result<Vec<Result<ShortenedUrl, ShortenError>>, BatchTooLarge> {
        if requests.len() > MAX_BATCH_ROWS {
            warn!(submitted = requests.len(), "Rejected oversized batch");
            return Err(BatchTooLarge {
                submitted: requests.len(),
            });
        }

        // NOTE: rows are saved one at a time, so a later row sees codes taken by earlier ones
        Ok(requests
            .iter()
            .enumerate()
            .map(|(idx, request)| self.shorten_and_log(idx + 1, request))
            .collect())
    }

    #[instrument(skip(self))]
    fn resolve(&self, code: &str) -> Result<Redirect, RedirectError> {
        let Some(record) = self.mappings.get(code).map_err(RedirectError::Internal)? else {
            self.record_event(
                EventKind::Error,
                "Redirect failed - not found",
                json!({ "code": code }),
            );
            return Err(RedirectError::NotFound);
        };

        if record.is_expired_at(OffsetDateTime::now_utc()) {
            self.record_event(
                EventKind::Info,
                "Redirect attempted for expired link",
                json!({ "code": code }),
            );
            return Err(RedirectError::Expired {
                expired_at: record.expiry,
            });
        }

        self.mappings
            .increment_click(code)
            .map_err(RedirectError::Internal)?;
        self.record_event(
            EventKind::Info,
            "Redirecting to long URL",
            json!({ "code": code, "longUrl": record.long_url.as_str() }),
        );
        Ok(Redirect {
            url: record.long_url,
        })
    }

    #[instrument(skip(self))]
    fn stats(&self) -> anyhow::Result<Vec<LinkStats>> {
        let now = OffsetDateTime::now_utc();
        let stats = self
            .mappings
            .get_all()
            .context("Failed to load mappings for stats")?
            .into_iter()
            .map(|(short_code, record)| LinkStats {
                expired: record.is_expired_at(now),
                short_code,
                long_url: record.long_url,
                created_at: record.created_at,
                expiry: record.expiry,
                clicks: record.clicks,
                click_history: record.click_history.into_iter().rev().collect(),
            })
            .collect();
        self.record_event(EventKind::Info, "Stats refreshed", json!({}));
        Ok(stats)
    }

    #[instrument(skip(self))]
    fn remove(&self, code: &str) -> anyhow::Result<bool> {
        let removed = self
            .mappings
            .remove(code)
            .with_context(|| format!("Failed to remove {code}"))?;
        if removed {
            self.record_event(EventKind::Action, "Short link removed", json!({ "code": code }));
        }
        Ok(removed)
    }
}

fn unix_millis(time: OffsetDateTime) -> i64 {
    i64::try_from(time.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
