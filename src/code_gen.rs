use std::iter;

use anyhow::Context;
use tracing::{instrument, warn};

use crate::{mapping_store::MappingStore, model::ShortCode};

/// Length of a freshly generated short code.
pub const CODE_LENGTH: usize = 6;
/// How many [`CODE_LENGTH`] candidates are tried against the store before falling back.
pub const MAX_ATTEMPTS: usize = 8;
/// Length of the fallback code, which is not checked for collisions.
pub const FALLBACK_CODE_LENGTH: usize = 8;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a short code that is not yet present in `store`.
///
/// After [`MAX_ATTEMPTS`] collisions a [`FALLBACK_CODE_LENGTH`] code is returned unchecked.
///
/// # Errors
/// Will return [`Err`] if the store cannot be queried.
#[instrument(skip(store))]
pub fn generate_unique_code(store: &dyn MappingStore) -> anyhow::Result<ShortCode> {
    for _ in 0..MAX_ATTEMPTS {
        let candidate = random_code(CODE_LENGTH)?;
        if !store
            .exists(candidate.as_str())
            .context("Failed to check generated code for collisions")?
        {
            return Ok(candidate);
        }
        warn!(%candidate, "Generated code that was already taken");
    }

    warn!("Exhausted collision checks; falling back to a longer code");
    random_code(FALLBACK_CODE_LENGTH)
}

fn random_code(len: usize) -> anyhow::Result<ShortCode> {
    ShortCode::new(random_alphanumeric(len)).context("Generated an invalid short code")
}

fn random_alphanumeric(len: usize) -> String {
    iter::repeat_with(|| char::from(ALPHABET[rand::random_range(0..ALPHABET.len())]))
        .take(len)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::mapping_store::MockMappingStore;

    fn is_alphanumeric_of_len(code: &ShortCode, len: usize) -> bool {
        code.as_str().len() == len && code.as_str().chars().all(|c| c.is_ascii_alphanumeric())
    }

    #[test]
    fn test_generate_unique_code_first_attempt() {
        let mut mock_store = MockMappingStore::new();
        mock_store.expect_exists().once().returning(|_| Ok(false));

        let code = generate_unique_code(&mock_store).unwrap();
        assert!(is_alphanumeric_of_len(&code, CODE_LENGTH));
    }

    #[test]
    fn test_generate_unique_code_retries_on_collision() {
        let mut mock_store = MockMappingStore::new();
        let mut calls = 0;
        mock_store.expect_exists().times(3).returning(move |_| {
            calls += 1;
            Ok(calls < 3)
        });

        let code = generate_unique_code(&mock_store).unwrap();
        assert!(is_alphanumeric_of_len(&code, CODE_LENGTH));
    }

    #[test]
    fn test_generate_unique_code_falls_back_after_max_attempts() {
        let mut mock_store = MockMappingStore::new();
        mock_store
            .expect_exists()
            .times(MAX_ATTEMPTS)
            .returning(|_| Ok(true));

        let code = generate_unique_code(&mock_store).unwrap();
        assert!(is_alphanumeric_of_len(&code, FALLBACK_CODE_LENGTH));
    }

    #[test]
    fn test_generate_unique_code_store_error() {
        let mut mock_store = MockMappingStore::new();
        mock_store
            .expect_exists()
            .once()
            .returning(|_| Err(anyhow::anyhow!("test failure")));

        assert!(generate_unique_code(&mock_store).is_err());
    }

    #[test]
    fn test_random_alphanumeric_spreads_over_alphabet() {
        let seen: HashSet<char> = (0..200)
            .flat_map(|_| random_alphanumeric(CODE_LENGTH).chars().collect::<Vec<_>>())
            .collect();
        assert!(seen.iter().all(char::is_ascii_alphanumeric));
        // 1200 uniform draws from 62 symbols miss one only with negligible probability
        assert!(seen.len() > 50);
    }
}
