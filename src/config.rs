use std::{
    env::{self, VarError},
    path::PathBuf,
};

use rearch::{CapsuleHandle, Container};
use tracing::{info, instrument, warn};

#[must_use]
#[instrument]
pub fn init_container() -> Container {
    info!("Initializing container");
    let container = Container::new();

    let data_dir = container.read(data_dir_capsule);
    info!(data_dir = %data_dir.display(), "Using data directory");

    info!("Container initialized");
    container
}

/// Directory holding the persisted `urlMappings` and `logs` blobs.
///
/// # Panics
/// Panics when environment variable is invalid.
#[must_use]
pub fn data_dir_capsule(_: CapsuleHandle) -> PathBuf {
    env_var_or_default("DATA_DIR", ".pocket-short").into()
}

/// Origin that short links are printed under, as `<BASE_URL>/short/<code>`.
///
/// # Panics
/// Panics when environment variable is invalid.
#[must_use]
pub fn base_url_capsule(_: CapsuleHandle) -> String {
    env_var_or_default("BASE_URL", "http://localhost:3000")
        .trim_end_matches('/')
        .to_owned()
}

fn env_var_or_default(env_var_name: &str, default: &str) -> String {
    match env::var(env_var_name) {
        Ok(value) => {
            info!(value, "{env_var_name} environment variable set");
            value
        }
        Err(VarError::NotPresent) => {
            warn!(
                value = default,
                "{env_var_name} environment variable not set; defaulting to {default}"
            );
            default.to_owned()
        }
        Err(VarError::NotUnicode(actual)) => {
            panic!(
                "{env_var_name} environment variable is invalid: {}",
                actual.display()
            );
        }
    }
}
