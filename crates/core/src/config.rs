//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the stores as an
//! `Arc<CoreConfig>`. Nothing in the core reads environment variables during an operation; the
//! `*_from_env_value` helpers take the raw value so the binary decides where it comes from.

use crate::constants::{
    DEFAULT_PASSWORD_HASH_ITERATIONS, DEFAULT_RECENT_RECORDS_LIMIT, MIN_PASSWORD_HASH_ITERATIONS,
};
use crate::{PortalError, PortalResult};
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    password_hash_iterations: u32,
    recent_records_limit: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::InvalidInput` if `password_hash_iterations` is below
    /// [`MIN_PASSWORD_HASH_ITERATIONS`] or `recent_records_limit` is zero.
    pub fn new(
        data_dir: PathBuf,
        password_hash_iterations: u32,
        recent_records_limit: usize,
    ) -> PortalResult<Self> {
        if password_hash_iterations < MIN_PASSWORD_HASH_ITERATIONS {
            return Err(PortalError::InvalidInput(format!(
                "password_hash_iterations must be at least {}",
                MIN_PASSWORD_HASH_ITERATIONS
            )));
        }

        if recent_records_limit == 0 {
            return Err(PortalError::InvalidInput(
                "recent_records_limit cannot be zero".into(),
            ));
        }

        Ok(Self {
            data_dir,
            password_hash_iterations,
            recent_records_limit,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn password_hash_iterations(&self) -> u32 {
        self.password_hash_iterations
    }

    pub fn recent_records_limit(&self) -> usize {
        self.recent_records_limit
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the PBKDF2 round count from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_PASSWORD_HASH_ITERATIONS`].
pub fn password_hash_iterations_from_env_value(value: Option<String>) -> PortalResult<u32> {
    match non_blank(value) {
        Some(v) => v.parse::<u32>().map_err(|e| {
            PortalError::InvalidInput(format!("invalid password hash iterations '{}': {}", v, e))
        }),
        None => Ok(DEFAULT_PASSWORD_HASH_ITERATIONS),
    }
}

/// Parse the recent-records limit from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_RECENT_RECORDS_LIMIT`].
pub fn recent_records_limit_from_env_value(value: Option<String>) -> PortalResult<usize> {
    match non_blank(value) {
        Some(v) => v.parse::<usize>().map_err(|e| {
            PortalError::InvalidInput(format!("invalid recent records limit '{}': {}", v, e))
        }),
        None => Ok(DEFAULT_RECENT_RECORDS_LIMIT),
    }
}
