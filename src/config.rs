//! Settings for the command-line client.
//!
//! Settings come from an optional JSON file and are overridden field by
//! field by command-line flags and environment variables.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    auth::{Credentials, TokenManager},
    cache::DEFAULT_TTL,
    service::{ServiceConfig, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT},
    transport::DEFAULT_BASE_URL,
};

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub key_id: Option<String>,
    pub issuer_id: Option<String>,
    /// Inline PKCS#8 private key. Takes precedence over `private_key_path`.
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub vendor_number: Option<String>,
    pub base_url: Option<String>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub timeout: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub cache_ttl: Option<Duration>,
    pub concurrency: Option<usize>,
    pub log_level: Option<String>,
}

impl Settings {
    /// Reads settings from the JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid settings
    /// JSON.
    pub fn read_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Returns these settings with every field set in `overrides` replaced.
    #[must_use]
    pub fn merge(self, overrides: Settings) -> Self {
        Settings {
            key_id: overrides.key_id.or(self.key_id),
            issuer_id: overrides.issuer_id.or(self.issuer_id),
            private_key: overrides.private_key.or(self.private_key),
            private_key_path: overrides.private_key_path.or(self.private_key_path),
            vendor_number: overrides.vendor_number.or(self.vendor_number),
            base_url: overrides.base_url.or(self.base_url),
            timeout: overrides.timeout.or(self.timeout),
            cache_ttl: overrides.cache_ttl.or(self.cache_ttl),
            concurrency: overrides.concurrency.or(self.concurrency),
            log_level: overrides.log_level.or(self.log_level),
        }
    }

    /// Assembles API credentials, reading the private key file if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key id, issuer id or private key is missing,
    /// or the key file cannot be read.
    pub fn credentials(&self) -> Result<Credentials> {
        let Some(key_id) = self.key_id.clone() else {
            bail!("missing key id (set APPSTORE_KEY_ID or --key-id)");
        };
        let Some(issuer_id) = self.issuer_id.clone() else {
            bail!("missing issuer id (set APPSTORE_ISSUER_ID or --issuer-id)");
        };
        let private_key = match (&self.private_key, &self.private_key_path) {
            (Some(key), _) => key.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("reading private key {}", path.display()))?,
            (None, None) => bail!(
                "missing private key (set APPSTORE_PRIVATE_KEY or APPSTORE_PRIVATE_KEY_PATH)"
            ),
        };
        Ok(Credentials {
            key_id,
            issuer_id,
            private_key,
        })
    }

    /// # Errors
    ///
    /// Returns an error if no vendor number is configured.
    pub fn vendor_number(&self) -> Result<&str> {
        self.vendor_number
            .as_deref()
            .context("missing vendor number (set APPSTORE_VENDOR_NUMBER or --vendor)")
    }

    /// Checks that everything a report needs is configured and that the
    /// private key signs tokens, without calling the API.
    ///
    /// # Errors
    ///
    /// Returns the first missing setting, or the key error.
    pub fn validate(&self) -> Result<Credentials> {
        let credentials = self.credentials()?;
        self.vendor_number()?;
        TokenManager::new(credentials.clone())
            .get_token()
            .context("checking private key")?;
        Ok(credentials)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            cache_ttl: self.cache_ttl.unwrap_or(DEFAULT_TTL),
            concurrency: self.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
        }
    }
}
