use std::time::Duration;

/// Errors raised while producing a signed bearer token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to decode private key from PEM envelope: {0}")]
    KeyDecode(String),

    #[error("private key is not a P-256 elliptic-curve key: {0}")]
    UnsupportedKey(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Errors returned by the report pipeline.
///
/// "No data for this period" is deliberately not represented here: the
/// transport and service report it as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// The request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Request(String),

    /// The caller's deadline expired before the fetch completed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The API answered with a structured error envelope.
    #[error("API error ({status}): {code} - {detail}")]
    Api {
        status: u16,
        code: String,
        detail: String,
    },

    /// The API answered with an error status and no recognisable body.
    #[error("API request failed with status: {0}")]
    Http(String),

    #[error("unexpected response format: {0}")]
    UnexpectedFormat(String),

    #[error("failed to decompress report: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("failed to parse report: {0}")]
    Parse(String),

    #[error("cannot combine {left} and {right} amounts")]
    CurrencyMismatch { left: String, right: String },

    #[error("invalid {field}: {value}")]
    InvalidOption { field: &'static str, value: String },
}

impl Error {
    /// Reports whether this error came from the token manager.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
