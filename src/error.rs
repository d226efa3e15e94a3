/*!
Registration errors.

Errors fall into four groups: local validation failures that never reach the
network, transport failures, business rejections reported by the platform,
and configuration defects. Every group can be turned into a message suitable
for showing to the person filling in the form via `user_message`.
*/
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::location::{Eligibility, LocationFailure};

pub use reqwest::Error as Http;
pub use serde_json::Error as Json;

/// Shown for any failure the user cannot act on except by retrying.
pub const GENERIC_ERROR_MESSAGE: &str =
    "There was an error contacting the server. Please try again later.";

/// Recovery hint attached when the parent account is not authorized to add dependents.
pub const LOG_OUT_AND_RETRY: &str = "Please log out and log back in, then try again.";

const INELIGIBLE_FOR_JUVENILE: &str =
    "Your card is not eligible to create dependent juvenile cards.";

const UNRECOGNIZED_ADDRESS: &str =
    "The address you entered could not be recognized. Please check it and try again.";

/// Local field validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Please enter a valid ZIP code")]
    InvalidZip,
    #[error("Please enter a valid US state")]
    InvalidRegion,
    #[error("Username must be {min} to {max} letters and numbers")]
    InvalidUsername { min: usize, max: usize },
    #[error("{0}")]
    Password(#[from] PasswordError),
    #[error("Please enter a valid email address")]
    InvalidEmail,
    #[error("You must be at least 13 years old")]
    TooYoung,
    #[error("{0}")]
    Fields(String),
}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<&str> = errors.field_errors().into_keys().collect();
        fields.sort_unstable();
        ValidationError::Fields(format!("Please check: {}", fields.join(", ")))
    }
}

/// Password rule violation. Rules are checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("Password must be {min} to {max} characters long")]
    InvalidCount { min: usize, max: usize },
    #[error("Password may only contain letters, numbers and ~!?@#$%^&*()")]
    InvalidCharacter,
    #[error("Password must not repeat the same character three or more times in a row")]
    RepeatingCharacter,
    #[error("Password must not repeat a pattern of characters, such as 1212 or abcabc")]
    RepeatingPattern,
}

/// Failure while obtaining a client credentials token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No client credentials configured")]
    MissingAuthentication,
    #[error("Token request could not be encoded")]
    JsonEncodingFail,
    #[error("Token endpoint returned no data")]
    NoData,
    #[error("Token endpoint could not be reached")]
    NoHttpResponse,
    #[error("Token endpoint responded with HTTP {0}")]
    UnsuccessfulHttpStatusCode(u16),
    #[error("Token response could not be decoded")]
    JsonDecodingFail,
}

/// Structured error body returned by the patron platform.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlatformError {
    pub status: u16,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Per-field reasons, keyed by field name.
    #[serde(default)]
    pub error: Option<BTreeMap<String, Value>>,
}

impl PlatformError {
    /// Field reasons ordered by field name, falling back to `detail`, `message`, then `title`.
    pub fn user_message(&self) -> Option<String> {
        let fields = self
            .error
            .as_ref()
            .map(|error| {
                error
                    .values()
                    .map(reason_text)
                    .filter(|reason| !reason.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if !fields.is_empty() {
            return Some(fields.join(" "));
        }

        self.detail
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.title.clone())
    }
}

fn reason_text(value: &Value) -> String {
    match value {
        Value::String(reason) => reason.clone(),
        Value::Array(reasons) => reasons
            .iter()
            .map(reason_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "HTTP {}", self.status)?;
        if let Some(ref kind) = self.kind {
            write!(f, " ({})", kind)?;
        }
        if let Some(message) = self.user_message() {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PlatformError {}

/// Remote call failure.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Http(#[from] Http),
    #[error("{0}")]
    Json(#[from] Json),
    #[error("{0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("Url: Path segments is cannot-be-a-base")]
    CannotBeABase,
    #[error("Unexpected server response: {0}")]
    UnexpectedResponse(String),
    #[error("Server responded with HTTP {status}")]
    Server { status: u16 },
    #[error("{0}")]
    Platform(PlatformError),
    #[error("Ineligible for juvenile card creation")]
    IneligibleForJuvenileCardCreation {
        detail: Option<String>,
        recovery: Option<&'static str>,
    },
    #[error("No platform endpoints configured")]
    MissingPlatformConfig,
    #[error("An auth token is required for this request")]
    MissingAuthToken,
    #[error("Request was cancelled")]
    Cancelled,
}

impl From<PlatformError> for ClientError {
    fn from(err: PlatformError) -> Self {
        ClientError::Platform(err)
    }
}

impl ClientError {
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Platform(err) => err
                .user_message()
                .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string()),
            ClientError::IneligibleForJuvenileCardCreation { detail, recovery } => {
                let mut message = detail
                    .clone()
                    .unwrap_or_else(|| INELIGIBLE_FOR_JUVENILE.to_string());
                if let Some(recovery) = recovery {
                    message.push(' ');
                    message.push_str(recovery);
                }
                message
            }
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    /// Recovery hint the UI should surface next to the message, if any.
    pub fn recovery(&self) -> Option<&'static str> {
        match self {
            ClientError::IneligibleForJuvenileCardCreation { recovery, .. } => *recovery,
            _ => None,
        }
    }
}

/// Flow step rejection. The flow stays on the current step.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Attestation is required to continue")]
    AttestationRequired,
    #[error("The terms of use must be accepted to continue")]
    EulaRequired,
    #[error("Location check failed: {0}")]
    Location(LocationFailure),
    #[error("Location is not eligible: {0:?}")]
    LocationIneligible(Eligibility),
    #[error("Operation not available on step {actual}, expected {expected}")]
    InvalidStep {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Choice {0} is out of range")]
    ChoiceOutOfRange(usize),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    UnrecognizedAddress(String),
    #[error("Username is not valid")]
    UsernameInvalid,
    #[error("Username is not available")]
    UsernameUnavailable,
    #[error("{0}")]
    Remote(#[from] ClientError),
    #[error("Registration has already been completed")]
    AlreadyCompleted,
}

impl From<PasswordError> for FlowError {
    fn from(err: PasswordError) -> Self {
        FlowError::Validation(err.into())
    }
}

impl FlowError {
    pub fn user_message(&self) -> String {
        match self {
            FlowError::AttestationRequired => {
                "You must confirm your age or legal guardianship to continue.".to_string()
            }
            FlowError::EulaRequired => {
                "You must accept the terms of use to continue.".to_string()
            }
            FlowError::Location(failure) => failure.user_message().to_string(),
            FlowError::LocationIneligible(_) => {
                "You must be in New York State to sign up for a library card.".to_string()
            }
            FlowError::Validation(err) => err.to_string(),
            FlowError::UnrecognizedAddress(message) if !message.is_empty() => message.clone(),
            FlowError::UnrecognizedAddress(_) => UNRECOGNIZED_ADDRESS.to_string(),
            FlowError::UsernameInvalid => {
                "That username is not valid. Please choose another.".to_string()
            }
            FlowError::UsernameUnavailable => {
                "That username is already taken. Please choose another.".to_string()
            }
            FlowError::Remote(err) => err.user_message(),
            FlowError::InvalidStep { .. }
            | FlowError::ChoiceOutOfRange(_)
            | FlowError::AlreadyCompleted => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Top level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    ValidationError(ValidationError),
    #[error("{0}")]
    ClientError(ClientError),
    #[error("{0}")]
    FlowError(FlowError),
    #[error("{0}")]
    Json(Json),
}

macro_rules! from {
    ($from:ident) => {
        impl From<$from> for Error {
            fn from(e: $from) -> Self {
                Error::$from(e)
            }
        }
    };
}

from!(ValidationError);
from!(ClientError);
from!(FlowError);
from!(Json);
