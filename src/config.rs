use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::ClientError;

/// Platform API version of the password based registration endpoints.
pub const DEFAULT_VERSION: &str = "v0.3";

/// Per request timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Registration service settings.
///
/// Loaded once per application and shared by every registration session.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Root of the card creator service, e.g. `https://patrons.example.org/api`.
    pub base_url: Url,
    /// Version path segment placed between the base url and each endpoint.
    #[serde(default = "default_version")]
    pub version: String,
    /// Basic auth credentials attached to every service request.
    #[serde(default)]
    pub credentials: Option<BasicCredentials>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Client credentials and endpoints of the patron platform. Required for
    /// juvenile registration and for token authenticated requests.
    #[serde(default)]
    pub platform: Option<PlatformConfig>,
    /// Barcode of the logged in parent. Its presence selects juvenile registration.
    #[serde(default)]
    pub parent_barcode: Option<String>,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    /// Token endpoint for the client credentials grant.
    pub oauth_token_url: Url,
    pub client_id: String,
    pub client_secret: String,
    /// Root of the platform API, e.g. `https://platform.example.org/api/v0.1`.
    pub base_url: Url,
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("oauth_token_url", &self.oauth_token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    pub fn new(base_url: Url) -> Self {
        Config {
            base_url,
            version: default_version(),
            credentials: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            platform: None,
            parent_barcode: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_juvenile(&self) -> bool {
        self.parent_barcode.is_some()
    }

    pub fn address_validation_url(&self) -> Result<Url, ClientError> {
        self.endpoint(&["validations", "address"])
    }

    pub fn username_validation_url(&self) -> Result<Url, ClientError> {
        self.endpoint(&["validations", "username"])
    }

    pub fn create_patron_url(&self) -> Result<Url, ClientError> {
        self.endpoint(&["create_patron"])
    }

    fn endpoint(&self, path: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::CannotBeABase)?
            .pop_if_empty()
            .push(&self.version)
            .extend(path);
        Ok(url)
    }
}

impl PlatformConfig {
    pub fn dependent_eligibility_url(&self, parent_barcode: &str) -> Result<Url, ClientError> {
        let mut url = self.endpoint(&["patrons", "dependent-eligibility"])?;
        url.query_pairs_mut().append_pair("barcode", parent_barcode);
        Ok(url)
    }

    pub fn dependents_url(&self) -> Result<Url, ClientError> {
        self.endpoint(&["patrons", "dependents"])
    }

    fn endpoint(&self, path: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::CannotBeABase)?
            .pop_if_empty()
            .extend(path);
        Ok(url)
    }
}
