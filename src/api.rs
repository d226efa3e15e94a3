use async_trait::async_trait;

use crate::{
    error::ClientError, Address, AuthToken, Credentials, JuvenileCreationInfo,
    PatronCreationInfo, ValidateAddressResponse, ValidateUsernameResponse,
};

/// Remote operations the registration flow depends on.
///
/// [`Client`](crate::Client) talks to the real services.
#[async_trait]
pub trait RegistrationApi: Send + Sync {
    /// Whether client credentials are configured, so that [`authenticate`](Self::authenticate)
    /// can succeed.
    fn has_client_credentials(&self) -> bool;

    async fn authenticate(&self) -> Result<AuthToken, ClientError>;

    async fn validate_address(
        &self,
        token: Option<&AuthToken>,
        address: &Address,
        is_work_or_school: bool,
    ) -> Result<ValidateAddressResponse, ClientError>;

    async fn validate_username(
        &self,
        token: Option<&AuthToken>,
        username: &str,
    ) -> Result<ValidateUsernameResponse, ClientError>;

    async fn create_patron(
        &self,
        token: Option<&AuthToken>,
        info: &PatronCreationInfo,
    ) -> Result<Credentials, ClientError>;

    async fn check_juvenile_eligibility(
        &self,
        token: &AuthToken,
        parent_barcode: &str,
    ) -> Result<(), ClientError>;

    async fn create_juvenile(
        &self,
        token: &AuthToken,
        info: &JuvenileCreationInfo,
    ) -> Result<Credentials, ClientError>;

    /// Aborts in-flight requests. Later calls fail with [`ClientError::Cancelled`].
    fn invalidate(&self);
}
