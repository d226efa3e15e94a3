use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{multipart::Form, Method, Request, RequestBuilder, StatusCode};
use serde::Serialize;
use std::convert::TryFrom;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AuthError, ClientError, PlatformError, LOG_OUT_AND_RETRY};
use crate::response::{
    AddressValidationBody, DependentCreatedBody, PatronCreatedBody, UsernameValidationBody,
};
use crate::{
    Address, AuthToken, Config, Credentials, JuvenileCreationInfo, PatronCreationInfo,
    RegistrationApi, ValidateAddressResponse, ValidateUsernameResponse,
};

/// Card creator and patron platform client.
///
/// One client belongs to one registration session. Dropping the session
/// should [`invalidate`](Client::invalidate) it so pending requests stop.
#[derive(Debug, Clone)]
pub struct Client {
    pub config: Config,

    pub http_client: reqwest::Client,

    cancel: CancellationToken,
}

#[derive(Serialize)]
struct AddressValidationRequest<'a> {
    address: &'a Address,
    #[serde(skip_serializing_if = "is_false")]
    is_work_or_school_address: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Serialize)]
struct UsernameValidationRequest<'a> {
    username: &'a str,
}

impl Client {
    /// Creates a client with the configured request timeout.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self::with_http_client(config, http_client))
    }

    pub fn with_http_client(config: Config, http_client: reqwest::Client) -> Self {
        Client {
            config,
            http_client,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancels every pending and future request made through this client.
    pub fn invalidate(&self) {
        debug!("invalidating registration client");
        self.cancel.cancel();
    }

    pub fn is_invalidated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Obtains a token with the client credentials grant.
    pub async fn authenticate(&self) -> Result<AuthToken, ClientError> {
        let platform = self
            .config
            .platform
            .as_ref()
            .ok_or(AuthError::MissingAuthentication)?;

        let form = Form::new()
            .text("client_id", platform.client_id.clone())
            .text("client_secret", platform.client_secret.clone())
            .text("grant_type", "client_credentials");

        let request = self
            .http_client
            .post(platform.oauth_token_url.clone())
            .header(ACCEPT, mime::APPLICATION_JSON.essence_str())
            .multipart(form)
            .build()
            .map_err(|err| {
                warn!(error = %err, "token request could not be built");
                AuthError::JsonEncodingFail
            })?;

        debug!(url = %platform.oauth_token_url, "requesting client credentials token");
        let (status, body) = match self.send(request).await {
            Ok(exchange) => exchange,
            Err(ClientError::Http(err)) => {
                warn!(error = %err, "token request failed");
                return Err(AuthError::NoHttpResponse.into());
            }
            Err(err) => return Err(err),
        };

        if !status.is_success() {
            return Err(AuthError::UnsuccessfulHttpStatusCode(status.as_u16()).into());
        }
        if body.is_empty() {
            return Err(AuthError::NoData.into());
        }
        let token: AuthToken =
            serde_json::from_slice(&body).map_err(|_| AuthError::JsonDecodingFail)?;
        Ok(token)
    }

    /// Asks the service to verify and normalize an address.
    ///
    /// Both 200 and 400 responses carry a validation result.
    pub async fn validate_address(
        &self,
        token: Option<&AuthToken>,
        address: &Address,
        is_work_or_school: bool,
    ) -> Result<ValidateAddressResponse, ClientError> {
        let url = self.config.address_validation_url()?;
        let request = self
            .service_request(Method::POST, url, token)
            .json(&AddressValidationRequest {
                address,
                is_work_or_school_address: is_work_or_school,
            });

        let (status, body) = self.execute(request).await?;
        debug!(status = %status, "address validation response");
        match status {
            StatusCode::OK | StatusCode::BAD_REQUEST => {
                let body: AddressValidationBody = serde_json::from_slice(&body)?;
                ValidateAddressResponse::try_from(body)
            }
            status => Err(ClientError::Server {
                status: status.as_u16(),
            }),
        }
    }

    pub async fn validate_username(
        &self,
        token: Option<&AuthToken>,
        username: &str,
    ) -> Result<ValidateUsernameResponse, ClientError> {
        let url = self.config.username_validation_url()?;
        let request = self
            .service_request(Method::POST, url, token)
            .json(&UsernameValidationRequest { username });

        let (status, body) = self.execute(request).await?;
        debug!(status = %status, "username validation response");
        match status {
            StatusCode::OK | StatusCode::BAD_REQUEST => {
                let body: UsernameValidationBody = serde_json::from_slice(&body)?;
                ValidateUsernameResponse::try_from(body)
            }
            status => Err(ClientError::Server {
                status: status.as_u16(),
            }),
        }
    }

    pub async fn create_patron(
        &self,
        token: Option<&AuthToken>,
        info: &PatronCreationInfo,
    ) -> Result<Credentials, ClientError> {
        let url = self.config.create_patron_url()?;
        let request = self
            .service_request(Method::POST, url, token)
            .json(info);

        let (status, body) = self.execute(request).await?;
        if !status.is_success() {
            return Err(platform_failure(status, &body));
        }

        let created: PatronCreatedBody = serde_json::from_slice(&body)?;
        info!("patron created");
        Ok(Credentials {
            barcode: created.barcode,
            username: info.username.clone(),
            password: info.password.clone(),
        })
    }

    /// Succeeds when the parent may add juvenile dependents.
    pub async fn check_juvenile_eligibility(
        &self,
        token: &AuthToken,
        parent_barcode: &str,
    ) -> Result<(), ClientError> {
        let platform = self
            .config
            .platform
            .as_ref()
            .ok_or(ClientError::MissingPlatformConfig)?;
        let url = platform.dependent_eligibility_url(parent_barcode)?;
        let request = self.platform_request(Method::GET, url, token);

        let (status, body) = self.execute(request).await?;
        if status.is_success() {
            return Ok(());
        }

        let detail = serde_json::from_slice::<PlatformError>(&body)
            .ok()
            .and_then(|err| err.user_message());
        let recovery = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(LOG_OUT_AND_RETRY),
            _ => None,
        };
        warn!(status = %status, "parent is not eligible to create dependents");
        Err(ClientError::IneligibleForJuvenileCardCreation { detail, recovery })
    }

    pub async fn create_juvenile(
        &self,
        token: &AuthToken,
        info: &JuvenileCreationInfo,
    ) -> Result<Credentials, ClientError> {
        let platform = self
            .config
            .platform
            .as_ref()
            .ok_or(ClientError::MissingPlatformConfig)?;
        let url = platform.dependents_url()?;
        let request = self.platform_request(Method::POST, url, token).json(info);

        let (status, body) = self.execute(request).await?;
        if !status.is_success() {
            return Err(platform_failure(status, &body));
        }

        let created: DependentCreatedBody = serde_json::from_slice(&body)?;
        info!("juvenile dependent created");
        Ok(Credentials {
            barcode: created.data.dependent.barcode,
            username: info.username.clone(),
            password: info.pin.clone(),
        })
    }

    /// Request to the card creator service. Carries one credential: the
    /// session token when held, otherwise the configured basic credentials.
    fn service_request(
        &self,
        method: Method,
        url: Url,
        token: Option<&AuthToken>,
    ) -> RequestBuilder {
        debug!(method = %method, url = %url, "service request");
        let request = self
            .http_client
            .request(method, url)
            .header(ACCEPT, mime::APPLICATION_JSON.essence_str());
        match (token, self.config.credentials.as_ref()) {
            (Some(token), _) => request.header(AUTHORIZATION, token.authorization()),
            (None, Some(credentials)) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            (None, None) => request,
        }
    }

    fn platform_request(&self, method: Method, url: Url, token: &AuthToken) -> RequestBuilder {
        debug!(method = %method, url = %url, "platform request");
        self.http_client
            .request(method, url)
            .header(ACCEPT, mime::APPLICATION_JSON.essence_str())
            .header(AUTHORIZATION, token.authorization())
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(StatusCode, Vec<u8>), ClientError> {
        self.send(request.build()?).await
    }

    /// Sends the request and reads the whole body, unless the client is invalidated first.
    async fn send(&self, request: Request) -> Result<(StatusCode, Vec<u8>), ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let exchange = async {
            let response = self.http_client.execute(request).await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, ClientError>((status, body.to_vec()))
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            result = exchange => result,
        }
    }
}

fn platform_failure(status: StatusCode, body: &[u8]) -> ClientError {
    match serde_json::from_slice::<PlatformError>(body) {
        Ok(err) => {
            warn!(status = %status, error = %err, "platform rejected request");
            ClientError::Platform(err)
        }
        Err(_) => ClientError::Server {
            status: status.as_u16(),
        },
    }
}

#[async_trait]
impl RegistrationApi for Client {
    fn has_client_credentials(&self) -> bool {
        self.config.platform.is_some()
    }

    async fn authenticate(&self) -> Result<AuthToken, ClientError> {
        Client::authenticate(self).await
    }

    async fn validate_address(
        &self,
        token: Option<&AuthToken>,
        address: &Address,
        is_work_or_school: bool,
    ) -> Result<ValidateAddressResponse, ClientError> {
        Client::validate_address(self, token, address, is_work_or_school).await
    }

    async fn validate_username(
        &self,
        token: Option<&AuthToken>,
        username: &str,
    ) -> Result<ValidateUsernameResponse, ClientError> {
        Client::validate_username(self, token, username).await
    }

    async fn create_patron(
        &self,
        token: Option<&AuthToken>,
        info: &PatronCreationInfo,
    ) -> Result<Credentials, ClientError> {
        Client::create_patron(self, token, info).await
    }

    async fn check_juvenile_eligibility(
        &self,
        token: &AuthToken,
        parent_barcode: &str,
    ) -> Result<(), ClientError> {
        Client::check_juvenile_eligibility(self, token, parent_barcode).await
    }

    async fn create_juvenile(
        &self,
        token: &AuthToken,
        info: &JuvenileCreationInfo,
    ) -> Result<Credentials, ClientError> {
        Client::create_juvenile(self, token, info).await
    }

    fn invalidate(&self) {
        Client::invalidate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BasicCredentials, PlatformConfig};
    use crate::CardType;
    use mockito::{Matcher, Server};

    fn config(server: &Server) -> Config {
        let mut config = Config::new(Url::parse(&server.url()).unwrap());
        config.credentials = Some(BasicCredentials {
            username: "app".into(),
            password: "pass".into(),
        });
        config.platform = Some(PlatformConfig {
            oauth_token_url: Url::parse(&format!("{}/oauth/token", server.url())).unwrap(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            base_url: Url::parse(&format!("{}/platform/v0.1", server.url())).unwrap(),
        });
        config
    }

    fn token() -> AuthToken {
        serde_json::from_str(r#"{"accessToken": "abc"}"#).unwrap()
    }

    fn address() -> Address {
        Address::new("1 Main St", None, "Austin", "TX", "73301").unwrap()
    }

    #[tokio::test]
    async fn authenticate_posts_client_credentials() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("client_credentials".into()),
                Matcher::Regex("name=\"client_id\"".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"accessToken": "abc", "expiresIn": 600}"#)
            .create_async()
            .await;

        let client = Client::new(config(&server)).unwrap();
        let token = client.authenticate().await.unwrap();

        mock.assert_async().await;
        assert_eq!("Bearer abc", token.authorization());
        assert!(token.expires.is_some());
    }

    #[tokio::test]
    async fn authenticate_reports_failing_step() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(500)
            .create_async()
            .await;
        let client = Client::new(config(&server)).unwrap();
        assert!(matches!(
            client.authenticate().await,
            Err(ClientError::Auth(AuthError::UnsuccessfulHttpStatusCode(500)))
        ));

        let mut unconfigured = config(&server);
        unconfigured.platform = None;
        let client = Client::new(unconfigured).unwrap();
        assert!(matches!(
            client.authenticate().await,
            Err(ClientError::Auth(AuthError::MissingAuthentication))
        ));
    }

    #[tokio::test]
    async fn authenticate_reports_unbuildable_request() {
        let server = Server::new_async().await;
        let mut config = config(&server);
        if let Some(platform) = config.platform.as_mut() {
            platform.oauth_token_url = Url::parse("unix:/run/token.sock").unwrap();
        }
        let client = Client::new(config).unwrap();
        assert!(matches!(
            client.authenticate().await,
            Err(ClientError::Auth(AuthError::JsonEncodingFail))
        ));
    }

    #[tokio::test]
    async fn authenticate_rejects_undecodable_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;
        let client = Client::new(config(&server)).unwrap();
        assert!(matches!(
            client.authenticate().await,
            Err(ClientError::Auth(AuthError::JsonDecodingFail))
        ));
    }

    #[tokio::test]
    async fn validate_address_accepts_bad_request_bodies() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v0.3/validations/address")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .match_body(Matcher::PartialJson(serde_json::json!({
                "address": {"line1": "1 Main St", "state": "TX"},
                "is_work_or_school_address": true
            })))
            .with_status(400)
            .with_body(r#"{"type": "unrecognized-address", "message": "No match"}"#)
            .create_async()
            .await;

        let client = Client::new(config(&server)).unwrap();
        let response = client
            .validate_address(None, &address(), true)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            ValidateAddressResponse::UnrecognizedAddress("No match".into()),
            response
        );
    }

    #[tokio::test]
    async fn validate_address_valid_with_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v0.3/validations/address")
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_body(
                r#"{"type": "valid-address", "address":
                    {"line1": "1 MAIN ST", "city": "AUSTIN", "state": "TX", "zip": "73301-0001"}}"#,
            )
            .create_async()
            .await;

        let client = Client::new(config(&server)).unwrap();
        let response = client
            .validate_address(Some(&token()), &address(), false)
            .await
            .unwrap();

        mock.assert_async().await;
        match response {
            ValidateAddressResponse::ValidAddress(address, card_type) => {
                assert_eq!("73301-0001", address.zip());
                assert_eq!(CardType::None, card_type);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn validate_address_other_status_is_server_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v0.3/validations/address")
            .with_status(502)
            .create_async()
            .await;
        let client = Client::new(config(&server)).unwrap();
        assert!(matches!(
            client.validate_address(None, &address(), false).await,
            Err(ClientError::Server { status: 502 })
        ));
    }

    #[tokio::test]
    async fn validate_username_decodes_type() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v0.3/validations/username")
            .match_body(Matcher::Json(serde_json::json!({"username": "reader01"})))
            .with_status(200)
            .with_body(r#"{"type": "available-username"}"#)
            .create_async()
            .await;
        let client = Client::new(config(&server)).unwrap();
        assert_eq!(
            ValidateUsernameResponse::Available,
            client.validate_username(None, "reader01").await.unwrap()
        );
    }

    fn patron() -> PatronCreationInfo {
        PatronCreationInfo {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            address: Address::new("476 Fifth Ave", None, "New York", "NY", "10018").unwrap(),
            username: "ada1815".into(),
            password: "Analytic1!".into(),
            work_or_school_address: None,
            birthdate: None,
            username_has_been_validated: true,
            policy_type: "simplye".into(),
            age_gate: true,
            accept_terms: true,
        }
    }

    #[tokio::test]
    async fn create_patron_returns_credentials() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v0.3/create_patron")
            .with_status(201)
            .with_body(r#"{"barcode": "25555012345678"}"#)
            .create_async()
            .await;
        let client = Client::new(config(&server)).unwrap();
        let credentials = client.create_patron(None, &patron()).await.unwrap();
        assert_eq!("25555012345678", credentials.barcode);
        assert_eq!("ada1815", credentials.username);
        assert_eq!("Analytic1!", credentials.password);
    }

    #[tokio::test]
    async fn create_patron_surfaces_platform_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v0.3/create_patron")
            .with_status(400)
            .with_body(
                r#"{"status": 400, "type": "invalid-request",
                    "error": {"username": "Username taken.", "email": "Email invalid."}}"#,
            )
            .create_async()
            .await;
        let client = Client::new(config(&server)).unwrap();
        let err = client.create_patron(None, &patron()).await.unwrap_err();
        assert_eq!("Email invalid. Username taken.", err.user_message());
    }

    #[tokio::test]
    async fn juvenile_eligibility_forbidden_suggests_log_out() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/platform/v0.1/patrons/dependent-eligibility")
            .match_query(Matcher::UrlEncoded("barcode".into(), "25555000000000".into()))
            .with_status(403)
            .with_body(r#"{"status": 403, "detail": "Not allowed."}"#)
            .create_async()
            .await;
        let client = Client::new(config(&server)).unwrap();
        let err = client
            .check_juvenile_eligibility(&token(), "25555000000000")
            .await
            .unwrap_err();
        assert_eq!(Some(LOG_OUT_AND_RETRY), err.recovery());
        assert_eq!(
            format!("Not allowed. {}", LOG_OUT_AND_RETRY),
            err.user_message()
        );
    }

    #[tokio::test]
    async fn juvenile_eligibility_other_failures() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/platform/v0.1/patrons/dependent-eligibility")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"status": 400, "message": "Card limit reached."}"#)
            .create_async()
            .await;
        let client = Client::new(config(&server)).unwrap();
        let err = client
            .check_juvenile_eligibility(&token(), "25555000000000")
            .await
            .unwrap_err();
        assert_eq!(None, err.recovery());
        assert_eq!("Card limit reached.", err.user_message());
    }

    #[tokio::test]
    async fn create_juvenile_reads_nested_barcode() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/platform/v0.1/patrons/dependents")
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_body(r#"{"data": {"dependent": {"barcode": "25555099999999"}}}"#)
            .create_async()
            .await;
        let client = Client::new(config(&server)).unwrap();
        let info = JuvenileCreationInfo {
            barcode: "25555000000000".into(),
            name: "Kid Lovelace".into(),
            username: "kid2015".into(),
            pin: "1357".into(),
        };
        let credentials = client.create_juvenile(&token(), &info).await.unwrap();
        assert_eq!("25555099999999", credentials.barcode);
        assert_eq!("1357", credentials.password);
    }

    /// Accepts one connection, answers with `body` and returns the request head.
    async fn capture_request_head(listener: tokio::net::TcpListener, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        let head_end = loop {
            if let Some(end) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                break end;
            }
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            received.extend_from_slice(&buf[..n]);
        };
        let head = String::from_utf8_lossy(&received[..head_end]).into_owned();

        let content_length: usize = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while received.len() < head_end + 4 + content_length {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before body");
            received.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            concat!(
                "HTTP/1.1 200 OK\r\n",
                "content-type: application/json\r\n",
                "content-length: {}\r\n",
                "connection: close\r\n\r\n{}"
            ),
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        head
    }

    fn authorization_headers(head: &str) -> Vec<String> {
        head.lines()
            .filter(|line| line.to_ascii_lowercase().starts_with("authorization:"))
            .map(|line| line["authorization:".len()..].trim().to_string())
            .collect()
    }

    #[tokio::test]
    async fn service_request_sends_a_single_authorization_header() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let capture = tokio::spawn(capture_request_head(
            listener,
            r#"{"type": "available-username"}"#,
        ));

        let mut config = Config::new(Url::parse(&base).unwrap());
        config.credentials = Some(BasicCredentials {
            username: "app".into(),
            password: "pass".into(),
        });
        let client = Client::new(config).unwrap();
        assert_eq!(
            ValidateUsernameResponse::Available,
            client
                .validate_username(Some(&token()), "reader01")
                .await
                .unwrap()
        );

        let head = capture.await.unwrap();
        assert_eq!(vec!["Bearer abc".to_string()], authorization_headers(&head));
    }

    #[tokio::test]
    async fn service_request_without_token_uses_basic_credentials() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let capture = tokio::spawn(capture_request_head(
            listener,
            r#"{"type": "available-username"}"#,
        ));

        let mut config = Config::new(Url::parse(&base).unwrap());
        config.credentials = Some(BasicCredentials {
            username: "app".into(),
            password: "pass".into(),
        });
        let client = Client::new(config).unwrap();
        client.validate_username(None, "reader01").await.unwrap();

        let head = capture.await.unwrap();
        assert_eq!(
            vec!["Basic YXBwOnBhc3M=".to_string()],
            authorization_headers(&head)
        );
    }

    #[tokio::test]
    async fn invalidated_client_cancels_requests() {
        let server = Server::new_async().await;
        let client = Client::new(config(&server)).unwrap();
        client.invalidate();
        assert!(client.is_invalidated());
        assert!(matches!(
            client.validate_username(None, "reader01").await,
            Err(ClientError::Cancelled)
        ));
    }
}
