//! The auth server seam and its HTTP implementation.

use std::future::Future;
use std::time::Duration;

use authflow_token::{
    AccessToken, LoginResponse, RefreshResponse, RefreshToken, SessionCheck,
};
use serde::Serialize;
use tracing::debug;

use crate::ApiError;

/// The auth server, as the lifecycle manager sees it.
///
/// Implemented over HTTP by [`HttpAuthApi`]; tests implement it with
/// scripted responses. All methods are cancel-safe in the sense that the
/// caller never relies on partial effects: a request either produced a
/// decoded response or an [`ApiError`].
pub trait AuthApi: Send + Sync + 'static {
    /// Exchanges credentials for a token, optional refresh token, and a
    /// user snapshot.
    fn login(
        &self,
        identifier: &str,
        password: &str,
    ) -> impl Future<Output = Result<LoginResponse, ApiError>> + Send;

    /// Registers a new account; the response shape matches login.
    fn signup(
        &self,
        identifier: &str,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<LoginResponse, ApiError>> + Send;

    /// Exchanges a refresh token for fresh tokens.
    fn refresh_with_token(
        &self,
        refresh_token: &RefreshToken,
    ) -> impl Future<Output = Result<RefreshResponse, ApiError>> + Send;

    /// Renews the current bearer token when no refresh token exists.
    fn refresh_with_bearer(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<RefreshResponse, ApiError>> + Send;

    /// Tells the server the session ended. Best effort: the caller has
    /// already cleared local state and ignores failures.
    fn logout(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Asks the server whether the session behind `token` is still live.
    fn check_session(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<SessionCheck, ApiError>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Configuration for [`HttpAuthApi`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL of the auth server, without a trailing slash.
    pub base_url: String,
    /// Per-request deadline. Network calls use timeouts rather than
    /// cooperative cancellation.
    pub request_timeout: Duration,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignupRequest<'a> {
    identifier: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// [`AuthApi`] over HTTP via `reqwest`.
///
/// Endpoints: `{base}/auth/login`, `/auth/signup`, `/auth/refresh`,
/// `/auth/renew`, `/auth/logout`, `/auth/session`.
pub struct HttpAuthApi {
    config: HttpConfig,
    client: reqwest::Client,
}

impl HttpAuthApi {
    pub fn new(config: HttpConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ApiError::Network)?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    fn classify_send(error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(error)
        }
    }

    fn check_status(response: &reqwest::Response) -> Result<(), ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let code = status.as_u16();
        if code == 401 || code == 403 {
            Err(ApiError::Unauthorized(code))
        } else {
            Err(ApiError::Server(code))
        }
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        bearer: Option<&AccessToken>,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ApiError> {
        debug!(path, "auth api request");
        let mut request = self.client.post(self.url(path));
        if let Some(token) = bearer {
            request = request.bearer_auth(token.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(Self::classify_send)?;
        Self::check_status(&response)?;
        Ok(response)
    }
}

impl AuthApi for HttpAuthApi {
    async fn login(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<LoginResponse, ApiError> {
        let body = LoginRequest {
            identifier,
            password,
        };
        self.post("/auth/login", None, Some(&body))
            .await?
            .json()
            .await
            .map_err(ApiError::Decode)
    }

    async fn signup(
        &self,
        identifier: &str,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ApiError> {
        let body = SignupRequest {
            identifier,
            username,
            password,
        };
        self.post("/auth/signup", None, Some(&body))
            .await?
            .json()
            .await
            .map_err(ApiError::Decode)
    }

    async fn refresh_with_token(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<RefreshResponse, ApiError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.as_str(),
        };
        self.post("/auth/refresh", None, Some(&body))
            .await?
            .json()
            .await
            .map_err(ApiError::Decode)
    }

    async fn refresh_with_bearer(
        &self,
        token: &AccessToken,
    ) -> Result<RefreshResponse, ApiError> {
        self.post::<()>("/auth/renew", Some(token), None)
            .await?
            .json()
            .await
            .map_err(ApiError::Decode)
    }

    async fn logout(&self, token: &AccessToken) -> Result<(), ApiError> {
        self.post::<()>("/auth/logout", Some(token), None).await?;
        Ok(())
    }

    async fn check_session(
        &self,
        token: &AccessToken,
    ) -> Result<SessionCheck, ApiError> {
        let response = self
            .client
            .get(self.url("/auth/session"))
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(Self::classify_send)?;
        Self::check_status(&response)?;
        response.json().await.map_err(ApiError::Decode)
    }
}
