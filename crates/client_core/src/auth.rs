use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shared::{
    domain::User,
    error::{ApiError, ErrorCode},
    protocol::{AuthResponse, CredentialsRequest, VerifyResponse},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::token_store::TokenStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("an account with this email already exists")]
    AccountExists,
    #[error("session expired, sign in again")]
    SessionExpired,
    #[error("{0}")]
    Api(String),
    #[error("network failure: {0}")]
    Network(String),
}

/// What the call controller needs to know about the signed-in session,
/// without coupling it to the REST client.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
    async fn current_user(&self) -> Option<User>;
}

struct AuthState {
    access_token: Option<String>,
    user: Option<User>,
}

/// REST client for the phone backend's auth endpoints. Holds the bearer
/// token and the last-known account record; the token survives restarts
/// through the [`TokenStore`].
pub struct AuthClient {
    http: Client,
    base_url: String,
    store: TokenStore,
    inner: Mutex<AuthState>,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, store: TokenStore) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            store,
            inner: Mutex::new(AuthState {
                access_token: None,
                user: None,
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let response = self
            .http
            .post(format!("{}/phone/login", self.base_url))
            .json(&CredentialsRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(network_error)?;
        if !response.status().is_success() {
            return Err(credentials_failure(response).await);
        }
        let body: AuthResponse = response.json().await.map_err(network_error)?;

        info!("auth: signed in user_id={}", body.user.id.0);
        self.install_session(body.access_token, body.user.clone())
            .await;
        Ok(body.user)
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let response = self
            .http
            .post(format!("{}/phone/register", self.base_url))
            .json(&CredentialsRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(network_error)?;
        if !response.status().is_success() {
            return Err(credentials_failure(response).await);
        }
        let body: AuthResponse = response.json().await.map_err(network_error)?;

        info!("auth: registered user_id={}", body.user.id.0);
        self.install_session(body.access_token, body.user.clone())
            .await;
        Ok(body.user)
    }

    /// Re-validate the current token against the backend and refresh the
    /// cached account record (the credit balance moves server-side). A
    /// rejected token is dropped from memory and disk.
    pub async fn verify(&self) -> Result<User, AuthError> {
        let token = self
            .access_token()
            .await
            .ok_or(AuthError::SessionExpired)?;
        let response = self
            .http
            .post(format!("{}/phone/verify", self.base_url))
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(network_error)?;
        if !response.status().is_success() {
            let failure = verify_failure(response).await;
            if failure == AuthError::SessionExpired {
                self.discard_session().await;
            }
            return Err(failure);
        }
        let body: VerifyResponse = response.json().await.map_err(network_error)?;

        let mut state = self.inner.lock().await;
        state.user = Some(body.user.clone());
        Ok(body.user)
    }

    /// Pick up a persisted token from disk and verify it. `Ok(None)` means
    /// no session to resume; a stale token is discarded the same way the
    /// original client dropped its stored credential on a failed check.
    pub async fn restore(&self) -> Result<Option<User>, AuthError> {
        let token = match self.store.load() {
            Ok(token) => token,
            Err(err) => {
                warn!("auth: session cache unreadable, ignoring it: {err}");
                None
            }
        };
        let Some(token) = token else {
            return Ok(None);
        };

        {
            let mut state = self.inner.lock().await;
            state.access_token = Some(token);
        }
        match self.verify().await {
            Ok(user) => Ok(Some(user)),
            Err(AuthError::SessionExpired) => Ok(None),
            Err(err) => {
                // Network trouble: keep the token for the next start.
                let mut state = self.inner.lock().await;
                state.access_token = None;
                Err(err)
            }
        }
    }

    pub async fn logout(&self) {
        self.discard_session().await;
        info!("auth: signed out");
    }

    async fn install_session(&self, token: String, user: User) {
        if let Err(err) = self.store.save(&token) {
            warn!("auth: could not persist session token: {err}");
        }
        let mut state = self.inner.lock().await;
        state.access_token = Some(token);
        state.user = Some(user);
    }

    async fn discard_session(&self) {
        if let Err(err) = self.store.clear() {
            warn!("auth: could not clear persisted session: {err}");
        }
        let mut state = self.inner.lock().await;
        state.access_token = None;
        state.user = None;
    }
}

#[async_trait]
impl SessionProvider for AuthClient {
    async fn access_token(&self) -> Option<String> {
        self.inner.lock().await.access_token.clone()
    }

    async fn current_user(&self) -> Option<User> {
        self.inner.lock().await.user.clone()
    }
}

fn network_error(err: reqwest::Error) -> AuthError {
    AuthError::Network(err.to_string())
}

/// Login/registration failure: 401 means bad credentials, 409 a duplicate
/// account; anything else surfaces the backend's message.
async fn credentials_failure(response: reqwest::Response) -> AuthError {
    let status = response.status();
    let body = response.json::<ApiError>().await.ok();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AuthError::InvalidCredentials,
        StatusCode::CONFLICT => AuthError::AccountExists,
        _ => match body {
            Some(ApiError {
                code: ErrorCode::Unauthorized,
                ..
            }) => AuthError::InvalidCredentials,
            Some(body) => AuthError::Api(body.message),
            None => AuthError::Api(format!("request failed with status {status}")),
        },
    }
}

async fn verify_failure(response: reqwest::Response) -> AuthError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return AuthError::SessionExpired;
    }
    match response.json::<ApiError>().await {
        Ok(ApiError {
            code: ErrorCode::Unauthorized,
            ..
        }) => AuthError::SessionExpired,
        Ok(body) => AuthError::Api(body.message),
        Err(_) => AuthError::Api(format!("request failed with status {status}")),
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
