//! Credential resolution for the two authentication schemes.
//!
//! - Access key / secret key: every request is signed, no network call here.
//! - App key / secret key (`ak`/`sk`): exchanged for a short-lived access token,
//!   cached in the [`CredentialStore`] until it expires.
//!
//! The signed scheme is checked first when both are configured.

use crate::error::Error;
use crate::sign::Signer;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// Token exchange path, relative to the auth base URL.
const TOKEN_PATH: &str = "/oauth/2.0/token";

/// Default validity window written into each signature.
pub const DEFAULT_SIGN_EXPIRATION_SECS: u64 = 300;

/// Default timeout for the token exchange call.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Credentials as configured. Empty strings count as unset.
#[derive(Debug, Clone, Default)]
pub struct CredentialConfig {
    pub ak: Option<String>,
    pub sk: Option<SecretString>,
    pub access_key: Option<String>,
    pub secret_key: Option<SecretString>,
}

impl CredentialConfig {
    /// App key pair for the token-exchange scheme.
    pub fn ak_sk(ak: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            ak: Some(ak.into()),
            sk: Some(SecretString::from(sk.into())),
            ..Default::default()
        }
    }

    /// Access key pair for the signed-request scheme.
    pub fn access_key(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: Some(access_key.into()),
            secret_key: Some(SecretString::from(secret_key.into())),
            ..Default::default()
        }
    }

    fn scheme(&self) -> Option<Scheme<'_>> {
        if let (Some(access_key), Some(secret_key)) =
            (present(self.access_key.as_deref()), present_secret(self.secret_key.as_ref()))
        {
            return Some(Scheme::Signed {
                access_key,
                secret_key,
            });
        }
        if let (Some(ak), Some(sk)) = (present(self.ak.as_deref()), present_secret(self.sk.as_ref())) {
            return Some(Scheme::Bearer { ak, sk });
        }
        None
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn present_secret(value: Option<&SecretString>) -> Option<&SecretString> {
    value.filter(|v| !v.expose_secret().is_empty())
}

enum Scheme<'a> {
    Signed {
        access_key: &'a str,
        secret_key: &'a SecretString,
    },
    Bearer {
        ak: &'a str,
        sk: &'a SecretString,
    },
}

/// A cached bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: i64,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl AccessToken {
    /// Expired once `now` reaches `expires_at`; there is no grace period.
    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Authorization for exactly one request.
#[derive(Clone)]
pub enum Authorization {
    /// Attach as the `access_token` query parameter.
    Bearer(String),
    /// Sign the outgoing request.
    Signed(Signer),
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authorization::Bearer(_) => f.write_str("Bearer(..)"),
            Authorization::Signed(signer) => f.debug_tuple("Signed").field(signer).finish(),
        }
    }
}

/// Owns the configured credentials and the process-lifetime token cache.
///
/// The cache lock is never held across I/O, so concurrent callers that find an
/// expired token may each run an exchange; the last one to finish wins.
#[derive(Debug)]
pub struct CredentialStore {
    config: CredentialConfig,
    auth_base_url: String,
    sign_expiration_secs: u64,
    timeout: Duration,
    token: RwLock<Option<AccessToken>>,
}

impl CredentialStore {
    pub fn new(config: CredentialConfig, auth_base_url: impl Into<String>) -> Self {
        Self {
            config,
            auth_base_url: auth_base_url.into(),
            sign_expiration_secs: DEFAULT_SIGN_EXPIRATION_SECS,
            timeout: DEFAULT_AUTH_TIMEOUT,
            token: RwLock::new(None),
        }
    }

    /// Set the validity window of each request signature.
    pub fn with_sign_expiration(mut self, secs: u64) -> Self {
        self.sign_expiration_secs = secs;
        self
    }

    /// Set the token exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fail with [`Error::Config`] if no scheme is usable. Performs no I/O.
    pub fn check(&self) -> Result<(), Error> {
        self.config
            .scheme()
            .map(|_| ())
            .ok_or_else(no_scheme)
    }

    /// Currently cached token, if any.
    pub fn cached_token(&self) -> Option<AccessToken> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve the authorization for one request, exchanging a new token if the
    /// cached one is missing or expired.
    pub async fn get_or_refresh(&self, http: &reqwest::Client) -> Result<Authorization, Error> {
        match self.config.scheme().ok_or_else(no_scheme)? {
            Scheme::Signed {
                access_key,
                secret_key,
            } => {
                debug!("using signed-request credentials");
                Ok(Authorization::Signed(Signer::new(
                    access_key,
                    secret_key.clone(),
                    self.sign_expiration_secs,
                )))
            }
            Scheme::Bearer { ak, sk } => {
                if let Some(token) = self.cached_token() {
                    if !token.is_expired_at(Utc::now().timestamp()) {
                        return Ok(Authorization::Bearer(token.value));
                    }
                    debug!(expires_at = token.expires_at, "access token expired");
                }

                let token = self.exchange(http, ak, sk).await?;
                let value = token.value.clone();
                *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
                Ok(Authorization::Bearer(value))
            }
        }
    }

    async fn exchange(
        &self,
        http: &reqwest::Client,
        ak: &str,
        sk: &SecretString,
    ) -> Result<AccessToken, Error> {
        let url = format!("{}{}", self.auth_base_url.trim_end_matches('/'), TOKEN_PATH);
        debug!(%url, "exchanging app key for access token");

        let resp = http
            .post(&url)
            .timeout(self.timeout)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", ak),
                ("client_secret", sk.expose_secret()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        let body: TokenResponse = serde_json::from_slice(&bytes).unwrap_or_default();

        if !status.is_success() {
            return Err(Error::transport(format!(
                "token exchange failed with status {}{}",
                status.as_u16(),
                body.describe()
            )));
        }

        let value = body
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::transport(format!(
                    "token exchange returned no access_token{}",
                    body.describe()
                ))
            })?;

        let expires_in = body.expires_in.unwrap_or(0);
        debug!(expires_in, "access token refreshed");

        Ok(AccessToken {
            value,
            expires_at: Utc::now().timestamp().saturating_add(expires_in),
        })
    }
}

fn no_scheme() -> Error {
    Error::config(
        "no valid credential scheme configured: set ak/sk or access_key/secret_key",
    )
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn describe(&self) -> String {
        match (&self.error, &self.error_description) {
            (Some(err), Some(desc)) => format!(": {err} ({desc})"),
            (Some(err), None) => format!(": {err}"),
            (None, Some(desc)) => format!(": {desc}"),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(config: CredentialConfig) -> CredentialStore {
        // Unroutable base: any attempted exchange would fail loudly.
        CredentialStore::new(config, "http://127.0.0.1:9")
    }

    #[test]
    fn test_token_expiry_has_no_grace() {
        let token = AccessToken {
            value: "t".into(),
            expires_at: 100,
        };
        assert!(!token.is_expired_at(99));
        assert!(token.is_expired_at(100));
        assert!(token.is_expired_at(101));
    }

    #[test]
    fn test_empty_strings_are_unset() {
        let config = CredentialConfig::ak_sk("", "sk");
        assert!(store(config).check().is_err());
    }

    #[tokio::test]
    async fn test_no_credentials_is_config_error() {
        let http = reqwest::Client::new();
        let err = store(CredentialConfig::default())
            .get_or_refresh(&http)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_signed_scheme_wins() {
        let config = CredentialConfig {
            ak: Some("ak".into()),
            sk: Some(SecretString::from("sk".to_string())),
            access_key: Some("access".into()),
            secret_key: Some(SecretString::from("secret".to_string())),
        };
        let http = reqwest::Client::new();
        let store = store(config);
        let auth = store.get_or_refresh(&http).await.unwrap();
        assert!(matches!(auth, Authorization::Signed(_)));
        assert!(store.cached_token().is_none());
    }

    #[test]
    fn test_token_debug_hides_value() {
        let token = AccessToken {
            value: "24.secret-token".into(),
            expires_at: 1,
        };
        assert!(!format!("{token:?}").contains("secret-token"));
    }

    #[test]
    fn test_describe_token_error() {
        let body: TokenResponse = serde_json::from_str(
            r#"{"error":"invalid_client","error_description":"unknown client id"}"#,
        )
        .unwrap();
        assert_eq!(body.describe(), ": invalid_client (unknown client id)");
    }
}
