//! GitHub App authentication.
//!
//! A run authenticates exactly once: it mints a short-lived RS256 assertion
//! from the App's private key, exchanges it for an installation access token,
//! and reuses that token for every request of the run. Nothing is cached
//! between runs.

use crate::error::{MetricsError, MetricsResult};
use crate::transport::Transport;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Backdating applied to `iat` to absorb clock drift against GitHub.
pub const CLOCK_SKEW_SECS: i64 = 60;
/// Lifetime of an assertion counted from `now`; GitHub caps this at ten minutes.
pub const ASSERTION_LIFETIME_SECS: i64 = 600;

pub struct InstallationCredential {
    pub app_id: String,
    pub installation_id: String,
    private_key_pem: Vec<u8>,
}

impl InstallationCredential {
    pub fn new(
        app_id: impl Into<String>,
        installation_id: impl Into<String>,
        private_key_pem: Vec<u8>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            installation_id: installation_id.into(),
            private_key_pem,
        }
    }
}

impl fmt::Debug for InstallationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationCredential")
            .field("app_id", &self.app_id)
            .field("installation_id", &self.installation_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Clone)]
pub struct SignedAssertion {
    token: String,
    claims: AssertionClaims,
}

impl SignedAssertion {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &AssertionClaims {
        &self.claims
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp(self.claims.iat)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp(self.claims.exp)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.claims.exp
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Installation access token. Lives for one run and is never written anywhere.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    message: Option<String>,
    expires_at: Option<String>,
}

/// Mint an RS256 assertion valid from `now - 60s` until `now + 600s`.
pub fn mint(credential: &InstallationCredential, now: DateTime<Utc>) -> MetricsResult<SignedAssertion> {
    let claims = AssertionClaims {
        iat: (now - Duration::seconds(CLOCK_SKEW_SECS)).timestamp(),
        exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        iss: credential.app_id.clone(),
    };

    let key = EncodingKey::from_rsa_pem(&credential.private_key_pem)
        .map_err(|e| MetricsError::Auth(format!("invalid private key: {}", e)))?;
    let token = encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| MetricsError::Auth(format!("cannot sign assertion: {}", e)))?;

    debug!(iss = %claims.iss, iat = claims.iat, exp = claims.exp, "Minted app assertion");
    Ok(SignedAssertion { token, claims })
}

pub struct TokenIssuer<'a> {
    transport: &'a dyn Transport,
    api_base_url: String,
}

impl<'a> TokenIssuer<'a> {
    pub fn new(transport: &'a dyn Transport, api_base_url: &str) -> Self {
        Self {
            transport,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn token_url(&self, installation_id: &str) -> String {
        format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base_url, installation_id
        )
    }

    /// Exchange an assertion for an installation access token. No retry.
    pub async fn exchange(
        &self,
        assertion: &SignedAssertion,
        installation_id: &str,
        now: DateTime<Utc>,
    ) -> MetricsResult<AccessToken> {
        if assertion.is_expired_at(now) {
            return Err(MetricsError::Auth(format!(
                "assertion expired at {}",
                assertion.expires_at().to_rfc3339()
            )));
        }

        let url = self.token_url(installation_id);
        let body = self
            .transport
            .post(&url, assertion.as_str())
            .await
            .map_err(|e| MetricsError::Auth(format!("token exchange failed: {}", e)))?;

        let response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| MetricsError::Auth(format!("unreadable token response: {}", e)))?;

        match response.token {
            Some(token) if !token.is_empty() => {
                info!(
                    installation_id,
                    expires_at = response.expires_at.as_deref().unwrap_or("unknown"),
                    "Obtained installation access token"
                );
                Ok(AccessToken(token))
            }
            _ => Err(MetricsError::Auth(
                response
                    .message
                    .unwrap_or_else(|| "token exchange returned no token".to_string()),
            )),
        }
    }

    /// Mint and exchange in one step, both at `now`.
    pub async fn authenticate(
        &self,
        credential: &InstallationCredential,
        now: DateTime<Utc>,
    ) -> MetricsResult<AccessToken> {
        let assertion = mint(credential, now)?;
        self.exchange(&assertion, &credential.installation_id, now)
            .await
    }
}
