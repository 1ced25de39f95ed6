//! OAuth access tokens for the BigQuery REST API.
//!
//! Either a pre-issued token is used as-is, or one is minted from a service
//! account key with the JWT bearer grant.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a Google service account key file this crate needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid service account key")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read credential file {}", path.display()))?;
        Self::from_json(&json)
    }
}

/// JWT claims for the service account assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl TokenState {
    fn is_fresh(&self) -> bool {
        self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now()
    }
}

/// Exchanges a signed service account assertion for access tokens, caching
/// each token until shortly before it expires.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    client: reqwest::Client,
    token: Mutex<Option<TokenState>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service account private key is not a valid RSA PEM")?;

        Ok(Self {
            key,
            encoding_key,
            client: reqwest::Client::new(),
            token: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    pub fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: BIGQUERY_SCOPE.to_string(),
            aud: self.key.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        encode(&header, &claims, &self.encoding_key).context("failed to sign JWT assertion")
    }

    async fn request_token(&self) -> Result<TokenState> {
        let now = Utc::now();
        let assertion = self.sign_assertion(now)?;

        debug!("Requesting access token from {}", self.key.token_uri);

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("token request failed")?;

        let status = response.status();
        let body = response.text().await.context("failed to read token response")?;
        if !status.is_success() {
            return Err(anyhow!("token request failed: {} - {}", status, body));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).context("failed to parse token response")?;

        info!(
            "Obtained BigQuery access token for {}, expires in {}s",
            self.key.client_email, token.expires_in
        );

        Ok(TokenState {
            access_token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }

    pub async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }
}

pub enum Authenticator {
    Static(String),
    ServiceAccount(ServiceAccountAuth),
}

impl Authenticator {
    /// Picks the credential source. A pre-issued token wins over a key file.
    pub fn from_settings(credentials: Option<&Path>, access_token: Option<&str>) -> Result<Self> {
        if let Some(token) = access_token.map(str::trim).filter(|t| !t.is_empty()) {
            info!("Using pre-issued BigQuery access token");
            return Ok(Self::Static(token.to_string()));
        }

        let path = credentials
            .ok_or_else(|| anyhow!("no credential file or access token configured"))?;
        let key = ServiceAccountKey::from_file(path)?;
        let auth = ServiceAccountAuth::new(key)?;
        info!("Using service account {}", auth.client_email());
        Ok(Self::ServiceAccount(auth))
    }

    pub async fn bearer_token(&self) -> Result<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ServiceAccount(auth) => auth.access_token().await,
        }
    }
}
