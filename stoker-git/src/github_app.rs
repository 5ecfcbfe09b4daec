//! GitHub App installation-token exchange.
//!
//! 1. Sign an RS256 JWT (`iat = now - 60s`, `exp = now + 10m`, `iss = app id`).
//! 2. `POST {api}/app/installations/{id}/access_tokens` with it as bearer.
//! 3. Expect `201 Created` carrying `{token, expires_at}`.
//!
//! No retries; a failed exchange surfaces to the caller as-is.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Backdating for clock skew between us and GitHub.
const JWT_BACKDATE_SECS: i64 = 60;
/// GitHub rejects app JWTs that live longer than ten minutes.
const JWT_LIFETIME_SECS: i64 = 600;

/// A minted installation token.
#[derive(Debug)]
pub struct GitHubAppToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Registered claims carried by the app JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Label of the first PEM block (`RSA PRIVATE KEY`, `PRIVATE KEY`, ...).
pub(crate) fn pem_label(pem: &str) -> Option<&str> {
    pem.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("-----BEGIN ")?.strip_suffix("-----"))
}

/// Sign the short-lived app JWT. Accepts PKCS#1 and PKCS#8 RSA keys only.
pub fn sign_app_jwt(
    private_key_pem: &str,
    app_id: i64,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    match pem_label(private_key_pem) {
        Some("RSA PRIVATE KEY") | Some("PRIVATE KEY") => {}
        Some(other) => return Err(AuthError::UnsupportedKeyType(other.to_string())),
        None => return Err(AuthError::InvalidPem("no PEM block found".to_string())),
    }

    let now = now.timestamp();
    let claims = AppClaims {
        iat: now - JWT_BACKDATE_SECS,
        exp: now + JWT_LIFETIME_SECS,
        iss: app_id.to_string(),
    };
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())?;
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &claims,
        &key,
    )?)
}

/// Exchange the app's private key for an installation token.
///
/// `api_base_url` defaults to [`DEFAULT_GITHUB_API_URL`] when `None` or empty.
pub async fn exchange_installation_token(
    http: &reqwest::Client,
    private_key: &SecretString,
    app_id: i64,
    installation_id: i64,
    api_base_url: Option<&str>,
) -> Result<GitHubAppToken, AuthError> {
    let base = api_base_url
        .filter(|url| !url.is_empty())
        .unwrap_or(DEFAULT_GITHUB_API_URL)
        .trim_end_matches('/');
    let jwt = sign_app_jwt(private_key.expose_secret(), app_id, Utc::now())?;
    let url = format!("{base}/app/installations/{installation_id}/access_tokens");

    tracing::debug!(app_id, installation_id, url = %url, "exchanging GitHub App token");
    let response = http
        .post(&url)
        .header(ACCEPT, "application/vnd.github+json")
        .header(USER_AGENT, concat!("stoker-agent/", env!("CARGO_PKG_VERSION")))
        .bearer_auth(jwt)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if status != StatusCode::CREATED {
        return Err(AuthError::ExchangeRejected {
            status: status.as_u16(),
            body,
        });
    }

    let parsed: InstallationTokenResponse =
        serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
    if parsed.token.is_empty() {
        return Err(AuthError::InvalidResponse("empty token".to_string()));
    }

    tracing::info!(
        app_id,
        installation_id,
        expires_at = %parsed.expires_at,
        "minted GitHub App installation token"
    );
    Ok(GitHubAppToken {
        token: SecretString::from(parsed.token),
        expires_at: parsed.expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const EC_KEY: &str = include_str!("../tests/fixtures/ec-key.pem");
    const PKCS1_KEY: &str = include_str!("../tests/fixtures/app-key-pkcs1.pem");

    #[rstest]
    #[case::pkcs1(PKCS1_KEY, Some("RSA PRIVATE KEY"))]
    #[case::ec(EC_KEY, Some("EC PRIVATE KEY"))]
    #[case::garbage("not a pem", None)]
    fn pem_label_reads_first_block(#[case] pem: &str, #[case] expected: Option<&str>) {
        assert_eq!(pem_label(pem), expected);
    }

    #[test]
    fn ec_key_is_unsupported() {
        let err = sign_app_jwt(EC_KEY, 1, Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "unsupported PEM block type: EC PRIVATE KEY");
    }

    #[test]
    fn garbage_has_no_pem_block() {
        let err = sign_app_jwt("hello", 1, Utc::now()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidPem(_)));
    }

    #[test]
    fn pkcs1_key_signs_three_part_token() {
        let jwt = sign_app_jwt(PKCS1_KEY, 12345, Utc::now()).unwrap();
        assert_eq!(jwt.split('.').count(), 3);
    }
}
