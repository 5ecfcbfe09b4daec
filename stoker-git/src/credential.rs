//! Credential model.
//!
//! A [`Credential`] is what was declared (secret material already loaded);
//! a [`GitCredential`] is what the transport consumes. Every variant of the
//! former resolves to one of the latter.

use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Username GitHub expects alongside installation and personal tokens.
pub const TOKEN_USERNAME: &str = "x-access-token";

/// Declared git credential with its secret material loaded.
#[derive(Debug)]
pub enum Credential {
    /// Public repository, no auth.
    None,
    SshKey {
        private_key: SecretString,
    },
    Token {
        token: SecretString,
    },
    GitHubApp {
        app_id: i64,
        installation_id: i64,
        private_key: SecretString,
        api_base_url: Option<String>,
    },
}

impl Credential {
    /// Short label for logs; never includes secret material.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::None => "none",
            Credential::SshKey { .. } => "ssh-key",
            Credential::Token { .. } => "token",
            Credential::GitHubApp { .. } => "github-app",
        }
    }
}

/// Transport-ready credential.
#[derive(Debug)]
pub enum GitCredential {
    Anonymous,
    SshKey { private_key: SecretString },
    Basic { username: String, password: SecretString },
}

impl GitCredential {
    pub fn basic_token(token: SecretString) -> Self {
        GitCredential::Basic {
            username: TOKEN_USERNAME.to_string(),
            password: token,
        }
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        match self {
            Credential::None => Credential::None,
            Credential::SshKey { private_key } => Credential::SshKey {
                private_key: dup(private_key),
            },
            Credential::Token { token } => Credential::Token { token: dup(token) },
            Credential::GitHubApp {
                app_id,
                installation_id,
                private_key,
                api_base_url,
            } => Credential::GitHubApp {
                app_id: *app_id,
                installation_id: *installation_id,
                private_key: dup(private_key),
                api_base_url: api_base_url.clone(),
            },
        }
    }
}

impl Clone for GitCredential {
    fn clone(&self) -> Self {
        match self {
            GitCredential::Anonymous => GitCredential::Anonymous,
            GitCredential::SshKey { private_key } => GitCredential::SshKey {
                private_key: dup(private_key),
            },
            GitCredential::Basic { username, password } => GitCredential::Basic {
                username: username.clone(),
                password: dup(password),
            },
        }
    }
}

fn dup(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

impl fmt::Display for GitCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitCredential::Anonymous => write!(f, "anonymous"),
            GitCredential::SshKey { .. } => write!(f, "ssh-key"),
            GitCredential::Basic { username, .. } => write!(f, "basic({username})"),
        }
    }
}

/// A git credential plus its expiry, when it has one.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub credential: GitCredential,
    /// Set only for minted GitHub App installation tokens.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ResolvedCredential {
    pub fn permanent(credential: GitCredential) -> Self {
        Self {
            credential,
            expires_at: None,
        }
    }

    /// True when the credential expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|at| at - now <= margin)
    }
}
