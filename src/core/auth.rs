//! Authentication for incoming connections
//!
//! The transport itself never interprets credentials. It collects the headers
//! a client presented (handshake headers merged with the `connection_init`
//! payload) and hands them to an [`Authenticator`], which resolves them to a
//! [`UserInfo`] and an optional token expiry. The expiry, when present, drives
//! the scheduled disconnect task.

use crate::core::error::AuthError;
use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Session variables resolved for a user, keyed by variable name
///
/// Ordered so that cache keys built from a projection of these variables are
/// stable across requests.
pub type SessionVariables = BTreeMap<String, String>;

/// The resolved identity of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Role the request is executed with
    pub role: String,
    /// Session variables available to plan steps
    pub session: SessionVariables,
}

impl UserInfo {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            session: SessionVariables::new(),
        }
    }

    pub fn with_session_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.session.insert(key.into(), value.into());
        self
    }

    /// Project the session down to the named variables
    ///
    /// Used to build cache keys: only the variables a plan declares it uses
    /// participate, so two users differing in irrelevant variables share
    /// cached results.
    pub fn project_session(&self, used: &[String]) -> SessionVariables {
        self.session
            .iter()
            .filter(|(k, _)| used.iter().any(|u| u == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Outcome of a successful authentication
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: UserInfo,
    /// When set, the connection is force-closed at this instant
    pub token_expiry: Option<DateTime<Utc>>,
}

/// Resolves request headers to a user identity
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Result<AuthOutcome, AuthError>;
}

/// Authenticator that admits everyone with a fixed role (for development)
pub struct OpenAuthenticator {
    role: String,
}

impl OpenAuthenticator {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

#[async_trait]
impl Authenticator for OpenAuthenticator {
    async fn resolve(&self, _headers: &HeaderMap) -> Result<AuthOutcome, AuthError> {
        Ok(AuthOutcome {
            user: UserInfo::new(self.role.clone()),
            token_expiry: None,
        })
    }
}

/// Authenticator gated on a shared admin secret header
///
/// Requests carrying the correct `x-gateway-admin-secret` resolve to the
/// admin role; anything else is rejected.
pub struct AdminSecretAuthenticator {
    secret: String,
}

impl AdminSecretAuthenticator {
    pub const SECRET_HEADER: &'static str = "x-gateway-admin-secret";

    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl Authenticator for AdminSecretAuthenticator {
    async fn resolve(&self, headers: &HeaderMap) -> Result<AuthOutcome, AuthError> {
        let presented = headers
            .get(Self::SECRET_HEADER)
            .and_then(|v| v.to_str().ok());

        match presented {
            Some(value) if value == self.secret => Ok(AuthOutcome {
                user: UserInfo::new("admin")
                    .with_session_var("x-gateway-role", "admin"),
                token_expiry: None,
            }),
            Some(_) => Err(AuthError::new("invalid admin secret")),
            None => Err(AuthError::new(format!(
                "missing {} header",
                Self::SECRET_HEADER
            ))),
        }
    }
}
