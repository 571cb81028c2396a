use crate::{
    entity::UserId,
    error::{ChatError, Result},
};
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Resolves a presented credential to a marketplace identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<UserId>;
}

/// Accepts the credential itself as the user id, without verification.
///
/// Mirrors clients that pass their user id as the socket credential. Anyone
/// can claim any identity, so this is only for development and trusted
/// networks.
#[derive(Debug, Default, Clone)]
pub struct BareIdentity;

#[async_trait]
impl IdentityProvider for BareIdentity {
    async fn verify_token(&self, token: &str) -> Result<UserId> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ChatError::Auth("No token provided".into()));
        }
        Ok(UserId::new(token))
    }
}

/// Verifies access tokens against a Supabase auth endpoint.
#[derive(Debug, Clone)]
pub struct SupabaseIdentity {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
}

impl SupabaseIdentity {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn verify_token(&self, token: &str) -> Result<UserId> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ChatError::Auth("No token provided".into()));
        }

        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            debug!("Identity provider rejected token ({})", status);
            return Err(ChatError::Auth("Invalid token".into()));
        }
        if !status.is_success() {
            warn!("Identity provider returned {}", status);
            return Err(ChatError::Internal(format!(
                "identity provider returned {}",
                status
            )));
        }

        let user: SupabaseUser = response.json().await?;
        if user.id.is_empty() {
            return Err(ChatError::Auth("Invalid token".into()));
        }
        Ok(UserId::new(user.id))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}
