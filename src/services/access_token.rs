//! OAuth access tokens for calls to the storage API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Full control over objects and their ACLs.
pub const SCOPE_FULL_CONTROL: &str = "https://www.googleapis.com/auth/devstorage.full_control";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token request deadline exceeded")]
    Deadline,
    #[error("token service unavailable: {0}")]
    Unavailable(String),
    #[error("token request rejected with status {0}")]
    Rejected(StatusCode),
    #[error("malformed token response: {0}")]
    Malformed(String),
}

impl TokenError {
    /// Worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, TokenError::Deadline | TokenError::Unavailable(_))
    }
}

/// A short-lived bearer credential. Used for one request, never stored.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: Option<u64>,
}

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self, scope: &str) -> Result<AccessToken, TokenError>;
}

/// Hands out a fixed token. For development and tests.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self, _scope: &str) -> Result<AccessToken, TokenError> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_in: None,
        })
    }
}

/// Fetches tokens for the instance's service account from the metadata
/// server.
pub struct MetadataServerTokenProvider {
    client: reqwest::Client,
    token_url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl MetadataServerTokenProvider {
    pub fn new(client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
        }
    }
}

fn classify(err: reqwest::Error) -> TokenError {
    if err.is_timeout() {
        TokenError::Deadline
    } else if err.is_decode() {
        TokenError::Malformed(err.to_string())
    } else {
        TokenError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl AccessTokenProvider for MetadataServerTokenProvider {
    async fn access_token(&self, scope: &str) -> Result<AccessToken, TokenError> {
        let response = self
            .client
            .get(&self.token_url)
            .query(&[("scopes", scope)])
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TokenError::Unavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(TokenError::Rejected(status));
        }

        let body: TokenResponse = response.json().await.map_err(classify)?;
        if body.access_token.is_empty() {
            return Err(TokenError::Malformed("empty access_token".into()));
        }
        Ok(AccessToken {
            token: body.access_token,
            expires_in: body.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::Query, http::HeaderMap, routing::get};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    async fn token_endpoint(
        headers: HeaderMap,
        Query(q): Query<HashMap<String, String>>,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        if headers.get("Metadata-Flavor").and_then(|v| v.to_str().ok()) != Some("Google") {
            return Err(StatusCode::FORBIDDEN);
        }
        if q.get("scopes").map(String::as_str) != Some(SCOPE_FULL_CONTROL) {
            return Err(StatusCode::BAD_REQUEST);
        }
        Ok(Json(serde_json::json!({
            "access_token": "ya29.token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn metadata_server_token() {
        let base = serve(Router::new().route("/token", get(token_endpoint))).await;
        let provider =
            MetadataServerTokenProvider::new(reqwest::Client::new(), format!("{}/token", base));
        let token = provider.access_token(SCOPE_FULL_CONTROL).await.unwrap();
        assert_eq!(token.token, "ya29.token");
        assert_eq!(token.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn rejected_and_unavailable_are_classified() {
        let base = serve(
            Router::new()
                .route("/forbidden", get(|| async { StatusCode::FORBIDDEN }))
                .route("/busy", get(|| async { StatusCode::SERVICE_UNAVAILABLE })),
        )
        .await;
        let client = reqwest::Client::new();

        let err = MetadataServerTokenProvider::new(client.clone(), format!("{}/forbidden", base))
            .access_token(SCOPE_FULL_CONTROL)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Rejected(StatusCode::FORBIDDEN)));
        assert!(!err.is_transient());

        let err = MetadataServerTokenProvider::new(client, format!("{}/busy", base))
            .access_token(SCOPE_FULL_CONTROL)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
