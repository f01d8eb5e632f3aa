//! Per-user read ACLs on storage objects.
//!
//! Two clients share the token provider:
//! - [`AclClient`] issues the raw REST calls (grant with POST, revoke with
//!   DELETE) and retries once on transient failures;
//! - [`StorageApiClient`] is the typed `objectAccessControls` client.

use crate::{
    models::acl::{AclAction, ObjectAccessControl, user_entity},
    services::access_token::{AccessTokenProvider, SCOPE_FULL_CONTROL, TokenError},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{
    Method, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use std::sync::Arc;
use thiserror::Error;

/// Unreserved characters stay as they are in a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Token fetch plus HTTP call, at most this many times.
const MAX_ATTEMPTS: usize = 2;

#[derive(Debug, Error)]
pub enum AclError {
    #[error("access token: {0}")]
    Token(#[from] TokenError),
    #[error("storage API returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("storage API request failed: {0}")]
    Http(#[from] reqwest::Error),
}

enum Attempt {
    Transient(String),
    Fatal(AclError),
}

/// `<api>/b/<bucket>/o/<object>/acl`
fn acl_url(api_url: &str, bucket: &str, object: &str) -> String {
    format!(
        "{}/b/{}/o/{}/acl",
        api_url.trim_end_matches('/'),
        utf8_percent_encode(bucket, SEGMENT),
        utf8_percent_encode(object, SEGMENT)
    )
}

/// `<api>/b/<bucket>/o/<object>/acl/user-<email>`
fn acl_entry_url(api_url: &str, bucket: &str, object: &str, e_mail: &str) -> String {
    format!(
        "{}/{}",
        acl_url(api_url, bucket, object),
        utf8_percent_encode(&user_entity(e_mail), SEGMENT)
    )
}

/// Status the service answers with when `action` succeeded.
fn success_status(action: AclAction) -> StatusCode {
    match action {
        AclAction::Grant => StatusCode::OK,
        AclAction::Revoke => StatusCode::NO_CONTENT,
    }
}

/// Whether `status` deserves an error log.
pub fn is_unexpected_status(action: AclAction, status: StatusCode, allow_404: bool) -> bool {
    if status == success_status(action) {
        return false;
    }
    !(action == AclAction::Revoke && status == StatusCode::NOT_FOUND && allow_404)
}

#[derive(Clone)]
pub struct AclClient {
    client: reqwest::Client,
    tokens: Arc<dyn AccessTokenProvider>,
    api_url: String,
    bucket: String,
}

impl AclClient {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn AccessTokenProvider>,
        api_url: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            api_url: api_url.into(),
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Grant `e_mail` read access to `object`. `Some(200)` on success.
    pub async fn insert_user_acl(
        &self,
        object: &str,
        e_mail: &str,
    ) -> Result<Option<StatusCode>, AclError> {
        self.apply_acl(object, e_mail, AclAction::Grant, false).await
    }

    /// Revoke read access of `e_mail` on `object`. `Some(204)` on success.
    pub async fn delete_user_acl(
        &self,
        object: &str,
        e_mail: &str,
        allow_404: bool,
    ) -> Result<Option<StatusCode>, AclError> {
        self.apply_acl(object, e_mail, AclAction::Revoke, allow_404)
            .await
    }

    /// Apply `action` and return the remote status.
    ///
    /// `Ok(None)` means both attempts failed before a status was received.
    /// Unexpected statuses are logged and returned as they are; a missing
    /// entry on revoke is expected when `allow_404` is set.
    pub async fn apply_acl(
        &self,
        object: &str,
        e_mail: &str,
        action: AclAction,
        allow_404: bool,
    ) -> Result<Option<StatusCode>, AclError> {
        let status = self.fetch_with_retry(object, e_mail, action).await?;
        if let Some(status) = status {
            if is_unexpected_status(action, status, allow_404) {
                tracing::error!(
                    ?action,
                    "acl update for {} : {} response : {}",
                    object,
                    e_mail,
                    status.as_u16()
                );
            }
        }
        Ok(status)
    }

    async fn fetch_with_retry(
        &self,
        object: &str,
        e_mail: &str,
        action: AclAction,
    ) -> Result<Option<StatusCode>, AclError> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch_once(object, e_mail, action).await {
                Ok(status) => return Ok(Some(status)),
                Err(Attempt::Transient(reason)) => {
                    tracing::warn!("download or deadline retry {} : {}", attempt, reason);
                }
                Err(Attempt::Fatal(err)) => return Err(err),
            }
        }
        Ok(None)
    }

    async fn fetch_once(
        &self,
        object: &str,
        e_mail: &str,
        action: AclAction,
    ) -> Result<StatusCode, Attempt> {
        let token = self
            .tokens
            .access_token(SCOPE_FULL_CONTROL)
            .await
            .map_err(|err| {
                if err.is_transient() {
                    Attempt::Transient(err.to_string())
                } else {
                    Attempt::Fatal(err.into())
                }
            })?;

        let (method, url) = match action {
            AclAction::Grant => (Method::POST, acl_url(&self.api_url, &self.bucket, object)),
            AclAction::Revoke => (
                Method::DELETE,
                acl_entry_url(&self.api_url, &self.bucket, object, e_mail),
            ),
        };

        let mut request = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, format!("OAuth {}", token.token))
            .header(CONTENT_TYPE, "application/json");
        if action == AclAction::Grant {
            request = request.json(&ObjectAccessControl::user_reader(e_mail));
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if status == success_status(action) {
            tracing::info!("{}", body);
        } else {
            tracing::warn!("acl_fetch response : {} content: {}", status.as_u16(), body);
        }
        Ok(status)
    }
}

fn classify(err: reqwest::Error) -> Attempt {
    if err.is_builder() {
        Attempt::Fatal(err.into())
    } else {
        Attempt::Transient(err.to_string())
    }
}

/// Typed client for the `objectAccessControls` resource.
#[derive(Clone)]
pub struct StorageApiClient {
    client: reqwest::Client,
    tokens: Arc<dyn AccessTokenProvider>,
    api_url: String,
}

impl StorageApiClient {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn AccessTokenProvider>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            api_url: api_url.into(),
        }
    }

    /// `objectAccessControls.insert`: add `body` to the ACL of `object`.
    pub async fn insert_object_access_control(
        &self,
        bucket: &str,
        object: &str,
        body: &ObjectAccessControl,
    ) -> Result<ObjectAccessControl, AclError> {
        let token = self.tokens.access_token(SCOPE_FULL_CONTROL).await?;
        let response = self
            .client
            .post(acl_url(&self.api_url, bucket, object))
            .bearer_auth(&token.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AclError::Api { status, body });
        }
        Ok(response.json::<ObjectAccessControl>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::access_token::{AccessToken, StaticTokenProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call with the given error kind and counts calls.
    struct FailingTokens {
        transient: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AccessTokenProvider for FailingTokens {
        async fn access_token(&self, _scope: &str) -> Result<AccessToken, TokenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.transient {
                Err(TokenError::Deadline)
            } else {
                Err(TokenError::Rejected(StatusCode::FORBIDDEN))
            }
        }
    }

    fn client(tokens: Arc<dyn AccessTokenProvider>, api_url: &str) -> AclClient {
        AclClient::new(reqwest::Client::new(), tokens, api_url, "bucket")
    }

    #[test]
    fn urls_encode_segments() {
        assert_eq!(
            acl_url("https://api.example/storage/v1/", "bucket", "dir/codes.csv"),
            "https://api.example/storage/v1/b/bucket/o/dir%2Fcodes.csv/acl"
        );
        assert_eq!(
            acl_entry_url("https://api.example", "bucket", "codes.csv", "a.b@c.com"),
            "https://api.example/b/bucket/o/codes.csv/acl/user-a.b%40c.com"
        );
    }

    #[test]
    fn status_expectations() {
        use AclAction::*;
        assert!(!is_unexpected_status(Grant, StatusCode::OK, false));
        assert!(is_unexpected_status(Grant, StatusCode::BAD_REQUEST, false));
        assert!(!is_unexpected_status(Revoke, StatusCode::NO_CONTENT, false));
        assert!(is_unexpected_status(Revoke, StatusCode::NOT_FOUND, false));
        assert!(!is_unexpected_status(Revoke, StatusCode::NOT_FOUND, true));
        assert!(is_unexpected_status(Revoke, StatusCode::BAD_REQUEST, true));
        assert!(is_unexpected_status(Grant, StatusCode::NOT_FOUND, true));
    }

    #[tokio::test]
    async fn transient_token_failures_are_retried_once() {
        let tokens = Arc::new(FailingTokens {
            transient: true,
            calls: AtomicUsize::new(0),
        });
        let acl = client(tokens.clone(), "http://127.0.0.1:9");
        let status = acl.insert_user_acl("codes.csv", "a@b.com").await.unwrap();
        assert_eq!(status, None);
        assert_eq!(tokens.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn unreachable_api_is_retried_then_gives_up() {
        let tokens = Arc::new(StaticTokenProvider::new("token"));
        let acl = client(tokens, "http://127.0.0.1:9");
        let granted = acl.insert_user_acl("codes.csv", "a@b.com").await.unwrap();
        let revoked = acl.delete_user_acl("codes.csv", "a@b.com", true).await.unwrap();
        assert_eq!(granted, None);
        assert_eq!(revoked, None);
    }

    #[tokio::test]
    async fn fatal_token_failures_are_not_retried() {
        let tokens = Arc::new(FailingTokens {
            transient: false,
            calls: AtomicUsize::new(0),
        });
        let acl = client(tokens.clone(), "http://127.0.0.1:9");
        let err = acl
            .delete_user_acl("codes.csv", "a@b.com", true)
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::Token(TokenError::Rejected(_))));
        assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
    }
}
