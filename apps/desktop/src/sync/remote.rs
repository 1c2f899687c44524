//! Remote copy of the scheduler state.
//!
//! `RemoteStore` is the port the sync manager pushes to and loads from.
//! `HttpRemote` talks to the backend; `NullRemote` is used when no backend
//! is configured and the client runs local-only.

use async_trait::async_trait;
use helix_core::StatePayload;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use thiserror::Error;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Worth retrying: connection trouble, timeouts, throttling, server errors.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("remote rejected request ({status:?}): {message}")]
    Permanent { status: Option<u16>, message: String },
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Map an unsuccessful HTTP status.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {body}")
        };
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            Self::Transient(message)
        } else {
            Self::Permanent {
                status: Some(status.as_u16()),
                message,
            }
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Permanent {
                status: None,
                message: format!("invalid response body: {e}"),
            }
        } else {
            Self::Transient(e.to_string())
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Replace the remote copy for `payload.user_id`.
    async fn push(&self, payload: &StatePayload) -> Result<(), RemoteError>;

    /// Fetch the remote copy, if one exists.
    async fn fetch(&self, user_id: &str) -> Result<Option<StatePayload>, RemoteError>;
}

/// Remote that accepts every push and never has a copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRemote;

#[async_trait]
impl RemoteStore for NullRemote {
    async fn push(&self, _payload: &StatePayload) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn fetch(&self, _user_id: &str) -> Result<Option<StatePayload>, RemoteError> {
        Ok(None)
    }
}

/// Backend over HTTP: `PUT`/`GET {base}/api/helix/state/{userId}`.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// `{base}/api/helix/state/{user_id}`, with the id percent-encoded as
    /// a single path segment.
    fn state_url(&self, user_id: &str) -> Result<Url, RemoteError> {
        let invalid = |reason: &str| RemoteError::Permanent {
            status: None,
            message: format!("base url {} {reason}", self.base_url),
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(&e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot take a path"))?
            .pop_if_empty()
            .extend(["api", "helix", "state", user_id]);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn push(&self, payload: &StatePayload) -> Result<(), RemoteError> {
        let url = self.state_url(&payload.user_id)?;
        let resp = self
            .authorize(self.client.put(url))
            .json(payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status, &body));
        }
        Ok(())
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<StatePayload>, RemoteError> {
        let url = self.state_url(user_id)?;
        let resp = self.authorize(self.client.get(url)).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.json().await?)),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(RemoteError::from_status(status, &body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_are_transient() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(RemoteError::from_status(status, "").is_transient(), "{status}");
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::CONFLICT,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            let err = RemoteError::from_status(status, "nope");
            assert_eq!(
                err,
                RemoteError::Permanent {
                    status: Some(status.as_u16()),
                    message: format!("{status}: nope"),
                }
            );
        }
    }

    #[test]
    fn state_url_strips_trailing_slash() {
        let remote = HttpRemote::new("http://localhost:3000/", None);
        assert_eq!(
            remote.state_url("user-1").unwrap().as_str(),
            "http://localhost:3000/api/helix/state/user-1"
        );
    }

    #[test]
    fn state_url_encodes_user_id_as_one_segment() {
        let remote = HttpRemote::new("http://localhost:3000/sync", None);
        assert_eq!(
            remote.state_url("a/b?c#d").unwrap().as_str(),
            "http://localhost:3000/sync/api/helix/state/a%2Fb%3Fc%23d"
        );
    }

    #[test]
    fn unusable_base_url_is_permanent() {
        let remote = HttpRemote::new("not a url", None);
        assert!(matches!(
            remote.state_url("user-1"),
            Err(RemoteError::Permanent { status: None, .. })
        ));
    }
}
