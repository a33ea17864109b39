//! Slack web API client.
//!
//! Every method is a form POST to `{base}/{method}` answered by a JSON
//! envelope with an `ok` flag. HTTP status and envelope errors are folded
//! into [`BackendError`] here so callers only ever see one taxonomy.

use super::types::{Envelope, SlackFile};
use crate::config::Credentials;
use crate::error::BackendError;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, COOKIE, HeaderValue, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode, multipart};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Envelope `error` values meaning the credentials are no good.
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

pub struct SlackApi {
    http: reqwest::Client,
    base_url: String,
    credentials: RwLock<Option<Credentials>>,
}

impl SlackApi {
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("slackirc/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: RwLock::new(None),
        })
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.write() = Some(credentials);
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Attach the bearer token and, for browser tokens, the `d` cookie.
    fn authorize(&self, req: RequestBuilder) -> Result<RequestBuilder, BackendError> {
        let guard = self.credentials.read();
        let creds = guard
            .as_ref()
            .ok_or_else(|| BackendError::Auth("not connected".into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", creds.token.expose()))
            .map_err(|_| BackendError::Auth("token is not a valid header value".into()))?;
        let mut req = req.header(AUTHORIZATION, bearer);
        if let Some(cookie) = creds.cookie.as_ref().filter(|c| !c.is_empty()) {
            let raw = cookie.expose();
            let value = if raw.starts_with("d=") {
                raw.to_string()
            } else {
                format!("d={raw}")
            };
            let value = HeaderValue::from_str(&value)
                .map_err(|_| BackendError::Auth("cookie is not a valid header value".into()))?;
            req = req.header(COOKIE, value);
        }
        Ok(req)
    }

    /// Map HTTP-level failures, returning the body of a successful response.
    async fn check_status(resp: Response) -> Result<Bytes, BackendError> {
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(BackendError::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Auth(status.to_string()));
        }
        if status.is_server_error() {
            return Err(BackendError::Network(status.to_string()));
        }
        if !status.is_success() {
            return Err(BackendError::Remote(status.to_string()));
        }
        Ok(resp.bytes().await?)
    }

    /// Decode a JSON envelope, mapping `ok: false`.
    fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<(T, Option<String>), BackendError> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        if !envelope.ok {
            let error = envelope.error.unwrap_or_else(|| "unknown_error".into());
            return Err(match error.as_str() {
                e if AUTH_ERRORS.contains(&e) => BackendError::Auth(error),
                "ratelimited" => BackendError::RateLimited {
                    retry_after: DEFAULT_RETRY_AFTER,
                },
                _ => BackendError::Remote(error),
            });
        }
        let cursor = envelope.next_cursor().map(str::to_string);
        Ok((serde_json::from_slice(body)?, cursor))
    }

    /// Call `method`, returning the decoded payload and the next page cursor.
    #[instrument(skip(self, params), level = "debug")]
    pub async fn call_page<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<(T, Option<String>), BackendError> {
        let req = self.authorize(self.http.post(self.method_url(method)).form(params))?;
        let body = Self::check_status(req.send().await?).await?;
        debug!(bytes = body.len(), "api response");
        Self::decode(&body)
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, BackendError> {
        Ok(self.call_page(method, params).await?.0)
    }

    /// Call a method whose answer carries nothing but `ok`.
    pub async fn call_ok(&self, method: &str, params: &[(&str, String)]) -> Result<(), BackendError> {
        self.call::<serde::de::IgnoredAny>(method, params).await.map(|_| ())
    }

    /// `files.upload` as multipart.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload(
        &self,
        channel: &str,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<SlackFile, BackendError> {
        #[derive(serde::Deserialize)]
        struct Uploaded {
            file: SlackFile,
        }

        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new()
            .text("channels", channel.to_string())
            .text("filename", filename.to_string())
            .part("file", part);
        let req = self.authorize(self.http.post(self.method_url("files.upload")).multipart(form))?;
        let body = Self::check_status(req.send().await?).await?;
        let (uploaded, _): (Uploaded, _) = Self::decode(&body)?;
        Ok(uploaded.file)
    }

    /// Authenticated GET of a private file URL.
    #[instrument(skip(self))]
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        let req = self.authorize(self.http.get(url))?;
        let body = Self::check_status(req.send().await?).await?;
        Ok(body.to_vec())
    }
}
