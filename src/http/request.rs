//! Outbound request construction.
//!
//! # Responsibilities
//! - Describe a downstream request (method, path, JSON body, authorization)
//! - Send one attempt with the attempt's trace headers attached
//! - Hand the fully read reply back for classification
//!
//! # Design Decisions
//! - The request is built once and re-sent per attempt
//! - Authorization is forwarded verbatim and marked sensitive
//! - The whole body is read inside the attempt so the deadline covers it
//! - Bodies over the dependency's size limit are refused, not buffered

use http::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use serde::Serialize;
use url::Url;

use crate::call::classify::{HttpReply, RawOutcome};
use crate::call::executor::Attempt;
use crate::call::outcome::TransportError;

/// A request to a downstream service, relative to its base URL.
#[derive(Debug, Clone)]
pub struct DownstreamRequest {
    method: Method,
    path: String,
    body: Option<Vec<u8>>,
    authorization: Option<HeaderValue>,
}

impl DownstreamRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authorization: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }

    /// Attach a raw JSON body.
    pub fn raw_json(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Forward an `Authorization` value verbatim, byte for byte. Empty tokens are skipped.
    pub fn authorization(mut self, token: impl AsRef<[u8]>) -> Result<Self, InvalidHeaderValue> {
        let token = token.as_ref();
        if token.is_empty() {
            return Ok(self);
        }
        let mut value = HeaderValue::from_bytes(token)?;
        value.set_sensitive(true);
        self.authorization = Some(value);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Absolute URL of this request against `base`.
    pub fn url(&self, base: &Url) -> Result<Url, url::ParseError> {
        base.join(&self.path)
    }

    /// Send one attempt and read the whole reply, up to `max_body` bytes.
    pub async fn send(
        &self,
        client: &reqwest::Client,
        base: &Url,
        attempt: &Attempt,
        max_body: usize,
    ) -> RawOutcome {
        let url = self
            .url(base)
            .map_err(|e| TransportError::Other(format!("invalid url: {}", e)))?;

        let mut builder = client
            .request(self.method.clone(), url)
            .headers(attempt.headers.clone());
        if let Some(token) = &self.authorization {
            builder = builder.header(AUTHORIZATION, token.clone());
        }
        if let Some(body) = &self.body {
            builder = builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body.clone());
        }

        tracing::debug!(
            method = %self.method,
            path = %self.path,
            attempt = attempt.number,
            "Sending downstream request"
        );

        let mut response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if response.content_length().is_some_and(|len| len > max_body as u64) {
            return Err(TransportError::BodyTooLarge { limit: max_body });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > max_body {
                return Err(TransportError::BodyTooLarge { limit: max_body });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpReply { status, headers, body })
    }
}
