//! Outbound requests and successful responses

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::classify::{Outcome, classify, classify_rejection};
use crate::envelope::Envelope;
use crate::error::Result;

/// A single backend call, built by the caller and consumed by the pipeline.
///
/// `path` is relative to the client's base URL and may carry a query string.
/// `retried` is set by the pipeline, once, when the call is replayed after a
/// credential refresh.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    bypass_maintenance: bool,
    pub(crate) retried: bool,
    encode_error: Option<String>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            method,
            path,
            headers: HeaderMap::new(),
            body: None,
            bypass_maintenance: false,
            retried: false,
            encode_error: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Serialize `value` as the JSON body.
    ///
    /// Encoding failures surface as an `Unknown` error when the request is
    /// sent, before any network I/O.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                self.body = Some(Bytes::from(bytes));
            }
            Err(e) => self.encode_error = Some(format!("encoding request body: {e}")),
        }
        self
    }

    /// Raw body with an optional content type.
    pub fn body(mut self, body: impl Into<Bytes>, content_type: Option<HeaderValue>) -> Self {
        if let Some(content_type) = content_type {
            self.headers.insert(CONTENT_TYPE, content_type);
        }
        self.body = Some(body.into());
        self
    }

    /// Append url-encoded query pairs to the path.
    pub fn query<K, V>(mut self, pairs: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        // Parsed against a throwaway origin only to reuse the url encoder
        let mut url = match Url::parse(&format!("http://query.invalid{}", self.path)) {
            Ok(url) => url,
            Err(e) => {
                self.encode_error = Some(format!("encoding query: {e}"));
                return self;
            }
        };
        url.query_pairs_mut()
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())));
        self.path = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        self
    }

    /// Add a header, keeping earlier values of the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Dispatch even while the maintenance gate is active (refresh exchange,
    /// health probes).
    pub fn bypass_maintenance(mut self) -> Self {
        self.bypass_maintenance = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path without its query string.
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn bypasses_maintenance(&self) -> bool {
        self.bypass_maintenance
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn encode_error(&self) -> Option<&str> {
        self.encode_error.as_deref()
    }
}

/// A successful (2xx, not rejected) backend response, returned unmodified.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }

    /// Decode the body as arbitrary JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| self.malformed(e))
    }

    /// Decode the body as an envelope.
    pub fn envelope<T: DeserializeOwned>(&self) -> Result<Envelope<T>> {
        self.json()
    }

    /// Decode the envelope and return its `data`.
    ///
    /// `success=false` is classified like any rejection; a successful
    /// envelope without `data` is malformed.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        let envelope: Envelope<T> = self.envelope()?;
        if !envelope.success {
            return Err(classify_rejection(
                self.status.as_u16(),
                envelope.message.as_deref(),
            ));
        }
        envelope.data.ok_or_else(|| {
            classify(&Outcome::Malformed {
                status: Some(self.status.as_u16()),
                message: "envelope has no data",
            })
        })
    }

    fn malformed(&self, e: serde_json::Error) -> crate::error::ClassifiedError {
        classify(&Outcome::Malformed {
            status: Some(self.status.as_u16()),
            message: &format!("decoding response body: {e}"),
        })
    }
}
