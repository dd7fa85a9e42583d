//! Building outgoing requests and decoding what comes back
use std::time::Duration;

use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Body, Client, Method, Request, Response, Url};
use serde_json::Value;

use crate::error::{Result, ViewingError};

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";
pub(crate) const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// Settings for the HTTP transport shared by every request a client makes
///
/// One transport is built per [`ViewingClient`] rather than shared process-wide,
/// so two clients can be configured independently.
///
/// [`ViewingClient`]: crate::client::ViewingClient
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// How long to wait for a TCP connection to be established
    pub connect_timeout: Duration,
    /// How long the TLS handshake may take once connected
    pub tls_handshake_timeout: Duration,
    /// Interval for TCP keep-alive probes on idle connections
    pub tcp_keepalive: Duration,
    /// Ask the server for compressed responses
    pub compression: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            tls_handshake_timeout: Duration::from_secs(10),
            tcp_keepalive: Duration::from_secs(30),
            compression: false,
        }
    }
}

impl TransportConfig {
    /// Builds the HTTP client described by this configuration
    ///
    /// reqwest has no separate handshake timer, its connect timeout covers the
    /// TLS handshake as well, so the two budgets are added together.
    pub fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .connect_timeout(self.connect_timeout + self.tls_handshake_timeout)
            .tcp_keepalive(self.tcp_keepalive)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ));
        if !self.compression {
            builder = builder.no_gzip().no_brotli().no_deflate();
        }
        builder
            .build()
            .map_err(|err| ViewingError::Configuration(format!("unable to build http client: {err}")))
    }
}

/// Creates a request for `url`
///
/// The bearer token is only attached when `token` is non-empty and the content
/// type only when `content_type` is non-empty.  The only input that can make
/// this fail is a malformed `url`.
pub fn build_request(
    http: &Client,
    method: Method,
    url: &str,
    body: Option<Body>,
    token: &str,
    content_type: &str,
) -> Result<Request> {
    let url = Url::parse(url).map_err(|err| ViewingError::InvalidUrl(format!("{url}: {err}")))?;

    let mut request = http.request(method, url);
    if !token.is_empty() {
        request = request.bearer_auth(token);
    }
    if !content_type.is_empty() {
        request = request.header(CONTENT_TYPE, content_type);
    }
    if let Some(body) = body {
        request = request.body(body);
    }
    Ok(request.build()?)
}

/// Sends `request` and hands back the raw outcome for one of the decoders
pub(crate) async fn dispatch(http: &Client, request: Request) -> reqwest::Result<Response> {
    http.execute(request).await
}

/// Turns an error status into a [`ViewingError::Remote`]
///
/// Responses below 400 are returned unchanged.
async fn check_response(outcome: reqwest::Result<Response>) -> Result<Response> {
    let response = outcome?;
    let status = response.status();
    if status.as_u16() < 400 {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    // Prefer the compact JSON rendering when the service sent a JSON error body
    let diagnostic = match serde_json::from_str::<Value>(&text) {
        Ok(value) => value.to_string(),
        Err(_) => text,
    };
    Err(ViewingError::remote(status, &diagnostic))
}

/// Decodes a response that is expected to carry a JSON document
pub async fn decode_json(outcome: reqwest::Result<Response>) -> Result<Value> {
    let response = check_response(outcome).await?;
    let body = response.bytes().await?;
    serde_json::from_slice::<Value>(&body).map_err(|err| {
        ViewingError::Decode(format!(
            "expected a JSON document ({} bytes received): {err}",
            body.len()
        ))
    })
}

/// Decodes a response that is expected to carry a binary artifact
///
/// The body is not read; it is handed to the caller still streaming.
pub async fn decode_binary(outcome: reqwest::Result<Response>) -> Result<BinaryResponse> {
    let response = check_response(outcome).await?;
    Ok(BinaryResponse { response })
}

/// Decodes a response whose body carries nothing of interest
pub async fn decode_empty(outcome: reqwest::Result<Response>) -> Result<()> {
    check_response(outcome).await?;
    Ok(())
}

/// A successful response whose body has not been read yet
///
/// The underlying connection is held until the body has been read to the end
/// or this value is dropped.
#[derive(Debug)]
pub struct BinaryResponse {
    response: Response,
}

impl BinaryResponse {
    pub fn status(&self) -> reqwest::StatusCode {
        self.response.status()
    }

    /// The content type reported by the service, if any
    pub fn content_type(&self) -> Option<&str> {
        self.response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// The size of the body, if the service reported it
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Reads the next chunk of the body, `None` once the body is exhausted
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.response.chunk().await?)
    }

    /// Reads the remainder of the body into memory
    pub async fn bytes(self) -> Result<Bytes> {
        Ok(self.response.bytes().await?)
    }

    /// Gives up the wrapper and returns the live response
    pub fn into_inner(self) -> Response {
        self.response
    }
}
