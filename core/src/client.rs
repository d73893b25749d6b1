//! The request pipeline.
//!
//! # Design
//! A call is split the same way on every path: `build_request` turns a
//! `RequestDescriptor` into an `HttpRequest` (URL assembly, validation,
//! query and body encoding, pre-send hook), the transport performs exactly
//! one round trip, and `parse_response` applies the status policy and
//! decodes into the caller's target. The two halves never touch the
//! network, so they are tested directly with plain values.
//!
//! `Client` holds no per-call state and can be shared across tasks.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};
use url::Url;

use crate::config::{BeforeSend, BodyEncoding, ClientConfig, OnErrorResponse};
use crate::decode::{strip_bom, Decoder};
use crate::encode::{encode_pairs, Payload};
use crate::error::{Error, ResponseError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{ReqwestTransport, Transport};
use crate::validate::Validator;

/// Everything needed to build one request.
#[derive(Clone, Copy)]
pub struct RequestDescriptor<'a> {
    pub base: &'a str,
    pub path: &'a str,
    pub method: HttpMethod,
    pub query: Option<&'a dyn Payload>,
    pub body: Option<&'a dyn Payload>,
    pub timeout: Option<Duration>,
}

impl<'a> RequestDescriptor<'a> {
    pub fn new(method: HttpMethod, base: &'a str, path: &'a str) -> Self {
        Self {
            base,
            path,
            method,
            query: None,
            body: None,
            timeout: None,
        }
    }

    pub fn query(mut self, query: &'a dyn Payload) -> Self {
        self.query = Some(query);
        self
    }

    pub fn body(mut self, body: &'a dyn Payload) -> Self {
        self.body = Some(body);
        self
    }

    /// Deadline for this call only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Validating, encoding and decoding HTTP client.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    validator: Validator,
    skip_validation: bool,
    body_encoding: BodyEncoding,
    strip_bom: bool,
    before_send: Option<BeforeSend>,
    on_error_response: Option<OnErrorResponse>,
}

impl Client {
    /// Build a client with a `reqwest` transport configured from `config`.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let transport = ReqwestTransport::from_config(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a client that sends through `transport`. TLS and timeout
    /// settings in `config` are ignored; they belong to the transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            validator: Validator::new(config.raw_validator_errors),
            skip_validation: config.skip_validation,
            body_encoding: config.body_encoding,
            strip_bom: config.strip_bom,
            before_send: config.before_send,
            on_error_response: config.on_error_response,
        }
    }

    pub async fn get(
        &self,
        base: &str,
        path: &str,
        query: Option<&dyn Payload>,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        let mut request = RequestDescriptor::new(HttpMethod::Get, base, path);
        request.query = query;
        self.execute(&request, target).await
    }

    pub async fn delete(
        &self,
        base: &str,
        path: &str,
        query: Option<&dyn Payload>,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        let mut request = RequestDescriptor::new(HttpMethod::Delete, base, path);
        request.query = query;
        self.execute(&request, target).await
    }

    pub async fn post(
        &self,
        base: &str,
        path: &str,
        query: Option<&dyn Payload>,
        body: Option<&dyn Payload>,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        let mut request = RequestDescriptor::new(HttpMethod::Post, base, path);
        request.query = query;
        request.body = body;
        self.execute(&request, target).await
    }

    pub async fn put(
        &self,
        base: &str,
        path: &str,
        query: Option<&dyn Payload>,
        body: Option<&dyn Payload>,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        let mut request = RequestDescriptor::new(HttpMethod::Put, base, path);
        request.query = query;
        request.body = body;
        self.execute(&request, target).await
    }

    /// Build, send and decode one request.
    ///
    /// On success the returned response carries status and headers; its body
    /// has already been consumed by `target` when one was given.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] when a payload fails validation; nothing is sent.
    /// - [`Error::Response`] for a status of 400 or above, unless the
    ///   error-response hook accepts it.
    /// - Any other variant for failures during encoding, the hooks, the
    ///   round trip or decoding.
    #[instrument(level = "debug", skip_all, fields(method = %request.method, path = request.path))]
    pub async fn execute(
        &self,
        request: &RequestDescriptor<'_>,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        let outbound = self.build_request(request)?;
        debug!(url = %outbound.url, "sending request");
        let response = self.transport.send(outbound).await.map_err(Error::Transport)?;
        debug!(status = response.status, bytes = response.body.len(), "received response");
        self.parse_response(response, target)
    }

    /// Assemble the outbound request without sending it.
    pub fn build_request(&self, request: &RequestDescriptor<'_>) -> Result<HttpRequest, Error> {
        let mut url = join_url(request.base, request.path);

        if let Some(query) = request.query {
            if !self.skip_validation {
                query.validate_with(&self.validator)?;
            }
            let encoded = encode_pairs(&query.pairs()?);
            if !encoded.is_empty() {
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&encoded);
            }
        }

        let body = match request.body {
            Some(body) => {
                if !self.skip_validation {
                    body.validate_with(&self.validator)?;
                }
                Some(match self.body_encoding {
                    BodyEncoding::Form => encode_pairs(&body.pairs()?).into_bytes(),
                    BodyEncoding::Json => body.to_json()?,
                })
            }
            None => None,
        };

        let mut headers = vec![(
            "content-type".to_string(),
            self.body_encoding.content_type().to_string(),
        )];
        if let Some(body) = &body {
            headers.push(("content-length".to_string(), body.len().to_string()));
        }

        let mut outbound = HttpRequest {
            method: request.method,
            url: Url::parse(&url)?,
            headers,
            body,
            timeout: request.timeout,
        };
        if let Some(hook) = &self.before_send {
            hook(&mut outbound).map_err(Error::Hook)?;
            sync_content_length(&mut outbound);
        }
        Ok(outbound)
    }

    /// Apply the status policy to a completed response and decode it.
    pub fn parse_response(
        &self,
        response: HttpResponse,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        if response.is_error() {
            match &self.on_error_response {
                Some(hook) => {
                    if let Err(source) = hook(&response) {
                        return Err(Error::Rejected {
                            response: Box::new(response),
                            source,
                        });
                    }
                    debug!(status = response.status, "error response accepted by hook");
                }
                None => return Err(Error::Response(ResponseError::from(response))),
            }
        }

        let Some(target) = target else {
            return Ok(response);
        };
        let body = if self.strip_bom {
            strip_bom(&response.body)
        } else {
            &response.body
        };
        target.decode(body)?;
        Ok(response)
    }
}

/// A client bound to one base URL.
#[derive(Clone)]
pub struct Endpoint {
    client: Client,
    base_url: String,
}

impl Endpoint {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn get(
        &self,
        path: &str,
        query: Option<&dyn Payload>,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        self.client.get(&self.base_url, path, query, target).await
    }

    pub async fn delete(
        &self,
        path: &str,
        query: Option<&dyn Payload>,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        self.client.delete(&self.base_url, path, query, target).await
    }

    pub async fn post(
        &self,
        path: &str,
        query: Option<&dyn Payload>,
        body: Option<&dyn Payload>,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        self.client.post(&self.base_url, path, query, body, target).await
    }

    pub async fn put(
        &self,
        path: &str,
        query: Option<&dyn Payload>,
        body: Option<&dyn Payload>,
        target: Option<&mut dyn Decoder>,
    ) -> Result<HttpResponse, Error> {
        self.client.put(&self.base_url, path, query, body, target).await
    }
}

/// The hook may have replaced or dropped the body.
fn sync_content_length(request: &mut HttpRequest) {
    match request.body.as_ref().map(Vec::len) {
        Some(len) => request.set_header("content-length", len.to_string()),
        None => request
            .headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("content-length")),
    }
}

/// Join with exactly one `/`; an empty path leaves `base` untouched.
fn join_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{path}", base.trim_end_matches('/'))
}
