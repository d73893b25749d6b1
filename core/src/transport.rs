//! The network side of the pipeline.
//!
//! # Design
//! `Transport` is the single I/O seam: it takes a finished `HttpRequest` and
//! returns an `HttpResponse` whose body has been read to the end, so the
//! connection is back in the pool before the pipeline looks at the status.
//! `ReqwestTransport` is the production implementation; tests and embedders
//! can inject their own through `Client::with_transport`.

use std::fs;

use async_trait::async_trait;
use reqwest::Certificate;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{BoxError, Error};
use crate::http::{HttpRequest, HttpResponse};

/// Sends one request and returns the fully read response.
///
/// Dropping the returned future must abort the request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError>;
}

/// `reqwest`-backed transport with connection pooling.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wrap an existing `reqwest::Client`.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a client honouring the timeout and TLS settings of `config`.
    ///
    /// # Errors
    ///
    /// Fails when the CA bundle cannot be read or holds no certificates, or
    /// when the underlying client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, Error> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(config.insecure_skip_verify);
        if !config.client_timeout.is_zero() {
            builder = builder.timeout(config.client_timeout.get());
        }

        if let Some(pem) = ca_bundle(config)? {
            let certs = Certificate::from_pem_bundle(&pem)
                .map_err(|e| Error::InvalidCaBundle(e.to_string()))?;
            if certs.is_empty() {
                return Err(Error::InvalidCaBundle("no certificates found".to_string()));
            }
            debug!(count = certs.len(), "using custom root certificates");
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder.build().map_err(|e| Error::Transport(Box::new(e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        let mut builder = self.client.request(request.method.into(), request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Inline PEM wins over the path; neither means built-in roots.
fn ca_bundle(config: &ClientConfig) -> Result<Option<Vec<u8>>, Error> {
    if let Some(pem) = config.ca_cert_bundle.as_deref().filter(|pem| !pem.is_empty()) {
        return Ok(Some(pem.as_bytes().to_vec()));
    }
    match &config.ca_cert_bundle_path {
        Some(path) => fs::read(path)
            .map(Some)
            .map_err(|source| Error::CaBundleRead {
                path: path.clone(),
                source,
            }),
        None => Ok(None),
    }
}
