//! Error types for the request pipeline.
//!
//! # Design
//! Callers need to tell three situations apart without matching on text:
//! the payload was rejected locally before any I/O (`Validation`), the
//! server answered with a status of 400 or above (`Response`), or something
//! else failed along the way. Everything in the last group keeps the error
//! type it originated with, so a caller can still downcast a transport
//! failure to `reqwest::Error`.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::encode::EncodeError;
use crate::http::HttpResponse;
use crate::validate::ValidationReport;

/// Boxed error raised by hooks, custom decoders and transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by `Client` and its configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// A query or body payload failed validation. No request was sent.
    #[error("{0}")]
    Validation(ValidationReport),

    /// The server answered with a status of 400 or above.
    #[error("{0}")]
    Response(ResponseError),

    /// The assembled URL could not be parsed.
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// A payload could not be flattened into query or form pairs.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// JSON encoding of a body or decoding of a response failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The transport could not complete the round trip.
    #[error("{0}")]
    Transport(BoxError),

    /// The pre-send hook refused the request.
    #[error("{0}")]
    Hook(BoxError),

    /// The error-response hook turned a failed response into this error.
    #[error("{source}")]
    Rejected {
        response: Box<HttpResponse>,
        source: BoxError,
    },

    /// A custom decoder failed.
    #[error("{0}")]
    Decode(BoxError),

    #[error("cannot open ca cert bundle {}: {source}", .path.display())]
    CaBundleRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cert bundle: {0}")]
    InvalidCaBundle(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Response,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Response(_) => ErrorKind::Response,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_response(&self) -> bool {
        self.kind() == ErrorKind::Response
    }

    /// Wrap a failure raised inside a custom decoder.
    pub fn decode(err: impl Into<BoxError>) -> Self {
        Error::Decode(err.into())
    }

    /// The validation report, if this is a validation failure.
    pub fn validation(&self) -> Option<&ValidationReport> {
        match self {
            Error::Validation(report) => Some(report),
            _ => None,
        }
    }

    /// The failed response, if the server answered with an error status.
    pub fn response(&self) -> Option<&ResponseError> {
        match self {
            Error::Response(response) => Some(response),
            _ => None,
        }
    }
}

/// A response with status 400 or above, kept whole for diagnostics.
#[derive(Debug, Clone)]
pub struct ResponseError {
    pub status: u16,
    pub status_line: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl From<HttpResponse> for ResponseError {
    fn from(response: HttpResponse) -> Self {
        Self {
            status: response.status,
            status_line: response.status_line(),
            body: response.body,
            headers: response.headers,
        }
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid status code {} : {} : body: {}",
            self.status,
            self.status_line,
            String::from_utf8_lossy(&self.body)
        )
    }
}

impl std::error::Error for ResponseError {}
