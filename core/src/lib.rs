//! One-shot HTTP calls from typed request and response values.
//!
//! # Overview
//! A call takes an optional query payload and an optional body payload,
//! validates both before anything touches the network, encodes the query
//! into the URL and the body as JSON or form data, performs a single round
//! trip and decodes the response into a caller-supplied target.
//!
//! # Design
//! - `Client::build_request` and `Client::parse_response` are pure; only the
//!   `Transport` does I/O, and it always returns a fully read body.
//! - Payload rules come from `validator` derives. Failures are rendered into
//!   readable sentences (or left raw) and surface as `Error::Validation`.
//! - Responses with status 400 or above become `Error::Response` unless the
//!   configured error-response hook accepts them.
//! - There are no retries: each call performs at most one round trip.

pub mod client;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod http;
pub mod transport;
pub mod validate;

pub use client::{Client, Endpoint, RequestDescriptor};
pub use config::{BeforeSend, BodyEncoding, ClientConfig, OnErrorResponse, TextDuration};
pub use decode::{Decoder, Json};
pub use encode::{delimited, Payload};
pub use error::{BoxError, Error, ErrorKind, ResponseError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use transport::{ReqwestTransport, Transport};
pub use validate::{one_of, Each, FieldViolation, ValidationReport, Validatable, Validator};
