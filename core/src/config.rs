//! Client configuration.
//!
//! `ClientConfig` deserialises from any serde format so it can live inside a
//! host application's config file. The two hooks are runtime-only and are
//! set in code.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::BoxError;
use crate::http::{HttpRequest, HttpResponse};

/// Called with every outbound request just before dispatch, e.g. to add
/// auth headers or signatures. An error aborts the call.
pub type BeforeSend = Arc<dyn Fn(&mut HttpRequest) -> Result<(), BoxError> + Send + Sync>;

/// Called when a response has status 400 or above. `Ok(())` lets the
/// response be decoded as if it had succeeded; an error is returned to the
/// caller in place of the default response error.
pub type OnErrorResponse = Arc<dyn Fn(&HttpResponse) -> Result<(), BoxError> + Send + Sync>;

/// How request bodies are serialised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Json,
    Form,
}

impl BodyEncoding {
    pub fn content_type(self) -> &'static str {
        match self {
            BodyEncoding::Json => "application/json",
            BodyEncoding::Form => "application/x-www-form-urlencoded",
        }
    }
}

/// Settings shared by every request a `Client` makes.
///
/// Set `ca_cert_bundle_path` to load a PEM bundle from disk, or
/// `ca_cert_bundle` to embed one; the inline bundle wins when both are set.
/// With neither, the built-in roots are used.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Whole-request timeout. Zero means none.
    pub client_timeout: TextDuration,
    pub ca_cert_bundle_path: Option<PathBuf>,
    pub ca_cert_bundle: Option<String>,
    pub insecure_skip_verify: bool,
    /// Report the validator's own errors instead of rendered sentences.
    pub raw_validator_errors: bool,
    /// Send payloads without validating them.
    pub skip_validation: bool,
    pub body_encoding: BodyEncoding,
    /// Strip a UTF-8 byte-order mark from response bodies before decoding.
    pub strip_bom: bool,
    #[serde(skip)]
    pub before_send: Option<BeforeSend>,
    #[serde(skip)]
    pub on_error_response: Option<OnErrorResponse>,
}

impl ClientConfig {
    pub fn before_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpRequest) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.before_send = Some(Arc::new(hook));
        self
    }

    pub fn on_error_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HttpResponse) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_error_response = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_timeout", &self.client_timeout)
            .field("ca_cert_bundle_path", &self.ca_cert_bundle_path)
            .field("ca_cert_bundle", &self.ca_cert_bundle.as_ref().map(|_| "<inline>"))
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("raw_validator_errors", &self.raw_validator_errors)
            .field("skip_validation", &self.skip_validation)
            .field("body_encoding", &self.body_encoding)
            .field("strip_bom", &self.strip_bom)
            .field("before_send", &self.before_send.is_some())
            .field("on_error_response", &self.on_error_response.is_some())
            .finish()
    }
}

/// Failure to parse duration text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration {text:?}: {reason}")]
pub struct DurationParseError {
    text: String,
    reason: &'static str,
}

/// A `Duration` that reads and writes human text such as `1h30m`, `250ms`
/// or `1.5s`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`; several can be
/// chained. Empty text parses as zero. Rendering uses the largest units
/// first and always ends in seconds for values of one second or more
/// (`1h30m0s`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TextDuration(Duration);

impl TextDuration {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn get(self) -> Duration {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for TextDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<TextDuration> for Duration {
    fn from(duration: TextDuration) -> Self {
        duration.0
    }
}

impl FromStr for TextDuration {
    type Err = DurationParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let fail = |reason| DurationParseError {
            text: text.to_string(),
            reason,
        };
        let mut rest = text.strip_prefix('+').unwrap_or(text);
        if rest.is_empty() || rest == "0" {
            return Ok(Self::default());
        }
        if rest.starts_with('-') {
            return Err(fail("negative durations are not supported"));
        }

        let mut total: u128 = 0;
        while !rest.is_empty() {
            let number_len = rest
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .unwrap_or(rest.len());
            let (number, tail) = rest.split_at(number_len);
            let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
            if whole.is_empty() && fraction.is_empty() {
                return Err(fail("expected a number"));
            }

            let unit_len = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_len);
            let scale = unit_nanos(unit).ok_or_else(|| {
                if unit.is_empty() {
                    fail("missing unit")
                } else {
                    fail("unknown unit")
                }
            })?;

            let whole: u128 = if whole.is_empty() {
                0
            } else {
                whole.parse().map_err(|_| fail("number out of range"))?
            };
            let mut part = whole.checked_mul(scale).ok_or_else(|| fail("overflow"))?;
            if !fraction.is_empty() {
                // Digits past nanosecond precision cannot change the result.
                let digits = &fraction[..fraction.len().min(18)];
                let numerator: u128 = digits.parse().map_err(|_| fail("expected a number"))?;
                part += numerator * scale / 10u128.pow(digits.len() as u32);
            }
            total = total.checked_add(part).ok_or_else(|| fail("overflow"))?;
            rest = tail;
        }

        let secs = u64::try_from(total / 1_000_000_000).map_err(|_| fail("overflow"))?;
        let nanos = (total % 1_000_000_000) as u32;
        Ok(Self(Duration::new(secs, nanos)))
    }
}

impl TryFrom<String> for TextDuration {
    type Error = DurationParseError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<TextDuration> for String {
    fn from(duration: TextDuration) -> Self {
        duration.to_string()
    }
}

impl fmt::Display for TextDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return f.write_str("0s");
        }
        if nanos < 1_000 {
            return write!(f, "{nanos}ns");
        }
        if nanos < 1_000_000 {
            return write!(f, "{}µs", decimal(nanos, 3));
        }
        if nanos < 1_000_000_000 {
            return write!(f, "{}ms", decimal(nanos, 6));
        }

        let secs = self.0.as_secs();
        let hours = secs / 3600;
        let minutes = secs % 3600 / 60;
        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if hours > 0 || minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        write!(f, "{}s", decimal(nanos % 60_000_000_000, 9))
    }
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60_000_000_000,
        "h" => 3_600_000_000_000,
        _ => return None,
    })
}

/// `value / 10^scale` with trailing fractional zeros dropped.
fn decimal(value: u128, scale: u32) -> String {
    let unit = 10u128.pow(scale);
    let (whole, fraction) = (value / unit, value % unit);
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:0width$}", width = scale as usize);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
