//! Response body decoding.
//!
//! A response target is anything implementing [`Decoder`]. [`Json`] is the
//! default strategy and wraps a `DeserializeOwned` value; types that need a
//! different wire format implement `Decoder` themselves and are handed the
//! raw body instead.

use serde::de::DeserializeOwned;

use crate::error::Error;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Populates a caller-owned value from a response body.
pub trait Decoder: Send {
    fn decode(&mut self, body: &[u8]) -> Result<(), Error>;
}

/// Default strategy: decode the body as JSON into the wrapped value.
#[derive(Debug)]
pub struct Json<'a, T>(pub &'a mut T);

impl<T: DeserializeOwned + Send> Decoder for Json<'_, T> {
    fn decode(&mut self, body: &[u8]) -> Result<(), Error> {
        *self.0 = serde_json::from_slice(body)?;
        Ok(())
    }
}

/// Drop a leading UTF-8 byte-order mark, if any.
pub fn strip_bom(body: &[u8]) -> &[u8] {
    body.strip_prefix(UTF8_BOM).unwrap_or(body)
}
