//! The cached-artifact envelope format (C1): a header map plus either inline
//! bytes or a path to a file on local disk holding the body.

use crate::core::errors::CdnError;

/// Distinguishes where an envelope's body actually lives.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum EnvelopeBody {
    /// The response body is small enough to live fully in memory.
    Inline(Vec<u8>),
    /// The response body is a large object streamed to this path on disk.
    File(String),
}

/// The cached form of an origin response: headers captured verbatim plus a body.
///
/// `headers` is an ordered multimap (a plain `Vec` of pairs) so that repeated
/// header names and their relative order survive a round trip, matching what
/// the origin actually sent.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Envelope {
    pub headers: Vec<(String, String)>,
    pub body: EnvelopeBody,
}

impl Envelope {
    pub fn inline(headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            headers,
            body: EnvelopeBody::Inline(body),
        }
    }

    pub fn file(headers: Vec<(String, String)>, path: String) -> Self {
        Self {
            headers,
            body: EnvelopeBody::File(path),
        }
    }

    /// Looks up the first header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serializes the envelope to its stable binary encoding.
    pub fn encode(&self) -> Vec<u8> {
        // Encoding a well-formed envelope cannot fail: every field is a plain
        // string/byte vector, so `unwrap` only ever fires on an allocator failure.
        bincode::encode_to_vec(self, bincode::config::standard())
            .expect("envelope encoding is infallible for in-memory values")
    }

    /// Deserializes an envelope from bytes produced by [`Envelope::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CdnError> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(envelope, _)| envelope)
            .map_err(|e| CdnError::CorruptEnvelope(e.to_string()))
    }
}
