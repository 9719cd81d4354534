//! Wire format of a chunk
//!
//! Every chunk travels as one `POST /` request. The sequence number rides in the
//! [`CHUNK_HEADER`] header as a decimal integer and the body is the raw payload:
//!
//! ```text
//! POST / HTTP/1.1
//! chunk-number: 3
//! content-type: application/octet-stream
//!
//! <payload bytes>
//! ```
//!
//! Data chunks are numbered from 1. The value `-1` marks the final chunk of the stream.

use axum::http::HeaderMap;

pub const CHUNK_HEADER: &str = "chunk-number";

/// Header value of the end-of-stream chunk.
pub const FINAL_CHUNK: i64 = -1;

pub const CONTENT_TYPE: &str = "application/octet-stream";

/// First sequence number handed out to data chunks.
pub const FIRST_CHUNK: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkNumber {
    Data(u64),
    Final,
}

impl ChunkNumber {
    pub fn header_value(&self) -> String {
        match self {
            ChunkNumber::Data(seq) => seq.to_string(),
            ChunkNumber::Final => FINAL_CHUNK.to_string(),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ChunkNumber::Final)
    }
}

impl std::fmt::Display for ChunkNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkNumber::Data(seq) => write!(f, "{seq}"),
            ChunkNumber::Final => write!(f, "final"),
        }
    }
}

impl std::str::FromStr for ChunkNumber {
    type Err = CodecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let number: i64 = value
            .parse()
            .map_err(|_| CodecError::Invalid(value.to_string()))?;
        match number {
            FINAL_CHUNK => Ok(ChunkNumber::Final),
            // other negative numbers would sit in the buffer forever
            n if n < 0 => Err(CodecError::Invalid(value.to_string())),
            n => Ok(ChunkNumber::Data(n as u64)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("missing chunk-number header")]
    MissingHeader,
    #[error("chunk-number header is not valid text")]
    NotText,
    #[error("invalid chunk number {0:?}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub number: ChunkNumber,
    pub payload: bytes::Bytes,
}

impl Chunk {
    pub fn data(seq: u64, payload: impl Into<bytes::Bytes>) -> Self {
        Self {
            number: ChunkNumber::Data(seq),
            payload: payload.into(),
        }
    }

    pub fn last(payload: impl Into<bytes::Bytes>) -> Self {
        Self {
            number: ChunkNumber::Final,
            payload: payload.into(),
        }
    }
}

/// Build the request carrying `chunk` to `url`.
pub fn encode(client: &reqwest::Client, url: &str, chunk: Chunk) -> reqwest::RequestBuilder {
    client
        .post(url)
        .header(CHUNK_HEADER, chunk.number.header_value())
        .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
        .body(chunk.payload)
}

/// Extract the chunk number from inbound request headers.
pub fn decode(headers: &HeaderMap) -> Result<ChunkNumber, CodecError> {
    let value = headers
        .get(CHUNK_HEADER)
        .ok_or(CodecError::MissingHeader)?;
    let value = value.to_str().map_err(|_| CodecError::NotText)?;
    if value.is_empty() {
        return Err(CodecError::MissingHeader);
    }
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static [u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CHUNK_HEADER, HeaderValue::from_bytes(value).unwrap());
        headers
    }

    #[test]
    fn decode_data_and_final() {
        assert_eq!(decode(&headers(b"1")), Ok(ChunkNumber::Data(1)));
        assert_eq!(decode(&headers(b"42")), Ok(ChunkNumber::Data(42)));
        assert_eq!(decode(&headers(b"0")), Ok(ChunkNumber::Data(0)));
        assert_eq!(decode(&headers(b"-1")), Ok(ChunkNumber::Final));
    }

    #[test]
    fn decode_rejects_malformed() {
        assert_eq!(decode(&HeaderMap::new()), Err(CodecError::MissingHeader));
        assert_eq!(decode(&headers(b"")), Err(CodecError::MissingHeader));
        assert_eq!(
            decode(&headers(b"abc")),
            Err(CodecError::Invalid("abc".to_string()))
        );
        assert_eq!(
            decode(&headers(b"1.5")),
            Err(CodecError::Invalid("1.5".to_string()))
        );
        assert_eq!(
            decode(&headers(b"-2")),
            Err(CodecError::Invalid("-2".to_string()))
        );
        assert_eq!(decode(&headers(b"\xff")), Err(CodecError::NotText));
    }

    #[test]
    fn header_value_matches_decode() {
        for number in [ChunkNumber::Data(7), ChunkNumber::Final] {
            let value = number.header_value();
            assert_eq!(value.parse::<ChunkNumber>(), Ok(number));
        }
        assert_eq!(ChunkNumber::Final.header_value(), "-1");
        assert_eq!(ChunkNumber::Final.to_string(), "final");
    }

    #[test]
    fn encode_sets_header_and_body() {
        let client = reqwest::Client::new();
        let request = encode(&client, "http://127.0.0.1:1/", Chunk::data(3, &b"abc"[..]))
            .build()
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.headers()[CHUNK_HEADER], "3");
        assert_eq!(
            request.headers()[reqwest::header::CONTENT_TYPE],
            CONTENT_TYPE
        );
        assert_eq!(
            request.body().and_then(|body| body.as_bytes()),
            Some(&b"abc"[..])
        );
    }
}
