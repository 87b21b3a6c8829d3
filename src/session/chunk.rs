//! Splitting content into data frames, and multi-article payloads.

use bytes::{BufMut, Bytes, BytesMut};

use crate::diagnostic::Diagnostic;
use crate::protocol::HEADER_SIZE;

/// Largest DTF payload for a negotiated entity size and record length.
///
/// The entity size bounds the whole frame, so the header comes off it. A
/// record length of 0 imposes no further limit.
pub fn chunk_limit(max_entity_size: usize, record_length: usize) -> usize {
    let limit = max_entity_size.saturating_sub(HEADER_SIZE).max(1);
    if record_length > 0 {
        limit.min(record_length)
    } else {
        limit
    }
}

/// Split `payload` into pieces of at most `max` bytes, in order.
///
/// Pieces share the payload's buffer. An empty payload yields no pieces.
pub fn chunk(payload: &Bytes, max: usize) -> Vec<Bytes> {
    let max = max.max(1);
    let mut pieces = Vec::with_capacity(payload.len().div_ceil(max));
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + max).min(payload.len());
        pieces.push(payload.slice(offset..end));
        offset = end;
    }
    pieces
}

/// Split a DTFMA payload: each article is a 2-byte big-endian length then
/// that many bytes.
pub fn split_articles(payload: &[u8]) -> Result<Vec<&[u8]>, Diagnostic> {
    let mut articles = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(Diagnostic::D3_311);
        }
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        let body = &rest[2..];
        if body.len() < len {
            return Err(Diagnostic::D3_311);
        }
        articles.push(&body[..len]);
        rest = &body[len..];
    }
    Ok(articles)
}

/// Build a DTFMA payload from articles.
pub fn join_articles<'a>(articles: impl IntoIterator<Item = &'a [u8]>) -> Bytes {
    let mut buf = BytesMut::new();
    for article in articles {
        buf.put_u16(article.len() as u16);
        buf.put_slice(article);
    }
    buf.freeze()
}
