//! Self-describing payload envelope for tiers that store opaque values.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "DRKC" | version u8 | content tag u8 | compression tag u8 |
//! created_at_ms i64 | ttl_secs u64 | raw_len u64 | body...
//! ```
//!
//! A reader that does not recognise the magic or version, or finds the body
//! truncated, treats the value as a miss rather than a tier failure.

use crate::compression::{CompressionType, compress, decompress};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use darkroom_core::{Error, Result};
use image::ImageFormat;
use std::time::Duration;

const MAGIC: &[u8; 4] = b"DRKC";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 1 + 1 + 8 + 8 + 8;

/// Payload kind recorded in the envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Unknown,
    Png,
    Jpeg,
    WebP,
    Bmp,
}

impl ContentKind {
    /// Sniff the payload's image format from its magic bytes.
    pub fn sniff(payload: &[u8]) -> Self {
        match image::guess_format(payload) {
            Ok(ImageFormat::Png) => ContentKind::Png,
            Ok(ImageFormat::Jpeg) => ContentKind::Jpeg,
            Ok(ImageFormat::WebP) => ContentKind::WebP,
            Ok(ImageFormat::Bmp) => ContentKind::Bmp,
            _ => ContentKind::Unknown,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentKind::Unknown => "application/octet-stream",
            ContentKind::Png => "image/png",
            ContentKind::Jpeg => "image/jpeg",
            ContentKind::WebP => "image/webp",
            ContentKind::Bmp => "image/bmp",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            ContentKind::Unknown => 0,
            ContentKind::Png => 1,
            ContentKind::Jpeg => 2,
            ContentKind::WebP => 3,
            ContentKind::Bmp => 4,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => ContentKind::Png,
            2 => ContentKind::Jpeg,
            3 => ContentKind::WebP,
            4 => ContentKind::Bmp,
            _ => ContentKind::Unknown,
        }
    }
}

/// A decoded envelope.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub content: ContentKind,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(payload: Bytes, ttl: Duration) -> Self {
        Self {
            content: ContentKind::sniff(&payload),
            created_at: Utc::now(),
            ttl,
            payload,
        }
    }

    /// Whether `now` is past `created_at + ttl`. A zero TTL never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .is_some_and(|expires_at| expires_at <= now)
    }

    pub fn encode(&self, compression: CompressionType) -> Result<Bytes> {
        let body = compress(&self.payload, compression)?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.content.tag());
        buf.put_u8(compression.tag());
        buf.put_i64_le(self.created_at.timestamp_millis());
        buf.put_u64_le(self.ttl.as_secs());
        buf.put_u64_le(self.payload.len() as u64);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Returns `Ok(None)` for values written by an unknown format or version.
    pub fn decode(raw: &[u8]) -> Result<Option<Self>> {
        if raw.len() < HEADER_LEN || &raw[..4] != MAGIC || raw[4] != VERSION {
            return Ok(None);
        }
        let Some(compression) = CompressionType::from_tag(raw[6]) else {
            return Ok(None);
        };

        let created_ms = i64::from_le_bytes(field(raw, 7));
        let ttl_secs = u64::from_le_bytes(field(raw, 15));
        let raw_len = u64::from_le_bytes(field(raw, 23));

        let payload = decompress(&raw[HEADER_LEN..], compression)?;
        if payload.len() as u64 != raw_len {
            return Err(Error::Serialization(format!(
                "envelope declares {} bytes, found {}",
                raw_len,
                payload.len()
            )));
        }

        let created_at = Utc
            .timestamp_millis_opt(created_ms)
            .single()
            .ok_or_else(|| Error::Serialization("envelope timestamp out of range".into()))?;

        Ok(Some(Self {
            content: ContentKind::from_tag(raw[5]),
            created_at,
            ttl: Duration::from_secs(ttl_secs),
            payload: Bytes::from(payload),
        }))
    }
}

fn field(raw: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&raw[offset..offset + 8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn png_like() -> Bytes {
        let mut v = PNG_MAGIC.to_vec();
        v.extend(std::iter::repeat_n(3u8, 4096));
        Bytes::from(v)
    }

    #[test]
    fn test_encode_decode_preserves_header() {
        let envelope = Envelope::new(png_like(), Duration::from_secs(90));
        let raw = envelope.encode(CompressionType::Zstd).unwrap();
        assert!(raw.len() < envelope.payload.len());

        let decoded = Envelope::decode(&raw).unwrap().unwrap();
        assert_eq!(decoded.payload, envelope.payload);
        assert_eq!(decoded.content, ContentKind::Png);
        assert_eq!(decoded.ttl, Duration::from_secs(90));
        assert_eq!(
            decoded.created_at.timestamp_millis(),
            envelope.created_at.timestamp_millis()
        );
    }

    #[test]
    fn test_foreign_values_are_not_envelopes() {
        assert!(Envelope::decode(b"plain bytes").unwrap().is_none());

        let mut raw = Envelope::new(png_like(), Duration::ZERO)
            .encode(CompressionType::None)
            .unwrap()
            .to_vec();
        raw[4] = 99;
        assert!(Envelope::decode(&raw).unwrap().is_none());
    }

    #[test]
    fn test_truncated_body_is_error() {
        let raw = Envelope::new(png_like(), Duration::ZERO)
            .encode(CompressionType::None)
            .unwrap();
        assert!(Envelope::decode(&raw[..raw.len() - 10]).is_err());
    }

    #[test]
    fn test_expiry() {
        let mut envelope = Envelope::new(Bytes::from_static(b"x"), Duration::from_secs(10));
        let now = envelope.created_at;
        assert!(!envelope.is_expired_at(now + chrono::Duration::seconds(9)));
        assert!(envelope.is_expired_at(now + chrono::Duration::seconds(10)));

        envelope.ttl = Duration::ZERO;
        assert!(!envelope.is_expired_at(now + chrono::Duration::days(3650)));
        assert_eq!(envelope.content, ContentKind::Unknown);
    }

    #[test]
    fn test_ttl_past_calendar_range_never_expires() {
        let mut envelope =
            Envelope::new(Bytes::from_static(b"x"), Duration::from_secs(10_000_000_000_000));
        let later = envelope.created_at + chrono::Duration::days(36500);
        assert!(!envelope.is_expired_at(later));

        envelope.ttl = Duration::from_secs(u64::MAX);
        assert!(!envelope.is_expired_at(later));
    }
}
