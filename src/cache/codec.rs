//! Payload encoding for cache entries.
//!
//! Values are stored as JSON bytes; payloads at or above the compression threshold are
//! deflated. Encoding only affects footprint, never lookup, TTL or eviction.

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};

use crate::Result;

/// Stored form of a cached value.
#[derive(Debug, Clone)]
pub(crate) struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PayloadCodec {
    /// `None` disables compression.
    threshold: Option<usize>,
}

impl PayloadCodec {
    pub fn new(threshold: Option<usize>) -> Self {
        Self { threshold }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<EncodedPayload> {
        let raw = serde_json::to_vec(value)?;
        match self.threshold {
            Some(min) if raw.len() >= min => {
                let mut enc = DeflateEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::fast());
                enc.write_all(&raw)?;
                let packed = enc.finish()?;
                // Incompressible payloads stay plain.
                if packed.len() < raw.len() {
                    Ok(EncodedPayload {
                        bytes: packed,
                        compressed: true,
                    })
                } else {
                    Ok(EncodedPayload {
                        bytes: raw,
                        compressed: false,
                    })
                }
            }
            _ => Ok(EncodedPayload {
                bytes: raw,
                compressed: false,
            }),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8], compressed: bool) -> Result<T> {
        if compressed {
            let mut raw = Vec::with_capacity(bytes.len() * 2);
            DeflateDecoder::new(bytes).read_to_end(&mut raw)?;
            Ok(serde_json::from_slice(&raw)?)
        } else {
            Ok(serde_json::from_slice(bytes)?)
        }
    }
}
