//! Transparent gzip compression over any store.

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::cache::{Cache, CacheError};

#[derive(Debug, Clone)]
pub struct CompressedCache {
    inner: Arc<dyn Cache>,
}

impl CompressedCache {
    pub fn new(inner: Arc<dyn Cache>) -> Self {
        Self { inner }
    }
}

fn compress(value: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(value)
        .map_err(|e| CacheError::Codec(e.to_string()))?;
    encoder.finish().map_err(|e| CacheError::Codec(e.to_string()))
}

fn decompress(value: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::new();
    GzDecoder::new(value)
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Codec(e.to_string()))?;
    Ok(out)
}

#[async_trait]
impl Cache for CompressedCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        match self.inner.get(key).await? {
            Some(raw) => Ok(Some(Bytes::from(decompress(&raw)?))),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let packed = compress(&value)?;
        self.inner.put(key, Bytes::from(packed)).await
    }
}
