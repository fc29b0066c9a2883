//! Per-part encryption pipeline.
//!
//! Every part is encrypted on its own with ChaCha20, keyed by the content key of
//! the node that stores it and a fresh random nonce. The cipher is a pure
//! keystream, so encryption and decryption are the same transform and chunk
//! boundaries on the wire do not matter.

use crate::error::{Result, VaultError};
use bytes::{Bytes, BytesMut};
use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use futures::stream::{BoxStream, Stream, StreamExt};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use std::fmt;
use std::pin::Pin;

pub const CONTENT_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const AUTH_TOKEN_LEN: usize = 128;

/// Body handed to a node write. `Sync` so it can back an HTTP request body.
pub type BlobBody = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + Sync + 'static>>;

/// Bytes coming back from a node read.
pub type BlobReader = BoxStream<'static, Result<Bytes>>;

/// Symmetric key used for every part placed on one node.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey([u8; CONTENT_KEY_LEN]);

impl ContentKey {
    pub fn generate() -> Self {
        let mut key = [0u8; CONTENT_KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; CONTENT_KEY_LEN] = bytes.try_into().map_err(|_| {
            VaultError::Crypto(format!(
                "content key must be {} bytes, got {}",
                CONTENT_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PartNonce([u8; NONCE_LEN]);

impl PartNonce {
    pub fn generate() -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self(nonce)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let nonce: [u8; NONCE_LEN] = bytes.try_into().map_err(|_| {
            VaultError::Crypto(format!(
                "part nonce must be {} bytes, got {}",
                NONCE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(nonce))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PartNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartNonce({})", hex::encode(self.0))
    }
}

/// Random alphanumeric bearer token shared between the panel and one node.
pub fn generate_auth_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTH_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// One stage of a byte pipeline. The stage owns the buffer it is given and
/// hands back the transformed bytes.
pub trait ChunkTransform: Send {
    fn next(&mut self, chunk: BytesMut) -> Result<Bytes>;
}

pub struct PartCipher {
    inner: ChaCha20,
    processed: u64,
}

impl PartCipher {
    pub fn new(key: &ContentKey, nonce: &PartNonce) -> Result<Self> {
        let inner = ChaCha20::new_from_slices(key.as_bytes(), nonce.as_bytes())
            .map_err(|error| VaultError::Crypto(error.to_string()))?;
        Ok(Self {
            inner,
            processed: 0,
        })
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl ChunkTransform for PartCipher {
    fn next(&mut self, mut chunk: BytesMut) -> Result<Bytes> {
        self.inner
            .try_apply_keystream(&mut chunk)
            .map_err(|error| VaultError::Crypto(error.to_string()))?;
        self.processed += chunk.len() as u64;
        Ok(chunk.freeze())
    }
}

/// Runs every chunk of `source` through `transform`, preserving errors.
pub fn transform_stream<S, T>(source: S, mut transform: T) -> impl Stream<Item = Result<Bytes>>
where
    S: Stream<Item = Result<Bytes>>,
    T: ChunkTransform,
{
    source.map(move |chunk| chunk.and_then(|bytes| transform.next(BytesMut::from(bytes))))
}

pub fn encrypt_body<S>(source: S, key: &ContentKey, nonce: &PartNonce) -> Result<BlobBody>
where
    S: Stream<Item = Result<Bytes>> + Send + Sync + 'static,
{
    let cipher = PartCipher::new(key, nonce)?;
    Ok(Box::pin(transform_stream(source, cipher)))
}

pub fn decrypt_reader(reader: BlobReader, key: &ContentKey, nonce: &PartNonce) -> Result<BlobReader> {
    let cipher = PartCipher::new(key, nonce)?;
    Ok(transform_stream(reader, cipher).boxed())
}
