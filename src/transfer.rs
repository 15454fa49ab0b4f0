use std::collections::BTreeMap;
use std::io::{self, Read};

use bzip2::read::MultiBzDecoder;
use chrono::{SecondsFormat, Utc};
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::client::{ArchiveClient, ResponseHeaders};
use crate::domain::Codec;
use crate::error::MirrorError;
use crate::store::{Storage, write_bytes};

pub const CHUNK_SIZE: usize = 1024 * 1024;

/// JSON sidecar stored next to every data file. Fields are declared in
/// alphabetical order so the serialized document has sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_last_modified: Option<String>,
    pub sha256: String,
    pub size_bytes: u64,
    pub timestamp_utc: String,
    pub url: String,
}

impl TransferMetadata {
    fn new(url: &str, sha256: String, size_bytes: u64, headers: &ResponseHeaders) -> Self {
        let mut selected = BTreeMap::new();
        if let Some(value) = &headers.content_type {
            selected.insert("Content-Type".to_string(), value.clone());
        }
        if let Some(value) = &headers.content_length {
            selected.insert("Content-Length".to_string(), value.clone());
        }
        Self {
            http_etag: headers.etag.clone(),
            http_headers: (!selected.is_empty()).then_some(selected),
            http_last_modified: headers.last_modified.clone(),
            sha256,
            size_bytes,
            timestamp_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Stored(TransferMetadata),
    /// Upstream answered with something other than 200; nothing was written.
    Unavailable { status: u16 },
}

impl TransferOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, TransferOutcome::Stored(_))
    }
}

/// Fixed-size chunks pulled from a blocking reader. The final chunk may be short.
pub struct ReadChunks<R> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ReadChunks<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }
}

impl<R: Read> Iterator for ReadChunks<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buffer = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buffer.len() {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        if filled == 0 {
            return None;
        }
        buffer.truncate(filled);
        Some(Ok(buffer))
    }
}

/// Pass-through adapter hashing and counting every chunk it yields, so the
/// digest covers exactly the bytes the sink received.
pub struct Digesting<I> {
    inner: I,
    hasher: Sha256,
    size: u64,
}

impl<I> Digesting<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    pub fn finish(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.size)
    }
}

impl<I: Iterator<Item = io::Result<Vec<u8>>>> Iterator for Digesting<I> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        if let Ok(chunk) = &item {
            self.hasher.update(chunk);
            self.size += chunk.len() as u64;
        }
        Some(item)
    }
}

fn decoded(body: Box<dyn Read + Send>, codec: Option<Codec>) -> Box<dyn Read + Send> {
    match codec {
        Some(Codec::Bzip2) => Box::new(MultiBzDecoder::new(body)),
        Some(Codec::Gzip) => Box::new(MultiGzDecoder::new(body)),
        None => body,
    }
}

/// Streams one remote file into storage: GET, optional decompression,
/// SHA-256 + size accounting, write, then the sidecar.
pub struct TransferEngine<'a> {
    client: &'a dyn ArchiveClient,
    storage: &'a dyn Storage,
    chunk_size: usize,
}

impl<'a> TransferEngine<'a> {
    pub fn new(client: &'a dyn ArchiveClient, storage: &'a dyn Storage) -> Self {
        Self {
            client,
            storage,
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Performs no existence check; a repeated call overwrites the previous copy.
    pub fn transfer(
        &self,
        url: &str,
        data_key: &str,
        meta_key: Option<&str>,
        codec: Option<Codec>,
    ) -> Result<TransferOutcome, MirrorError> {
        let response = self.client.get(url)?;
        if !response.is_ok() {
            if response.status == 404 {
                debug!(%url, "file not found (404)");
            } else {
                warn!(%url, status = response.status, "failed to download");
            }
            return Ok(TransferOutcome::Unavailable {
                status: response.status,
            });
        }

        let headers = response.headers;
        let chunks = ReadChunks::new(decoded(response.body, codec), self.chunk_size);
        let mut digesting = Digesting::new(chunks);
        self.storage.write_stream(data_key, &mut digesting)?;
        let (sha256, size_bytes) = digesting.finish();

        let metadata = TransferMetadata::new(url, sha256, size_bytes, &headers);
        if let Some(meta_key) = meta_key {
            let payload = serde_json::to_vec_pretty(&metadata)
                .map_err(|err| MirrorError::Storage(err.to_string()))?;
            write_bytes(self.storage, meta_key, &payload)?;
        }
        debug!(%url, %data_key, size_bytes, "stored");
        Ok(TransferOutcome::Stored(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_chunks_are_fixed_size() {
        let data = vec![7u8; 10];
        let chunks = ReadChunks::new(&data[..], 4)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let sizes = chunks.iter().map(Vec::len).collect::<Vec<_>>();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn digest_of_empty_stream() {
        let mut digesting = Digesting::new(ReadChunks::new(&b""[..], 4));
        assert!(digesting.next().is_none());
        let (sha, size) = digesting.finish();
        assert_eq!(size, 0);
        assert_eq!(
            sha,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
