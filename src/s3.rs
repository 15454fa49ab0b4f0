use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{MultipartId, ObjectMeta, ObjectStore};
use tokio::io::AsyncWriteExt;
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

use crate::error::MirrorError;
use crate::store::{ChunkIter, Storage};

/// Connection settings for an S3-compatible bucket (AWS, MinIO, Ceph, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Object-storage backend. The crate is synchronous, so every call is driven
/// to completion on a private current-thread runtime.
pub struct ObjectStorage {
    bucket: String,
    store: Arc<dyn ObjectStore>,
    runtime: Arc<Runtime>,
}

impl ObjectStorage {
    pub fn connect(settings: &S3Settings) -> Result<Self, MirrorError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        if let Some(key_id) = &settings.access_key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &settings.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        let store = builder
            .build()
            .map_err(|err| MirrorError::Storage(format!("s3 bucket {}: {err}", settings.bucket)))?;
        Self::with_store(settings.bucket.clone(), Arc::new(store))
    }

    /// Wraps any `object_store` implementation, e.g. `InMemory` in tests.
    pub fn with_store(bucket: String, store: Arc<dyn ObjectStore>) -> Result<Self, MirrorError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| MirrorError::Storage(format!("start storage runtime: {err}")))?;
        Ok(Self {
            bucket,
            store,
            runtime: Arc::new(runtime),
        })
    }

    fn location(key: &str) -> Result<Path, MirrorError> {
        Path::parse(key)
            .map_err(|err| MirrorError::Storage(format!("invalid object key {key}: {err}")))
    }

    fn abort(&self, location: &Path, id: &MultipartId) {
        if let Err(err) = self
            .runtime
            .block_on(self.store.abort_multipart(location, id))
        {
            warn!(key = %location, "failed to abort multipart upload: {err}");
        }
    }
}

impl Storage for ObjectStorage {
    fn exists(&self, key: &str) -> Result<bool, MirrorError> {
        let location = Self::location(key)?;
        match self.runtime.block_on(self.store.head(&location)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(MirrorError::Storage(format!("head {key}: {err}"))),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, MirrorError> {
        // Object-store prefixes are segment based; list the enclosing
        // "directory" and filter so a partial last segment still matches.
        let parent = match prefix.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => Some(Self::location(dir)?),
            _ => None,
        };
        let objects: Vec<ObjectMeta> = self
            .runtime
            .block_on(self.store.list(parent.as_ref()).try_collect())
            .map_err(|err| MirrorError::Storage(format!("list {prefix}: {err}")))?;
        let mut keys = objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| key.starts_with(prefix))
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }

    fn write_stream(&self, key: &str, chunks: &mut ChunkIter<'_>) -> Result<(), MirrorError> {
        let location = Self::location(key)?;
        let (id, mut writer) = self
            .runtime
            .block_on(self.store.put_multipart(&location))
            .map_err(|err| MirrorError::Storage(format!("start upload {key}: {err}")))?;

        // Chunks are pulled outside the runtime: producers may do blocking I/O.
        for chunk in chunks {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.abort(&location, &id);
                    return Err(MirrorError::Storage(format!("stream {key}: {err}")));
                }
            };
            if chunk.is_empty() {
                continue;
            }
            if let Err(err) = self.runtime.block_on(writer.write_all(&chunk)) {
                self.abort(&location, &id);
                return Err(MirrorError::Storage(format!("upload {key}: {err}")));
            }
        }

        if let Err(err) = self.runtime.block_on(writer.shutdown()) {
            self.abort(&location, &id);
            return Err(MirrorError::Storage(format!("complete upload {key}: {err}")));
        }
        Ok(())
    }

    fn open_read(&self, key: &str) -> Result<Box<dyn Read + Send>, MirrorError> {
        let location = Self::location(key)?;
        let result = self
            .runtime
            .block_on(self.store.get(&location))
            .map_err(|err| MirrorError::Storage(format!("get {key}: {err}")))?;
        Ok(Box::new(ObjectReader {
            runtime: Arc::clone(&self.runtime),
            stream: result.into_stream(),
            pending: Bytes::new(),
        }))
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

struct ObjectReader {
    runtime: Arc<Runtime>,
    stream: BoxStream<'static, object_store::Result<Bytes>>,
    pending: Bytes,
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.runtime.block_on(self.stream.next()) {
                Some(Ok(bytes)) => self.pending = bytes,
                Some(Err(err)) => return Err(io::Error::other(err)),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending = self.pending.slice(n..);
        Ok(n)
    }
}
