//! Environment adapter (spec §4.1): the one place host-specific I/O is
//! allowed to appear. The rest of the engine only sees these traits.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// `httpRequest(url, method, headers, body) -> Response`. No automatic
/// retry, retry policy lives entirely in the per-file/batch engines'
/// `onError` callbacks.
#[async_trait]
pub trait HttpAdapter: Send + Sync {
    async fn http_request(
        &self,
        url: &str,
        method: &str,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Result<HttpResponse, reqwest::Error>;
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// `reqwest`-backed default adapter.
pub struct ReqwestHttpAdapter {
    client: reqwest::Client,
}

impl ReqwestHttpAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestHttpAdapter {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpAdapter for ReqwestHttpAdapter {
    async fn http_request(
        &self,
        url: &str,
        method: &str,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Result<HttpResponse, reqwest::Error> {
        let method: reqwest::Method = method.parse().unwrap_or(reqwest::Method::GET);
        let mut builder = self.client.request(method, url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let response = builder.body(body).send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// `readSlice(randomAccess|bytes, start, end) -> bytes`. Random-access
/// sources implement this directly (inclusive start, exclusive end).
#[async_trait]
pub trait RandomAccessSource: Send + Sync {
    fn size(&self) -> u64;
    async fn slice(&self, start: u64, end: u64) -> io::Result<Bytes>;
}

/// An in-memory blob: the `bytes` variant of `FileDescriptor`.
pub struct InMemorySource(Bytes);

impl InMemorySource {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }
}

#[async_trait]
impl RandomAccessSource for InMemorySource {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    async fn slice(&self, start: u64, end: u64) -> io::Result<Bytes> {
        let (start, end) = (start as usize, end as usize);
        if start > end || end > self.0.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "slice out of range"));
        }
        Ok(self.0.slice(start..end))
    }
}

/// A host file handle opened for random access (the "native host file
/// object" variant).
pub struct FileSource {
    file: Arc<tokio::sync::Mutex<tokio::fs::File>>,
    size: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file: Arc::new(tokio::sync::Mutex::new(file)),
            size,
        })
    }
}

#[async_trait]
impl RandomAccessSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn slice(&self, start: u64, end: u64) -> io::Result<Bytes> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        if start > end || end > self.size {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "slice out of range"));
        }
        let len = (end - start) as usize;
        let mut file = self.file.lock().await;
        file.seek(io::SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Ordered, read-once byte source: the `stream` variant of
/// `FileDescriptor`. `next_chunk` returns arbitrarily-sized reads from
/// the underlying source; `None` means end-of-stream.
#[async_trait]
pub trait ByteStream: Send {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;
}

/// Wraps any in-memory `Vec<Bytes>` as a `ByteStream`, useful for tests
/// and for hosts that only hand over already-buffered chunks.
pub struct VecByteStream(std::collections::VecDeque<Bytes>);

impl VecByteStream {
    pub fn new(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        Self(chunks.into_iter().collect())
    }
}

#[async_trait]
impl ByteStream for VecByteStream {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.0.pop_front())
    }
}

#[async_trait]
impl ByteStream for Box<dyn ByteStream> {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        (**self).next_chunk().await
    }
}

/// `readStreamChunk(stream, targetSize) -> bytes|null`. Buffers
/// internally so several small source reads combine into one output
/// chunk of up to `target_size` bytes; returns `None` exactly once,
/// right after observing end-of-stream, and never blocks past that
/// point again.
pub struct ChunkedReader<S: ByteStream> {
    source: S,
    buffer: BytesMut,
    exhausted: bool,
}

impl<S: ByteStream> ChunkedReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            buffer: BytesMut::new(),
            exhausted: false,
        }
    }

    pub async fn read_chunk(&mut self, target_size: usize) -> io::Result<Option<Bytes>> {
        while self.buffer.len() < target_size && !self.exhausted {
            match self.source.next_chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.exhausted = true,
            }
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }

        let take = target_size.min(self.buffer.len());
        let chunk = self.buffer.split_to(take).freeze();
        Ok(Some(chunk))
    }
}
