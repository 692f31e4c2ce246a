//! Streaming HTTP Responses
//!
//! A channel-backed byte stream and the response type that carries it. The
//! data layer writes its newline-delimited result stream through a
//! [`ByteStreamSender`] from a background task while the transport reads the
//! [`ByteStream`] half.
//!
//! ```ignore
//! use armature_core::streaming::{ByteStream, StreamingResponse};
//!
//! let (stream, sender) = ByteStream::new();
//!
//! tokio::spawn(async move {
//!     sender.send_line(r#"{"root":{"data":1}}"#).await.ok();
//!     sender.close().await;
//! });
//!
//! StreamingResponse::ndjson(stream).status(200)
//! ```

use crate::headers::HeaderMap;
use crate::{Error, HttpResponse};
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Content type of newline-delimited JSON bodies.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// A chunk of streaming data.
#[derive(Debug, Clone)]
enum StreamChunk {
    Bytes(Bytes),
    End,
}

/// A stream of raw bytes for streaming responses.
///
/// Ends when the sender closes it or every sender is dropped.
pub struct ByteStream {
    receiver: mpsc::Receiver<StreamChunk>,
}

/// Sender half of a byte stream.
#[derive(Clone)]
pub struct ByteStreamSender {
    sender: mpsc::Sender<StreamChunk>,
}

impl ByteStream {
    /// Create a new byte stream with default buffer size (64).
    pub fn new() -> (Self, ByteStreamSender) {
        Self::with_buffer_size(64)
    }

    /// Create a new byte stream with custom buffer size.
    pub fn with_buffer_size(size: usize) -> (Self, ByteStreamSender) {
        let (sender, receiver) = mpsc::channel(size.max(1));
        (Self { receiver }, ByteStreamSender { sender })
    }

    /// Read the remaining stream into memory.
    pub async fn collect_bytes(&mut self) -> Vec<u8> {
        use futures_util::StreamExt;

        let mut body = Vec::new();
        while let Some(chunk) = self.next().await {
            body.extend_from_slice(&chunk);
        }
        body
    }
}

impl Stream for ByteStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.receiver).poll_recv(cx) {
            Poll::Ready(Some(StreamChunk::Bytes(bytes))) => Poll::Ready(Some(bytes)),
            Poll::Ready(Some(StreamChunk::End)) | Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl ByteStreamSender {
    /// Send bytes to the stream.
    ///
    /// Fails with [`Error::StreamClosed`] once the receiving half is gone.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), Error> {
        self.sender
            .send(StreamChunk::Bytes(data.into()))
            .await
            .map_err(|e| Error::StreamClosed(format!("Failed to send to stream: {}", e)))
    }

    /// Send one line, terminated with `\n`.
    pub async fn send_line(&self, line: &str) -> Result<(), Error> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.send(bytes).await
    }

    /// Close the stream.
    pub async fn close(&self) {
        let _ = self.sender.send(StreamChunk::End).await;
    }
}

/// A streaming HTTP response.
///
/// Status and headers are final when the response is built; only the body
/// is produced incrementally.
pub struct StreamingResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    body: ByteStream,
}

impl StreamingResponse {
    /// Create a new streaming response from a byte stream.
    pub fn new(stream: ByteStream) -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body: stream,
        }
    }

    /// Create a new NDJSON streaming response.
    pub fn ndjson(stream: ByteStream) -> Self {
        Self::new(stream).content_type(NDJSON_CONTENT_TYPE)
    }

    /// Set the HTTP status code.
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Replace the headers wholesale, keeping an already-set Content-Type.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let content_type = self.headers.content_type().map(str::to_string);
        self.headers = headers;
        if let Some(content_type) = content_type {
            self.headers
                .set_unchecked("Content-Type".to_string(), content_type);
        }
        self
    }

    /// Set the Content-Type header.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.headers
            .set_unchecked("Content-Type".to_string(), content_type.into());
        self
    }

    /// Set a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set_unchecked(key.into(), value.into());
        self
    }

    /// Get the stream body, consuming the response.
    pub fn into_body(self) -> ByteStream {
        self.body
    }

    /// Collect the entire stream into an HttpResponse.
    ///
    /// Waits for every deferred value to settle; use in tests and for
    /// transports that cannot stream.
    pub async fn into_buffered(mut self) -> HttpResponse {
        let body = self.body.collect_bytes().await;
        let mut response = HttpResponse::new(self.status);
        response.headers = self.headers;
        response.body = body;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_byte_stream() {
        let (mut stream, sender) = ByteStream::new();

        tokio::spawn(async move {
            sender.send(b"hello".to_vec()).await.unwrap();
            sender.send(Bytes::from_static(b" world")).await.unwrap();
            sender.close().await;
        });

        let mut result = Vec::new();
        while let Some(chunk) = stream.next().await {
            result.extend_from_slice(&chunk);
        }

        assert_eq!(result, b"hello world");
    }

    #[tokio::test]
    async fn test_lines() {
        let (mut stream, sender) = ByteStream::with_buffer_size(4);

        sender.send_line("{\"a\":1}").await.unwrap();
        sender.send_line("{\"b\":2}").await.unwrap();
        sender.close().await;

        assert_eq!(stream.collect_bytes().await, b"{\"a\":1}\n{\"b\":2}\n");
    }

    #[tokio::test]
    async fn test_dropped_sender_ends_stream() {
        let (mut stream, sender) = ByteStream::new();
        sender.send_line("partial").await.unwrap();
        drop(sender);

        assert_eq!(stream.collect_bytes().await, b"partial\n");
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (stream, sender) = ByteStream::new();
        drop(stream);

        let err = sender.send_line("lost").await.unwrap_err();
        assert!(matches!(err, Error::StreamClosed(_)));
    }

    #[tokio::test]
    async fn test_streaming_response_into_buffered() {
        let (stream, sender) = ByteStream::new();

        tokio::spawn(async move {
            sender.send(b"buffered".to_vec()).await.unwrap();
            sender.close().await;
        });

        let mut headers = HeaderMap::new();
        headers.append("Set-Cookie", "a=1").unwrap();

        let response = StreamingResponse::ndjson(stream).status(202).headers(headers);

        let buffered = response.into_buffered().await;
        assert_eq!(buffered.status, 202);
        assert_eq!(buffered.body, b"buffered");
        assert_eq!(buffered.headers.content_type(), Some(NDJSON_CONTENT_TYPE));
        assert_eq!(buffered.headers.get_set_cookie(), vec!["a=1"]);
    }
}
