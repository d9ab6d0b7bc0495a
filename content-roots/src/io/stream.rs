/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_types::byte_stream::Length;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::Error;

/// Source of binary data read from or written to a root.
///
/// `ContentStream` is returned by [`Root::input_stream`](crate::root::Root::input_stream) and
/// consumed by [`Root::copy_stream_to`](crate::root::Root::copy_stream_to). It implements
/// [`AsyncRead`]. Any open handle is released when the stream is dropped.
pub struct ContentStream {
    inner: RawContentStream,
}

enum RawContentStream {
    /// In-memory buffer to read from
    Buf(Bytes),
    /// File based input
    Fs {
        file: tokio::fs::File,
        path: PathBuf,
        length: u64,
    },
    /// Any other reader
    Dyn {
        reader: Pin<Box<dyn AsyncRead + Send>>,
        length: Option<u64>,
    },
}

impl ContentStream {
    /// Create a new `ContentStream` that reads data from a given `path`.
    ///
    /// The file is opened immediately; its length is captured at that point.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<ContentStream, Error> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        let length = file.metadata().await?.len();
        Ok(Self {
            inner: RawContentStream::Fs { file, path, length },
        })
    }

    /// Create a new `ContentStream` from an arbitrary reader of (optionally) known length.
    pub fn from_reader<R>(reader: R, length: Option<u64>) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            inner: RawContentStream::Dyn {
                reader: Box::pin(reader),
                length,
            },
        }
    }

    /// Exact number of bytes the stream will yield, when known up front.
    pub fn content_length(&self) -> Option<u64> {
        match &self.inner {
            RawContentStream::Buf(bytes) => Some(bytes.remaining() as u64),
            RawContentStream::Fs { length, .. } => Some(*length),
            RawContentStream::Dyn { length, .. } => *length,
        }
    }

    /// Path of the backing file, for streams created with [`from_path`](Self::from_path).
    pub fn path(&self) -> Option<&Path> {
        match &self.inner {
            RawContentStream::Fs { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Read the remaining content into memory.
    pub async fn collect(self) -> Result<Bytes, Error> {
        match self.inner {
            RawContentStream::Buf(bytes) => Ok(bytes),
            inner => {
                let mut stream = ContentStream { inner };
                let capacity = stream.content_length().unwrap_or_default() as usize;
                let mut buf = BytesMut::with_capacity(capacity);
                while stream.read_buf(&mut buf).await? != 0 {}
                Ok(buf.freeze())
            }
        }
    }

    /// Converts `ContentStream` to a [`ByteStream`] that can be used in `PutObject`.
    ///
    /// Readers are spooled to a temporary file in `tmp_dir` first, since a `PutObject` body
    /// must be replayable. The returned temporary file must outlive the request.
    pub(crate) async fn into_byte_stream(
        self,
        tmp_dir: &Path,
    ) -> Result<(ByteStream, Option<tempfile::NamedTempFile>), Error> {
        match self.inner {
            RawContentStream::Buf(bytes) => Ok((ByteStream::from(bytes), None)),
            RawContentStream::Fs { path, length, .. } => {
                let body = ByteStream::read_from()
                    .path(path)
                    .length(Length::Exact(length))
                    .build()
                    .await?;
                Ok((body, None))
            }
            RawContentStream::Dyn { mut reader, .. } => {
                let spool = tempfile::NamedTempFile::new_in(tmp_dir)?;
                let mut file = tokio::fs::File::from_std(spool.reopen()?);
                let length = tokio::io::copy(&mut reader, &mut file).await?;
                file.sync_all().await?;
                let body = ByteStream::read_from()
                    .path(spool.path())
                    .length(Length::Exact(length))
                    .build()
                    .await?;
                Ok((body, Some(spool)))
            }
        }
    }
}

impl AsyncRead for ContentStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.inner {
            RawContentStream::Buf(bytes) => {
                let n = bytes.remaining().min(buf.remaining());
                buf.put_slice(&bytes[..n]);
                bytes.advance(n);
                Poll::Ready(Ok(()))
            }
            RawContentStream::Fs { file, .. } => Pin::new(file).poll_read(cx, buf),
            RawContentStream::Dyn { reader, .. } => reader.as_mut().poll_read(cx, buf),
        }
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            RawContentStream::Buf(bytes) => f
                .debug_tuple("ContentStream::Buf")
                .field(&bytes.len())
                .finish(),
            RawContentStream::Fs { path, length, .. } => f
                .debug_struct("ContentStream::Fs")
                .field("path", path)
                .field("length", length)
                .finish(),
            RawContentStream::Dyn { length, .. } => f
                .debug_struct("ContentStream::Dyn")
                .field("length", length)
                .finish(),
        }
    }
}

impl Default for ContentStream {
    fn default() -> Self {
        Self::from(Bytes::new())
    }
}

impl From<Bytes> for ContentStream {
    fn from(value: Bytes) -> Self {
        Self {
            inner: RawContentStream::Buf(value),
        }
    }
}

impl From<Vec<u8>> for ContentStream {
    fn from(value: Vec<u8>) -> Self {
        Self::from(Bytes::from(value))
    }
}

impl From<&'static [u8]> for ContentStream {
    fn from(slice: &'static [u8]) -> ContentStream {
        Self::from(Bytes::from_static(slice))
    }
}

impl From<&'static str> for ContentStream {
    fn from(slice: &'static str) -> ContentStream {
        Self::from(Bytes::from_static(slice.as_bytes()))
    }
}

impl From<String> for ContentStream {
    fn from(value: String) -> Self {
        Self::from(Bytes::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_buf_stream() {
        let stream = ContentStream::from("pete\n");
        assert_eq!(Some(5), stream.content_length());
        assert!(stream.path().is_none());
        assert_eq!(Bytes::from_static(b"pete\n"), stream.collect().await.unwrap());
    }

    #[tokio::test]
    async fn test_path_stream() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"fred\n").unwrap();
        let stream = ContentStream::from_path(tmp.path()).await.unwrap();
        assert_eq!(Some(5), stream.content_length());
        assert_eq!(Some(tmp.path()), stream.path());
        assert_eq!(Bytes::from_static(b"fred\n"), stream.collect().await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = ContentStream::from_path(dir.path().join("missing"))
            .await
            .unwrap_err();
        assert_eq!(&crate::error::ErrorKind::NotFound, err.kind());
    }

    #[tokio::test]
    async fn test_reader_stream() {
        let stream = ContentStream::from_reader(&b"dave\n"[..], None);
        assert_eq!(None, stream.content_length());
        let mut small = [0u8; 2];
        let mut stream = stream;
        let n = stream.read(&mut small).await.unwrap();
        assert_eq!(b"da", &small[..n]);
        assert_eq!(Bytes::from_static(b"ve\n"), stream.collect().await.unwrap());
    }
}
