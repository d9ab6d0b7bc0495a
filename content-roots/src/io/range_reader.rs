/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::error::{Error, ErrorKind};
use crate::MEBIBYTE;

/// Largest single range fetched by a [`RangeReader`] unless configured otherwise.
pub const MAX_READ_LENGTH: u64 = 10 * MEBIBYTE;

/// Random access to a remote object by byte range.
#[async_trait]
pub trait RangeSource: Send + Sync + fmt::Debug {
    /// Total size of the object.
    async fn size(&self) -> Result<u64, Error>;

    /// Fetch `length` bytes starting at `start`. Never called with an empty or
    /// out-of-bounds range.
    async fn fetch(&self, start: u64, length: u64) -> Result<Bytes, Error>;
}

/// Seekable reader over a [`RangeSource`].
///
/// Reads are served by ranged fetches of at most `max_read_length` bytes so a large object
/// can be consumed (or sampled) without holding it in memory. The object size is fetched
/// once, on first use. Reading at the end of the object yields no data rather than an error.
pub struct RangeReader {
    source: Arc<dyn RangeSource>,
    max_read_length: u64,
    size: Option<u64>,
    position: u64,
    // fetched bytes starting at `position` not yet handed to a reader
    buffered: Bytes,
    pending_seek: Option<SeekFrom>,
    state: State,
}

enum State {
    Idle,
    Sizing(BoxFuture<'static, Result<u64, Error>>),
    Fetching(BoxFuture<'static, Result<Bytes, Error>>),
}

impl RangeReader {
    /// Reader positioned at the start of `source`.
    pub fn new(source: Arc<dyn RangeSource>) -> Self {
        Self {
            source,
            max_read_length: MAX_READ_LENGTH,
            size: None,
            position: 0,
            buffered: Bytes::new(),
            pending_seek: None,
            state: State::Idle,
        }
    }

    /// Set the largest range requested in a single fetch.
    pub fn with_max_read_length(mut self, max_read_length: u64) -> Self {
        self.max_read_length = max_read_length.max(1);
        self
    }

    /// Seed the size when it is already known, saving a lookup.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Size of the underlying object.
    pub async fn size(&mut self) -> Result<u64, Error> {
        match self.size {
            Some(size) => Ok(size),
            None => {
                let size = self.source.size().await?;
                self.size = Some(size);
                Ok(size)
            }
        }
    }

    /// Read up to `length` bytes from the current position, advancing it.
    ///
    /// Returns fewer bytes only at the end of the object, and empty bytes once there.
    pub async fn read_bytes(&mut self, length: u64) -> Result<Bytes, Error> {
        self.pending_seek = None;
        self.state = State::Idle;
        let size = self.size().await?;
        let length = length.min(size.saturating_sub(self.position));
        let mut out = BytesMut::with_capacity(usize::try_from(length).unwrap_or(usize::MAX));
        let from_buffer = self
            .buffered
            .len()
            .min(usize::try_from(length).unwrap_or(usize::MAX));
        out.extend_from_slice(&self.buffered[..from_buffer]);
        self.buffered.advance(from_buffer);
        while (out.len() as u64) < length {
            let start = self.position + out.len() as u64;
            let chunk_length = (length - out.len() as u64).min(self.max_read_length);
            let chunk = self.source.fetch(start, chunk_length).await?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        self.position += out.len() as u64;
        Ok(out.freeze())
    }

    /// Move the read position, returning the new one.
    ///
    /// Fails with [`ErrorKind::OutOfRange`] for a target before the start or past the end of
    /// the object; the position is unchanged in that case.
    pub async fn seek_to(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        self.reset();
        let size = self.size().await?;
        self.position = resolve(pos, self.position, size)?;
        Ok(self.position)
    }

    fn reset(&mut self) {
        self.buffered = Bytes::new();
        self.pending_seek = None;
        self.state = State::Idle;
    }

    fn poll_size(&mut self, cx: &mut Context<'_>) -> Poll<Result<u64, Error>> {
        loop {
            if let Some(size) = self.size {
                return Poll::Ready(Ok(size));
            }
            match &mut self.state {
                State::Sizing(fut) => {
                    let result = futures_util::ready!(fut.poll_unpin(cx));
                    self.state = State::Idle;
                    self.size = Some(result?);
                }
                _ => {
                    let source = self.source.clone();
                    self.state = State::Sizing(async move { source.size().await }.boxed());
                }
            }
        }
    }
}

fn resolve(pos: SeekFrom, current: u64, size: u64) -> Result<u64, Error> {
    let target = match pos {
        SeekFrom::Start(offset) => i128::from(offset),
        SeekFrom::Current(delta) => i128::from(current) + i128::from(delta),
        SeekFrom::End(delta) => i128::from(size) + i128::from(delta),
    };
    if target < 0 || target > i128::from(size) {
        return Err(Error::new(
            ErrorKind::OutOfRange,
            format!("seek to {target} outside of 0..={size}"),
        ));
    }
    Ok(target as u64)
}

fn to_io_error(err: Error) -> io::Error {
    let kind = match err.kind() {
        ErrorKind::OutOfRange => io::ErrorKind::InvalidInput,
        ErrorKind::NotFound => io::ErrorKind::NotFound,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

impl AsyncRead for RangeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pending_seek.is_some() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "read while a seek is in progress",
            )));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if !this.buffered.is_empty() {
                let n = this.buffered.len().min(buf.remaining());
                buf.put_slice(&this.buffered[..n]);
                this.buffered.advance(n);
                this.position += n as u64;
                return Poll::Ready(Ok(()));
            }

            match &mut this.state {
                State::Fetching(fut) => {
                    let result = futures_util::ready!(fut.poll_unpin(cx));
                    this.state = State::Idle;
                    let chunk = result.map_err(to_io_error)?;
                    if chunk.is_empty() {
                        return Poll::Ready(Ok(()));
                    }
                    this.buffered = chunk;
                }
                State::Idle | State::Sizing(_) => {
                    let size = futures_util::ready!(this.poll_size(cx)).map_err(to_io_error)?;
                    this.state = State::Idle;
                    if this.position >= size {
                        return Poll::Ready(Ok(()));
                    }
                    let length = (size - this.position).min(this.max_read_length);
                    let start = this.position;
                    let source = this.source.clone();
                    this.state = State::Fetching(
                        async move { source.fetch(start, length).await }.boxed(),
                    );
                }
            }
        }
    }
}

impl AsyncSeek for RangeReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        this.buffered = Bytes::new();
        if let State::Fetching(_) = this.state {
            this.state = State::Idle;
        }
        this.pending_seek = Some(position);
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.get_mut();
        let Some(pos) = this.pending_seek else {
            return Poll::Ready(Ok(this.position));
        };
        let size = match futures_util::ready!(this.poll_size(cx)) {
            Ok(size) => size,
            Err(err) => {
                this.pending_seek = None;
                return Poll::Ready(Err(to_io_error(err)));
            }
        };
        this.pending_seek = None;
        let target = resolve(pos, this.position, size).map_err(to_io_error)?;
        this.position = target;
        Poll::Ready(Ok(target))
    }
}

impl fmt::Debug for RangeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeReader")
            .field("source", &self.source)
            .field("size", &self.size)
            .field("position", &self.position)
            .field("max_read_length", &self.max_read_length)
            .finish()
    }
}
