/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! MD5 helpers used to verify content integrity.
//!
//! Checksums are exchanged as base64 encoded MD5 digests, the same encoding S3 uses for the
//! `Content-MD5` header.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{self, Error, ErrorKind};

pub mod multipart_etag;

pub use multipart_etag::MultipartEtag;

/// Base64 encoded MD5 digest of `data`.
pub fn base64_md5(data: &[u8]) -> String {
    encode_digest(md5::compute(data))
}

/// Base64 encoding of a finished digest.
pub fn encode_digest(digest: md5::Digest) -> String {
    STANDARD.encode(digest.0)
}

/// Convert a base64 encoded digest to lower case hex.
pub fn hex_from_base64(md5_sum: &str) -> Result<String, Error> {
    let raw = STANDARD
        .decode(md5_sum)
        .map_err(error::from_kind(ErrorKind::IntegrityMismatch))?;
    Ok(hex::encode(raw))
}

/// Convert a lower or upper case hex digest to base64.
pub fn base64_from_hex(hex_sum: &str) -> Result<String, Error> {
    let raw = hex::decode(hex_sum).map_err(error::from_kind(ErrorKind::IntegrityMismatch))?;
    Ok(STANDARD.encode(raw))
}

pin_project! {
    /// [`AsyncRead`] adapter that digests every byte passing through it.
    pub struct DigestReader<R> {
        #[pin]
        inner: R,
        context: md5::Context,
        bytes_read: u64,
    }
}

impl<R> DigestReader<R> {
    /// Wrap `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            context: md5::Context::new(),
            bytes_read: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Base64 MD5 of everything read so far.
    pub fn md5_sum(&self) -> String {
        encode_digest(self.context.clone().compute())
    }

    /// Unwrap the inner reader, returning it with the final base64 MD5.
    pub fn finish(self) -> (R, String) {
        let sum = encode_digest(self.context.compute());
        (self.inner, sum)
    }
}

impl<R: AsyncRead> AsyncRead for DigestReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        futures_util::ready!(this.inner.poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        this.context.consume(fresh);
        *this.bytes_read += fresh.len() as u64;
        Poll::Ready(Ok(()))
    }
}

impl<R> std::fmt::Debug for DigestReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestReader")
            .field("bytes_read", &self.bytes_read)
            .finish_non_exhaustive()
    }
}

/// Fail with [`ErrorKind::IntegrityMismatch`] unless both sums are equal.
pub(crate) fn verify(expected: &str, actual: &str) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(error::integrity_mismatch(expected, actual))
    }
}
