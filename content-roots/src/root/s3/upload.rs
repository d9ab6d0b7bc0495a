/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::Instrument;

use super::S3Root;
use crate::checksum::{self, MultipartEtag};
use crate::error::{self, Error, ErrorKind};
use crate::io::ContentStream;
use crate::key;
use crate::metadata::{self, UserMetadata};
use crate::object_store::{CompletedPart, MultipartUpload, PutObjectRequest};
use crate::MEBIBYTE;

/// Parts read ahead of the part being uploaded.
const PART_CHANNEL_DEPTH: usize = 2;

/// Write `stream` to `key`, in a single request or in parts depending on `size`.
pub(super) async fn upload(
    root: &S3Root,
    key: &str,
    stream: ContentStream,
    md5_sum: Option<&str>,
    size: Option<u64>,
    metadata: UserMetadata,
) -> Result<(), Error> {
    if key::is_directory_key(key) {
        return Err(error::invalid_key(&root.handle.name, key));
    }
    let full_key = root.full_key(key);
    let headers = metadata::to_headers(md5_sum, &metadata);

    match size {
        Some(size) if size < root.handle.multipart_threshold => {
            tracing::trace!(
                "upload size ({size}) below multipart threshold ({}); sending as single PutObject request",
                root.handle.multipart_threshold
            );
            let request = PutObjectRequest {
                key: full_key,
                body: stream,
                content_length: Some(size),
                content_md5: md5_sum.map(str::to_owned),
                metadata: headers,
            };
            root.handle
                .store
                .put_object(&root.handle.bucket, request)
                .await?;
            Ok(())
        }
        _ => {
            let span = tracing::debug_span!("multipart-upload", key = %full_key);
            let ctx = UploadContext {
                root,
                full_key,
                md5_sum,
            };
            ctx.upload_multipart(stream, headers).instrument(span).await
        }
    }
}

struct UploadContext<'a> {
    root: &'a S3Root,
    full_key: String,
    md5_sum: Option<&'a str>,
}

/// What was sent in a multipart upload, for verification.
struct Sent {
    parts: Vec<CompletedPart>,
    etag: MultipartEtag,
    md5_sum: String,
}

impl UploadContext<'_> {
    async fn upload_multipart(
        &self,
        stream: ContentStream,
        headers: HashMap<String, String>,
    ) -> Result<(), Error> {
        let store = &self.root.handle.store;
        let bucket = &self.root.handle.bucket;

        let existed = match store.head_object(bucket, &self.full_key).await {
            Ok(_) => true,
            Err(err) if err.kind() == &ErrorKind::NotFound => false,
            Err(err) => return Err(err),
        };

        let upload = store
            .create_multipart_upload(bucket, &self.full_key, headers)
            .await?;
        tracing::trace!("multipart upload started with upload id: {}", upload.upload_id);

        let sent = match self.upload_parts(&upload, stream).await {
            Ok(sent) => sent,
            Err(err) => {
                self.abort(&upload).await;
                return Err(err);
            }
        };
        if let Some(md5_sum) = self.md5_sum {
            if let Err(err) = checksum::verify(md5_sum, &sent.md5_sum) {
                tracing::debug!("content checksum mismatch; aborting multipart upload");
                self.abort(&upload).await;
                return Err(err);
            }
        }

        let part_count = sent.parts.len();
        let reported = match store
            .complete_multipart_upload(bucket, &upload, sent.parts)
            .await
        {
            Ok(reported) => reported,
            Err(err) => {
                self.abort(&upload).await;
                return Err(err);
            }
        };
        tracing::trace!(part_count, ?reported, "multipart upload completed");

        let expected = sent.etag.etag();
        match reported.as_deref() {
            Some(reported) if reported == expected => Ok(()),
            reported => {
                let err = error::integrity_mismatch(&expected, reported.unwrap_or("no etag"));
                if !existed {
                    tracing::debug!("removing unverified upload");
                    if let Err(delete_err) =
                        store.delete_object(bucket, &self.full_key, None).await
                    {
                        tracing::warn!(error = %delete_err, "failed to remove unverified upload");
                    }
                }
                Err(err)
            }
        }
    }

    /// Upload the parts read from `stream` by a reader task.
    async fn upload_parts(
        &self,
        upload: &MultipartUpload,
        stream: ContentStream,
    ) -> Result<Sent, Error> {
        let part_size = self.root.handle.part_size;
        let (tx, mut rx) = mpsc::channel(PART_CHANNEL_DEPTH);
        let reader = tokio::spawn(read_parts(stream, part_size, tx).in_current_span());

        let mut etag = MultipartEtag::new(part_size);
        let mut md5 = md5::Context::new();
        let mut parts = Vec::new();
        while let Some(part) = rx.recv().await {
            let part: Bytes = part?;
            etag.update(&part);
            md5.consume(&part);
            self.send_part(upload, &mut parts, part).await?;
        }
        reader.await?;

        if parts.is_empty() {
            // a multipart upload needs at least one part
            self.send_part(upload, &mut parts, Bytes::new()).await?;
        }

        Ok(Sent {
            parts,
            etag,
            md5_sum: checksum::encode_digest(md5.compute()),
        })
    }

    async fn send_part(
        &self,
        upload: &MultipartUpload,
        parts: &mut Vec<CompletedPart>,
        part: Bytes,
    ) -> Result<(), Error> {
        let part_number = parts.len() as i32 + 1;
        tracing::trace!(part_number, len = part.len(), "uploading part");
        let e_tag = self
            .root
            .handle
            .store
            .upload_part(&self.root.handle.bucket, upload, part_number, part)
            .await?;
        parts.push(CompletedPart { part_number, e_tag });
        Ok(())
    }

    async fn abort(&self, upload: &MultipartUpload) {
        if let Err(err) = self
            .root
            .handle
            .store
            .abort_multipart_upload(&self.root.handle.bucket, upload)
            .await
        {
            tracing::warn!(upload_id = %upload.upload_id, error = %err, "failed to abort multipart upload");
        }
    }
}

/// Read `stream` in parts of `part_size` bytes, sending them to `tx` until the stream or
/// the receiver ends. Only the last part may be short; it is never empty.
async fn read_parts(
    mut stream: ContentStream,
    part_size: u64,
    tx: mpsc::Sender<Result<Bytes, Error>>,
) {
    loop {
        let part = read_part(&mut stream, part_size).await;
        let last = match &part {
            Ok(part) if part.is_empty() => break,
            Ok(part) => (part.len() as u64) < part_size,
            Err(_) => true,
        };
        if tx.send(part).await.is_err() || last {
            break;
        }
    }
}

async fn read_part(stream: &mut ContentStream, part_size: u64) -> Result<Bytes, Error> {
    let mut part = BytesMut::with_capacity(part_size.min(8 * MEBIBYTE) as usize);
    let mut limited = stream.take(part_size);
    while limited.read_buf(&mut part).await? != 0 {}
    Ok(part.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_parts() {
        let (tx, mut rx) = mpsc::channel(PART_CHANNEL_DEPTH);
        let stream = ContentStream::from_reader(&b"abcdefghijklm"[..], None);
        tokio::spawn(read_parts(stream, 5, tx));
        let mut parts = Vec::new();
        while let Some(part) = rx.recv().await {
            parts.push(part.unwrap());
        }
        assert_eq!(vec!["abcde", "fghij", "klm"], parts);
    }

    #[tokio::test]
    async fn test_read_parts_across_reads() {
        let reader = tokio_test::io::Builder::new()
            .read(b"abc")
            .read(b"defgh")
            .read(b"ijklm")
            .build();
        let (tx, mut rx) = mpsc::channel(PART_CHANNEL_DEPTH);
        tokio::spawn(read_parts(ContentStream::from_reader(reader, None), 5, tx));
        let mut parts = Vec::new();
        while let Some(part) = rx.recv().await {
            parts.push(part.unwrap());
        }
        assert_eq!(vec!["abcde", "fghij", "klm"], parts);
    }

    #[tokio::test]
    async fn test_read_parts_exact_multiple() {
        let (tx, mut rx) = mpsc::channel(PART_CHANNEL_DEPTH);
        tokio::spawn(read_parts("abcdefghij".into(), 5, tx));
        let mut parts = Vec::new();
        while let Some(part) = rx.recv().await {
            parts.push(part.unwrap());
        }
        assert_eq!(vec!["abcde", "fghij"], parts);
    }

    #[tokio::test]
    async fn test_read_parts_empty() {
        let (tx, mut rx) = mpsc::channel(PART_CHANNEL_DEPTH);
        tokio::spawn(read_parts(ContentStream::default(), 5, tx));
        assert!(rx.recv().await.is_none());
    }
}
